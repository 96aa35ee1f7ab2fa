use std::sync::Arc;

use tokio::{sync::mpsc, task};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{
        loader::{EncoderInstance, LlmInstance, ModelArtifacts},
        types::PromptRequest,
    },
};

/// Seam over the causal language model. `on_chunk` receives each newly
/// decoded text fragment and returns whether generation should continue.
pub trait LanguageModel: Send + Sync + 'static {
    fn generate(
        &self,
        prompt: &str,
        temperature: f64,
        stop: &[String],
        max_new_tokens: usize,
        on_chunk: &mut dyn FnMut(&str) -> bool,
    ) -> Result<String, ServiceError>;
}

/// Seam over the sentence encoder: one embedding per sentence, input order.
pub trait SentenceEncoder: Send + Sync + 'static {
    fn encode(&self, sentences: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;
}

impl LanguageModel for LlmInstance {
    fn generate(
        &self,
        prompt: &str,
        temperature: f64,
        stop: &[String],
        max_new_tokens: usize,
        on_chunk: &mut dyn FnMut(&str) -> bool,
    ) -> Result<String, ServiceError> {
        LlmInstance::generate(self, prompt, temperature, stop, max_new_tokens, on_chunk)
    }
}

impl SentenceEncoder for EncoderInstance {
    fn encode(&self, sentences: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        EncoderInstance::encode(self, sentences)
    }
}

pub struct ModelRegistry {
    llm: Arc<dyn LanguageModel>,
    encoder: Arc<dyn SentenceEncoder>,
}

impl ModelRegistry {
    pub fn initialize(config: &AppConfig) -> Result<Self, ServiceError> {
        let artifacts = ModelArtifacts::load(config)?;
        Ok(Self {
            llm: artifacts.llm,
            encoder: artifacts.encoder,
        })
    }

    pub fn from_parts(llm: Arc<dyn LanguageModel>, encoder: Arc<dyn SentenceEncoder>) -> Self {
        Self { llm, encoder }
    }

    /// Run generation to completion and return the full message.
    pub async fn complete(
        &self,
        request: PromptRequest,
        config: &AppConfig,
    ) -> Result<String, ServiceError> {
        let llm = self.llm.clone();
        let temperature = request.temperature.unwrap_or(config.temperature);
        let max_new_tokens = config.max_new_tokens;

        task::spawn_blocking(move || {
            let stop = request.stop.unwrap_or_default();
            llm.generate(
                &request.prompt,
                temperature,
                &stop,
                max_new_tokens,
                &mut |_| true,
            )
        })
        .await
        .map_err(|err| ServiceError::Inference(format!("inference task failed: {err}")))?
    }

    /// Run generation on the blocking pool, relaying each text fragment
    /// through a bounded channel. Dropping the receiver ends generation.
    pub fn stream(
        &self,
        request: PromptRequest,
        config: &AppConfig,
    ) -> mpsc::Receiver<Result<String, ServiceError>> {
        let (tx, rx) = mpsc::channel(32);
        let llm = self.llm.clone();
        let temperature = request.temperature.unwrap_or(config.temperature);
        let max_new_tokens = config.max_new_tokens;

        task::spawn_blocking(move || {
            let stop = request.stop.unwrap_or_default();
            let sender = tx.clone();
            let result = llm.generate(
                &request.prompt,
                temperature,
                &stop,
                max_new_tokens,
                &mut |chunk| sender.blocking_send(Ok(chunk.to_string())).is_ok(),
            );
            if let Err(err) = result {
                let _ = tx.blocking_send(Err(err));
            }
        });

        rx
    }

    pub async fn encode(&self, sentences: Vec<String>) -> Result<Vec<Vec<f32>>, ServiceError> {
        let encoder = self.encoder.clone();
        task::spawn_blocking(move || encoder.encode(&sentences))
            .await
            .map_err(|err| ServiceError::Inference(format!("encoding task failed: {err}")))?
    }
}
