use std::{path::Path, sync::Arc};

use parking_lot::Mutex;
use tch::{Device, IValue, Kind, Tensor, no_grad};
use tokenizers::Tokenizer;

use crate::{config::AppConfig, error::ServiceError, model::stream::ChunkEmitter};

/// The two long-lived models: a causal language model and a sentence encoder,
/// both TorchScript modules loaded once at startup.
pub struct ModelArtifacts {
    pub llm: Arc<LlmInstance>,
    pub encoder: Arc<EncoderInstance>,
}

pub struct LlmInstance {
    tokenizer: Tokenizer,
    device: Device,
    eos_token_id: i64,
    module: Mutex<tch::CModule>,
}

pub struct EncoderInstance {
    tokenizer: Tokenizer,
    device: Device,
    module: Mutex<tch::CModule>,
}

impl ModelArtifacts {
    pub fn load(config: &AppConfig) -> Result<Self, ServiceError> {
        let llm = Arc::new(LlmInstance::new(
            &config.llm_module_path,
            &config.llm_tokenizer_path,
            config.device,
            config.eos_token_id,
        )?);
        let encoder = Arc::new(EncoderInstance::new(
            &config.encoder_module_path,
            &config.encoder_tokenizer_path,
            config.device,
        )?);

        Ok(Self { llm, encoder })
    }
}

fn load_module(module_path: &Path, device: Device) -> Result<tch::CModule, ServiceError> {
    if !module_path.exists() {
        return Err(ServiceError::Other(format!(
            "model artifact missing: {}",
            module_path.display()
        )));
    }
    let mut module = tch::CModule::load_on_device(module_path, device)
        .map_err(|e| ServiceError::Inference(e.to_string()))?;
    module.set_eval();
    Ok(module)
}

fn load_tokenizer(tokenizer_path: &Path) -> Result<Tokenizer, ServiceError> {
    Tokenizer::from_file(tokenizer_path).map_err(|e| ServiceError::Tokenizer(e.to_string()))
}

/// The traced forward pass may return either a bare tensor or a tuple whose
/// first element is the tensor of interest.
fn output_tensor(output: IValue) -> Result<Tensor, ServiceError> {
    match output {
        IValue::Tensor(t) => Ok(t),
        IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
            IValue::Tensor(t) => Ok(t.shallow_clone()),
            _ => Err(ServiceError::Inference(
                "expected tensor as first tuple element".into(),
            )),
        },
        _ => Err(ServiceError::Inference(
            "unexpected model output format".into(),
        )),
    }
}

impl LlmInstance {
    pub fn new(
        module_path: &Path,
        tokenizer_path: &Path,
        device: Device,
        eos_token_id: i64,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            tokenizer: load_tokenizer(tokenizer_path)?,
            device,
            eos_token_id,
            module: Mutex::new(load_module(module_path, device)?),
        })
    }

    /// Autoregressive generation. Decodes the completion after every step and
    /// reports new text through `on_chunk`; returns the concatenation of all
    /// reported chunks. Generation ends on EOS, the token budget, a stop
    /// string, or `on_chunk` returning false (receiver gone).
    pub fn generate(
        &self,
        prompt: &str,
        temperature: f64,
        stop: &[String],
        max_new_tokens: usize,
        on_chunk: &mut dyn FnMut(&str) -> bool,
    ) -> Result<String, ServiceError> {
        if prompt.trim().is_empty() {
            return Err(ServiceError::BadRequest("prompt must not be empty".into()));
        }

        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        let mut input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        if input_ids.is_empty() {
            input_ids.push(0);
        }
        let prompt_token_len = input_ids.len();

        let mut emitter = ChunkEmitter::new(stop);
        let mut message = String::new();
        let mut decoded = String::new();
        let mut halted = false;

        no_grad(|| {
            let module = self.module.lock();

            for _ in 0..max_new_tokens {
                let input_tensor = Tensor::from_slice(&input_ids)
                    .reshape([1, input_ids.len() as i64])
                    .to(self.device);

                let output = module
                    .forward_is(&[IValue::Tensor(input_tensor)])
                    .map_err(|e| ServiceError::Inference(e.to_string()))?;
                let logits = output_tensor(output)?;

                // Logits for the last position: shape [1, seq_len, vocab_size]
                let last_logits = logits.select(1, -1).squeeze();

                let next_token_id = if temperature > 0.0 {
                    let probs = (last_logits / temperature).softmax(-1, Kind::Float);
                    probs.multinomial(1, true).int64_value(&[0])
                } else {
                    last_logits.argmax(0, false).int64_value(&[])
                };

                input_ids.push(next_token_id);
                if next_token_id == self.eos_token_id {
                    break;
                }

                let generated: Vec<u32> = input_ids[prompt_token_len..]
                    .iter()
                    .map(|&id| id as u32)
                    .collect();
                decoded = self
                    .tokenizer
                    .decode(&generated, true)
                    .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;

                let emission = emitter.push(&decoded);
                if let Some(chunk) = emission.chunk {
                    message.push_str(&chunk);
                    if !on_chunk(&chunk) {
                        halted = true;
                        break;
                    }
                }
                if emission.halt {
                    halted = true;
                    break;
                }
            }

            Ok::<(), ServiceError>(())
        })?;

        if !halted {
            if let Some(tail) = emitter.finish(&decoded) {
                message.push_str(&tail);
                on_chunk(&tail);
            }
        }

        Ok(message)
    }
}

impl EncoderInstance {
    pub fn new(
        module_path: &Path,
        tokenizer_path: &Path,
        device: Device,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            tokenizer: load_tokenizer(tokenizer_path)?,
            device,
            module: Mutex::new(load_module(module_path, device)?),
        })
    }

    /// Batch-encode sentences into pooled embeddings, one row per sentence.
    pub fn encode(&self, sentences: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if sentences.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(sentences.to_vec(), true)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .max(1);

        let mut ids = Vec::with_capacity(sentences.len() * max_len);
        let mut mask = Vec::with_capacity(sentences.len() * max_len);
        for encoding in &encodings {
            let mut row: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
            let mut row_mask = vec![1i64; row.len()];
            row.resize(max_len, 0);
            row_mask.resize(max_len, 0);
            ids.extend(row);
            mask.extend(row_mask);
        }

        let shape = [sentences.len() as i64, max_len as i64];
        let embeddings = no_grad(|| {
            let input_ids = Tensor::from_slice(&ids).reshape(shape).to(self.device);
            let attention_mask = Tensor::from_slice(&mask).reshape(shape).to(self.device);

            let module = self.module.lock();
            let output = module
                .forward_is(&[IValue::Tensor(input_ids), IValue::Tensor(attention_mask)])
                .map_err(|e| ServiceError::Inference(e.to_string()))?;
            output_tensor(output)
        })?;

        // Pooled output: shape [batch, dim]
        let embeddings = embeddings.to(Device::Cpu).to_kind(Kind::Float);
        let mut vectors = Vec::with_capacity(sentences.len());
        for i in 0..sentences.len() as i64 {
            let row: Vec<f32> = Vec::try_from(&embeddings.get(i))
                .map_err(|e| ServiceError::Inference(e.to_string()))?;
            vectors.push(row);
        }

        Ok(vectors)
    }
}
