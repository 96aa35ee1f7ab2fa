//! Thin clients for the prompt and embedding endpoints.
//!
//! Both clients ping the server on construction and fail fast when it is
//! unreachable. Any response with status >= 300 becomes a
//! [`ClientError::Status`] carrying the code and stated reason.

use crate::{
    error::ClientError,
    model::{EncodeRequest, EncodeResponse, PromptRequest, PromptResponse},
};

pub struct PromptClient {
    http: reqwest::Client,
    base_url: String,
    prompt_template: String,
}

impl PromptClient {
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        Self::with_template(url, "{prompt}").await
    }

    /// Like [`connect`](Self::connect), but every prompt is substituted into
    /// `prompt_template` at the `{prompt}` placeholder before being sent.
    pub async fn with_template(url: &str, prompt_template: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::new();
        let base_url = url.trim_end_matches('/').to_string();
        ping(&http, &base_url).await?;
        tracing::debug!(url = %base_url, "connected to prompt server");

        Ok(Self {
            http,
            base_url,
            prompt_template: prompt_template.to_string(),
        })
    }

    /// Synchronous completion: the full generated message.
    pub async fn prompt(
        &self,
        prompt: &str,
        temperature: f64,
        stop: Option<Vec<String>>,
    ) -> Result<String, ClientError> {
        let response = self
            .http
            .post(format!("{}/prompt/", self.base_url))
            .json(&self.payload(prompt, temperature, stop))
            .send()
            .await?;
        let response = error_for_status(response)?;
        let body: PromptResponse = response.json().await?;
        Ok(body.message)
    }

    /// Streaming completion: a [`PromptStream`] yielding decoded text chunks
    /// as they arrive.
    pub async fn prompt_streaming(
        &self,
        prompt: &str,
        temperature: f64,
        stop: Option<Vec<String>>,
    ) -> Result<PromptStream, ClientError> {
        let response = self
            .http
            .post(format!("{}/prompt-streaming", self.base_url))
            .json(&self.payload(prompt, temperature, stop))
            .send()
            .await?;
        let response = error_for_status(response)?;
        Ok(PromptStream {
            response,
            carry: Utf8Carry::default(),
        })
    }

    fn payload(&self, prompt: &str, temperature: f64, stop: Option<Vec<String>>) -> PromptRequest {
        PromptRequest {
            prompt: self.prompt_template.replace("{prompt}", prompt),
            temperature: Some(temperature),
            stop,
        }
    }
}

/// Lazily consumed streamed completion.
pub struct PromptStream {
    response: reqwest::Response,
    carry: Utf8Carry,
}

impl PromptStream {
    /// The next decoded chunk, or `None` once the stream is exhausted.
    pub async fn next(&mut self) -> Result<Option<String>, ClientError> {
        loop {
            match self.response.chunk().await? {
                Some(bytes) => {
                    if let Some(text) = self.carry.push(&bytes)? {
                        return Ok(Some(text));
                    }
                }
                None => {
                    std::mem::take(&mut self.carry).finish()?;
                    return Ok(None);
                }
            }
        }
    }

    /// Drain the stream and concatenate all chunks.
    pub async fn collect(mut self) -> Result<String, ClientError> {
        let mut message = String::new();
        while let Some(chunk) = self.next().await? {
            message.push_str(&chunk);
        }
        Ok(message)
    }
}

pub struct EmbeddingsClient {
    http: reqwest::Client,
    base_url: String,
}

impl EmbeddingsClient {
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::new();
        let base_url = url.trim_end_matches('/').to_string();
        ping(&http, &base_url).await?;
        tracing::debug!(url = %base_url, "connected to embedding server");

        Ok(Self { http, base_url })
    }

    /// Encode a single sentence or a batch; one vector per sentence, input
    /// order. A single string behaves exactly like a one-element batch.
    pub async fn encode(
        &self,
        sentences: impl Into<Sentences>,
    ) -> Result<Vec<Vec<f32>>, ClientError> {
        let Sentences(sentences) = sentences.into();
        let response = self
            .http
            .post(format!("{}/encode", self.base_url))
            .json(&EncodeRequest { sentences })
            .send()
            .await?;
        let response = error_for_status(response)?;
        let body: EncodeResponse = response.json().await?;
        Ok(body.embeddings)
    }
}

/// A batch of sentences to encode. The conversions make non-string input
/// unrepresentable, so invalid batches are rejected at compile time rather
/// than before the network call.
pub struct Sentences(pub Vec<String>);

impl From<&str> for Sentences {
    fn from(sentence: &str) -> Self {
        Sentences(vec![sentence.to_string()])
    }
}

impl From<String> for Sentences {
    fn from(sentence: String) -> Self {
        Sentences(vec![sentence])
    }
}

impl From<Vec<String>> for Sentences {
    fn from(sentences: Vec<String>) -> Self {
        Sentences(sentences)
    }
}

impl From<&[String]> for Sentences {
    fn from(sentences: &[String]) -> Self {
        Sentences(sentences.to_vec())
    }
}

impl From<Vec<&str>> for Sentences {
    fn from(sentences: Vec<&str>) -> Self {
        Sentences(sentences.into_iter().map(str::to_string).collect())
    }
}

async fn ping(http: &reqwest::Client, base_url: &str) -> Result<(), ClientError> {
    let response = http
        .get(format!("{base_url}/ping/"))
        .send()
        .await
        .map_err(|err| ClientError::Connect {
            url: base_url.to_string(),
            reason: err.to_string(),
        })?;

    let status = response.status();
    if status.as_u16() >= 300 {
        return Err(ClientError::Connect {
            url: base_url.to_string(),
            reason: format!(
                "status code = {}, reason = {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("unknown")
            ),
        });
    }

    Ok(())
}

fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.as_u16() >= 300 {
        return Err(ClientError::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("unknown").to_string(),
        });
    }
    Ok(response)
}

/// Carries incomplete UTF-8 sequences across chunk boundaries so a multi-byte
/// character split by the transport never fails to decode.
#[derive(Default)]
struct Utf8Carry {
    partial: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, bytes: &[u8]) -> Result<Option<String>, ClientError> {
        self.partial.extend_from_slice(bytes);
        match std::str::from_utf8(&self.partial) {
            Ok(_) => {
                let head = std::mem::take(&mut self.partial);
                let text = String::from_utf8(head).map_err(|_| ClientError::Utf8)?;
                if text.is_empty() { Ok(None) } else { Ok(Some(text)) }
            }
            Err(err) if err.error_len().is_none() => {
                let valid = err.valid_up_to();
                if valid == 0 {
                    return Ok(None);
                }
                let tail = self.partial.split_off(valid);
                let head = std::mem::replace(&mut self.partial, tail);
                let text = String::from_utf8(head).map_err(|_| ClientError::Utf8)?;
                Ok(Some(text))
            }
            Err(_) => Err(ClientError::Utf8),
        }
    }

    fn finish(self) -> Result<(), ClientError> {
        if self.partial.is_empty() {
            Ok(())
        } else {
            Err(ClientError::Utf8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sentence_and_one_element_batch_agree() {
        let Sentences(single) = "hello".into();
        let Sentences(batch) = vec!["hello".to_string()].into();
        assert_eq!(single, batch);
    }

    #[test]
    fn batch_order_is_preserved() {
        let Sentences(batch) = vec!["a", "b", "c"].into();
        assert_eq!(batch, vec!["a", "b", "c"]);
    }

    #[test]
    fn prompt_template_substitution() {
        let client = PromptClient {
            http: reqwest::Client::new(),
            base_url: "http://127.0.0.1:8000".into(),
            prompt_template: "<s>[INST] {prompt} [/INST]".into(),
        };
        let payload = client.payload("say hi", 1.0, None);
        assert_eq!(payload.prompt, "<s>[INST] say hi [/INST]");
        assert_eq!(payload.temperature, Some(1.0));
        assert!(payload.stop.is_none());
    }

    #[test]
    fn utf8_carry_reassembles_split_characters() {
        // "é" is 0xC3 0xA9; split it across two chunks.
        let mut carry = Utf8Carry::default();
        let first = carry.push(b"caf\xC3").unwrap();
        assert_eq!(first.as_deref(), Some("caf"));
        let second = carry.push(b"\xA9!").unwrap();
        assert_eq!(second.as_deref(), Some("\u{e9}!"));
        carry.finish().unwrap();
    }

    #[test]
    fn utf8_carry_rejects_truncated_stream() {
        let mut carry = Utf8Carry::default();
        assert!(carry.push(b"ok\xE2\x9C").unwrap().is_some());
        assert!(carry.finish().is_err());
    }

    #[test]
    fn utf8_carry_rejects_invalid_bytes() {
        let mut carry = Utf8Carry::default();
        assert!(carry.push(b"\xFFbad").is_err());
    }

    #[tokio::test]
    async fn connect_fails_when_server_is_unreachable() {
        // Nothing listens on this port.
        let err = PromptClient::connect("http://127.0.0.1:9")
            .await
            .expect_err("expected connection failure");
        assert!(matches!(err, ClientError::Connect { .. }));
    }
}
