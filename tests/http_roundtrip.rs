//! End-to-end tests: the real router served over stub models, exercised
//! through the real clients on an ephemeral port.

use std::sync::Arc;

use tokio::net::TcpListener;

use local_llm_service::{
    AppConfig, ClientError, EmbeddingsClient, LanguageModel, ModelRegistry, PromptClient,
    SentenceEncoder, ServiceError, build_router, model::ChunkEmitter,
};

/// Deterministic stand-in for the causal LM: completes every prompt as
/// `echo: <prompt>`, emitted character by character through the same
/// chunk-emission path the real backend uses.
struct EchoLlm;

impl LanguageModel for EchoLlm {
    fn generate(
        &self,
        prompt: &str,
        _temperature: f64,
        stop: &[String],
        _max_new_tokens: usize,
        on_chunk: &mut dyn FnMut(&str) -> bool,
    ) -> Result<String, ServiceError> {
        let full = format!("echo: {prompt}");
        let mut emitter = ChunkEmitter::new(stop);
        let mut message = String::new();
        let mut decoded = String::new();
        let mut halted = false;

        for ch in full.chars() {
            decoded.push(ch);
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
        if !halted {
            if let Some(tail) = emitter.finish(&decoded) {
                message.push_str(&tail);
                on_chunk(&tail);
            }
        }

        Ok(message)
    }
}

struct FailingLlm;

impl LanguageModel for FailingLlm {
    fn generate(
        &self,
        _prompt: &str,
        _temperature: f64,
        _stop: &[String],
        _max_new_tokens: usize,
        _on_chunk: &mut dyn FnMut(&str) -> bool,
    ) -> Result<String, ServiceError> {
        Err(ServiceError::Inference("backend exploded".into()))
    }
}

/// Maps each sentence to a small vector derived from its bytes, so order and
/// identity are checkable without a real model.
struct StubEncoder;

impl SentenceEncoder for StubEncoder {
    fn encode(&self, sentences: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Ok(sentences
            .iter()
            .map(|s| {
                vec![
                    s.len() as f32,
                    s.bytes().next().unwrap_or(0) as f32,
                    s.bytes().map(u32::from).sum::<u32>() as f32,
                ]
            })
            .collect())
    }
}

async fn serve(llm: Arc<dyn LanguageModel>, encoder: Arc<dyn SentenceEncoder>) -> String {
    let config = Arc::new(AppConfig::from_env().expect("config"));
    let registry = Arc::new(ModelRegistry::from_parts(llm, encoder));
    let router = build_router(config, registry);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    format!("http://{addr}")
}

async fn serve_stubs() -> String {
    serve(Arc::new(EchoLlm), Arc::new(StubEncoder)).await
}

#[tokio::test]
async fn ping_confirms_reachability() {
    let url = serve_stubs().await;
    PromptClient::connect(&url).await.expect("connect");
    EmbeddingsClient::connect(&url).await.expect("connect");
}

#[tokio::test]
async fn sync_prompt_returns_full_message() {
    let url = serve_stubs().await;
    let client = PromptClient::connect(&url).await.expect("connect");
    let message = client.prompt("hello", 1.0, None).await.expect("prompt");
    assert_eq!(message, "echo: hello");
}

#[tokio::test]
async fn prompt_template_is_applied_before_sending() {
    let url = serve_stubs().await;
    let client = PromptClient::with_template(&url, "[INST] {prompt} [/INST]")
        .await
        .expect("connect");
    let message = client.prompt("hi", 1.0, None).await.expect("prompt");
    assert_eq!(message, "echo: [INST] hi [/INST]");
}

#[tokio::test]
async fn streaming_concatenation_matches_sync_message() {
    let url = serve_stubs().await;
    let client = PromptClient::connect(&url).await.expect("connect");

    let sync = client
        .prompt("consistency check", 0.0, None)
        .await
        .expect("prompt");
    let streamed = client
        .prompt_streaming("consistency check", 0.0, None)
        .await
        .expect("stream")
        .collect()
        .await
        .expect("collect");

    assert_eq!(streamed, sync);
}

#[tokio::test]
async fn streaming_yields_incremental_chunks() {
    let url = serve_stubs().await;
    let client = PromptClient::connect(&url).await.expect("connect");

    let mut stream = client
        .prompt_streaming("one two three", 1.0, None)
        .await
        .expect("stream");
    let mut message = String::new();
    while let Some(chunk) = stream.next().await.expect("next") {
        assert!(!chunk.is_empty());
        message.push_str(&chunk);
    }
    assert_eq!(message, "echo: one two three");
}

#[tokio::test]
async fn stop_strings_truncate_both_paths() {
    let url = serve_stubs().await;
    let client = PromptClient::connect(&url).await.expect("connect");
    let stop = Some(vec!["two".to_string()]);

    let sync = client
        .prompt("one two three", 1.0, stop.clone())
        .await
        .expect("prompt");
    assert_eq!(sync, "echo: one ");

    let streamed = client
        .prompt_streaming("one two three", 1.0, stop)
        .await
        .expect("stream")
        .collect()
        .await
        .expect("collect");
    assert_eq!(streamed, sync);
}

#[tokio::test]
async fn encode_preserves_count_and_order() {
    let url = serve_stubs().await;
    let client = EmbeddingsClient::connect(&url).await.expect("connect");

    let sentences = vec!["alpha", "bb", "gamma ray"];
    let embeddings = client.encode(sentences.clone()).await.expect("encode");

    assert_eq!(embeddings.len(), sentences.len());
    for (sentence, vector) in sentences.iter().zip(&embeddings) {
        assert_eq!(vector[0], sentence.len() as f32);
    }
}

#[tokio::test]
async fn single_sentence_equals_one_element_batch() {
    let url = serve_stubs().await;
    let client = EmbeddingsClient::connect(&url).await.expect("connect");

    let single = client.encode("gangnam style").await.expect("encode");
    let batch = client
        .encode(vec!["gangnam style".to_string()])
        .await
        .expect("encode");

    assert_eq!(single, batch);
}

#[tokio::test]
async fn streaming_empty_prompt_is_rejected_with_400() {
    let url = serve_stubs().await;
    let client = PromptClient::connect(&url).await.expect("connect");

    let err = client
        .prompt_streaming("   ", 1.0, None)
        .await
        .expect_err("expected status error");
    match err {
        ClientError::Status { status, .. } => assert_eq!(status, 400),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn server_failure_surfaces_as_status_error() {
    let url = serve(Arc::new(FailingLlm), Arc::new(StubEncoder)).await;
    let client = PromptClient::connect(&url).await.expect("connect");

    let err = client
        .prompt("boom", 1.0, None)
        .await
        .expect_err("expected status error");
    match err {
        ClientError::Status { status, .. } => assert_eq!(status, 500),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn malformed_payload_is_rejected_by_schema_layer() {
    let url = serve_stubs().await;

    let response = reqwest::Client::new()
        .post(format!("{url}/prompt/"))
        .header("content-type", "application/json")
        .body("{\"prompt\": 42}")
        .send()
        .await
        .expect("send");

    assert!(response.status().as_u16() >= 400);
}
