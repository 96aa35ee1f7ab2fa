use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeRequest {
    pub sentences: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeResponse {
    pub embeddings: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_request_defaults() {
        let request: PromptRequest = serde_json::from_str(r#"{"prompt": "hello"}"#).unwrap();
        assert_eq!(request.prompt, "hello");
        assert!(request.temperature.is_none());
        assert!(request.stop.is_none());
    }

    #[test]
    fn prompt_request_with_stop_strings() {
        let request: PromptRequest =
            serde_json::from_str(r#"{"prompt": "hi", "temperature": 0.7, "stop": ["\n\n"]}"#)
                .unwrap();
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.stop.as_deref(), Some(&["\n\n".to_string()][..]));
    }

    #[test]
    fn explicit_null_stop_is_accepted() {
        let request: PromptRequest =
            serde_json::from_str(r#"{"prompt": "hi", "stop": null}"#).unwrap();
        assert!(request.stop.is_none());
    }

    #[test]
    fn encode_response_round_trips() {
        let response = EncodeResponse {
            embeddings: vec![vec![0.1, 0.2], vec![0.3, 0.4]],
        };
        let json = serde_json::to_string(&response).unwrap();
        let back: EncodeResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.embeddings.len(), 2);
    }
}
