use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use tch::Device;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub llm_module_path: PathBuf,
    pub llm_tokenizer_path: PathBuf,
    pub encoder_module_path: PathBuf,
    pub encoder_tokenizer_path: PathBuf,
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub eos_token_id: i64,
    pub device: Device,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8000".into())
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000));

        let llm_module_path = PathBuf::from(
            env::var("LLM_MODULE_PATH").unwrap_or_else(|_| "models/llm.ts".to_string()),
        );
        let llm_tokenizer_path = PathBuf::from(
            env::var("LLM_TOKENIZER_PATH")
                .unwrap_or_else(|_| "models/llm_tokenizer.json".to_string()),
        );
        let encoder_module_path = PathBuf::from(
            env::var("ENCODER_MODULE_PATH").unwrap_or_else(|_| "models/encoder.ts".to_string()),
        );
        let encoder_tokenizer_path = PathBuf::from(
            env::var("ENCODER_TOKENIZER_PATH")
                .unwrap_or_else(|_| "models/encoder_tokenizer.json".to_string()),
        );

        let max_new_tokens = env::var("MAX_NEW_TOKENS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(256);
        let temperature = env::var("TEMPERATURE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        let eos_token_id = env::var("EOS_TOKEN_ID")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        let device = {
            let raw = env::var("DEVICE").unwrap_or_else(|_| "cpu".into());
            parse_device(&raw)
        };

        Ok(Self {
            listen_addr,
            llm_module_path,
            llm_tokenizer_path,
            encoder_module_path,
            encoder_tokenizer_path,
            max_new_tokens,
            temperature,
            eos_token_id,
            device,
        })
    }
}

fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower == "cpu" {
        Device::Cpu
    } else if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}
