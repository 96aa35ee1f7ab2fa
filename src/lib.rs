pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod server;

pub use client::{EmbeddingsClient, PromptClient, PromptStream, Sentences};
pub use config::AppConfig;
pub use error::{ClientError, ServiceError};
pub use model::{LanguageModel, ModelRegistry, PromptRequest, PromptResponse, SentenceEncoder};
pub use server::build_router;
