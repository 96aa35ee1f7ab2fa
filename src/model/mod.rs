mod loader;
mod registry;
mod stream;
mod types;

pub use loader::{EncoderInstance, LlmInstance, ModelArtifacts};
pub use registry::{LanguageModel, ModelRegistry, SentenceEncoder};
pub use stream::ChunkEmitter;
pub use types::{EncodeRequest, EncodeResponse, PromptRequest, PromptResponse};
