pub mod claude;
pub mod config;
pub mod gemini;
pub mod openai;
pub mod orchestrator;
pub mod prompts;
pub mod providers;

pub use config::{AiProviderInfo, AiRuntimeSelection, AiSettings};
pub use orchestrator::{AiOrchestrator, AiReply, ChatTurn, Progress, ProviderBackend, StructuredRequest};
pub use providers::ProviderRegistry;
