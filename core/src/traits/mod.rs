pub mod action;
pub mod brain;
pub mod provider;

pub use action::{Action, ActionOutcome, ActionSpec};
pub use brain::{Brain, MemoryMessage, SearchHit, namespaced_collection};
pub use provider::{
    ChatMessage, ChatOutcome, EmbeddingOptions, GenerateOptions, GeneratedImage, ImageRequest,
    Provider, SpeechOptions, TextStream, ToolCall, Transcript, TranscribeOptions,
};
