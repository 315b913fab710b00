pub mod context;
pub mod registry;
pub mod runner;
pub mod transcript;

pub use context::ActionContext;
pub use registry::ActionRegistry;
pub use runner::{AgentRunner, MAX_ACTION_ROUNDS, parse_inline_tool_calls};
pub use transcript::{MemoryTranscript, StoreTranscript, TranscriptSink};
