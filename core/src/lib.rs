pub mod actions;
pub mod agent;
pub mod brain;
pub mod error;
pub mod providers;
pub mod store;
pub mod traits;
pub mod usage;

pub use agent::{ActionContext, ActionRegistry, AgentRunner, MAX_ACTION_ROUNDS};
pub use error::Error;
pub use store::{AgentEntry, BrainEntry, Store, Thread, ThreadMessage};
pub use traits::*;
pub use usage::UsageLog;
