//! Error taxonomy for aictl-core.
//!
//! A `thiserror` enum carried inside `anyhow::Error`. The constructor helpers
//! (`config`, `provider`, `action`) return an already-wrapped `anyhow::Error`
//! so call sites can `return Err(Error::provider(..))` directly, while the bare
//! enum variants are available for `matches!`/`downcast_ref` in tests.

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Configuration or persisted-store problem.
    #[error("configuration error: {0}")]
    Config(String),

    /// An upstream model provider (or brain service) failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// An action could not be performed as requested.
    #[error("action error: {0}")]
    Action(String),

    /// The agent loop hit its round bound without completing.
    #[error("action loop exceeded {max} rounds without completion")]
    LoopBound { max: usize },
}

impl Error {
    /// Build a configuration error wrapped in `anyhow::Error`.
    pub fn config(msg: impl Into<String>) -> anyhow::Error {
        Error::Config(msg.into()).into()
    }

    /// Build a provider error wrapped in `anyhow::Error`.
    pub fn provider(msg: impl Into<String>) -> anyhow::Error {
        Error::Provider(msg.into()).into()
    }

    /// Build an action error wrapped in `anyhow::Error`.
    pub fn action(msg: impl Into<String>) -> anyhow::Error {
        Error::Action(msg.into()).into()
    }
}
