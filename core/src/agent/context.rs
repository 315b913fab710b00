use crate::traits::{Brain, Provider};
use std::sync::Arc;

/// Everything an action may touch while executing: the active provider,
/// the owning agent's identity, and its brain when one is attached.
#[derive(Clone)]
pub struct ActionContext {
    pub provider: Arc<dyn Provider>,
    pub agent: String,
    pub brain: Option<Arc<dyn Brain>>,
}

impl ActionContext {
    pub fn new(provider: Arc<dyn Provider>, agent: impl Into<String>) -> Self {
        Self {
            provider,
            agent: agent.into(),
            brain: None,
        }
    }

    pub fn with_brain(mut self, brain: Arc<dyn Brain>) -> Self {
        self.brain = Some(brain);
        self
    }
}
