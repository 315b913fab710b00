use crate::agent::ActionContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of one action invocation, serialized verbatim into the
/// tool-result message the model sees next round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub output: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

/// Declared shape of an action, handed to providers as a tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// A schema-described callable the model may request during a
/// chat-with-tools round. Side effects are external and not idempotent;
/// argument validation happens in the registry before `execute` runs.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ActionContext,
    ) -> anyhow::Result<ActionOutcome>;

    fn spec(&self) -> ActionSpec {
        ActionSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}
