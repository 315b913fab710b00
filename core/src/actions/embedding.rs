use crate::actions::extract_string_arg_opt;
use crate::agent::ActionContext;
use crate::traits::{Action, ActionOutcome, EmbeddingOptions};
use async_trait::async_trait;
use serde_json::json;

/// Create embeddings for one text or a list of texts.
pub struct EmbeddingCreateAction;

#[async_trait]
impl Action for EmbeddingCreateAction {
    fn name(&self) -> &str {
        "create_embedding"
    }

    fn description(&self) -> &str {
        "Create embeddings for text and return the embedding vector(s)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": ["string", "array"], "description": "Text or list of texts"},
                "model": {"type": "string"},
                "dimensions": {"type": "integer"}
            },
            "required": ["text"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ActionContext,
    ) -> anyhow::Result<ActionOutcome> {
        let input: Vec<String> = match args.get("text") {
            Some(serde_json::Value::String(s)) => vec![s.clone()],
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => vec![],
        };
        if input.is_empty() {
            return Ok(ActionOutcome::fail("text must be a string or list of strings"));
        }

        let opts = EmbeddingOptions {
            model: extract_string_arg_opt(&args, "model"),
            dimensions: args
                .get("dimensions")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32),
        };

        match ctx.provider.embeddings(&input, &opts).await {
            Ok(vectors) => {
                let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
                Ok(ActionOutcome::ok(json!({
                    "count": vectors.len(),
                    "dimensions": dimensions,
                    "embeddings": vectors,
                })))
            }
            Err(e) => Ok(ActionOutcome::fail(format!("{e:#}"))),
        }
    }
}
