use crate::actions::{extract_f64_arg_opt, extract_string_arg, extract_usize_arg_opt};
use crate::agent::ActionContext;
use crate::traits::{Action, ActionOutcome};
use async_trait::async_trait;
use serde_json::json;

/// Semantic search over a brain collection. Fails up front when the
/// agent has no brain attached.
pub struct BrainSearchAction;

#[async_trait]
impl Action for BrainSearchAction {
    fn name(&self) -> &str {
        "brain_document_search"
    }

    fn description(&self) -> &str {
        "Search a brain collection with a semantic query and return results."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "collection": {"type": "string"},
                "query": {"type": "string"},
                "limit": {"type": "integer"},
                "min_score": {"type": "number"}
            },
            "required": ["collection", "query"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ActionContext,
    ) -> anyhow::Result<ActionOutcome> {
        let Some(brain) = &ctx.brain else {
            return Ok(ActionOutcome::fail("agent has no brain configured"));
        };

        let collection = extract_string_arg(&args, "collection")?;
        let query = extract_string_arg(&args, "query")?;
        let limit = extract_usize_arg_opt(&args, "limit", 5);
        let min_score = extract_f64_arg_opt(&args, "min_score");

        match brain
            .document_search(&collection, &query, limit, min_score)
            .await
        {
            Ok(hits) => Ok(ActionOutcome::ok(json!({
                "collection": collection,
                "results": hits,
            }))),
            Err(e) => Ok(ActionOutcome::fail(format!("{e:#}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::OllamaProvider;
    use std::sync::Arc;

    #[tokio::test]
    async fn no_brain_fails_before_any_lookup() {
        let ctx = ActionContext::new(Arc::new(OllamaProvider::new()), "t");
        let outcome = BrainSearchAction
            .execute(json!({"collection": "docs", "query": "q"}), &ctx)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("no brain"));
    }
}
