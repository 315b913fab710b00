use crate::agent::ActionContext;
use crate::traits::{Action, ActionOutcome, ActionSpec};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

pub struct ActionRegistry {
    actions: Mutex<Vec<Arc<dyn Action>>>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
        }
    }

    /// Registry pre-loaded with every built-in action.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(crate::actions::WebFetchAction::new()));
        registry.register(Arc::new(crate::actions::ImageGenerateAction));
        registry.register(Arc::new(crate::actions::ImageAnalyzeAction));
        registry.register(Arc::new(crate::actions::EmbeddingCreateAction));
        registry.register(Arc::new(crate::actions::BrainSearchAction));
        registry
    }

    pub fn register(&self, action: Arc<dyn Action>) {
        self.actions.lock().unwrap().push(action);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .any(|a| a.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.name().to_string())
            .collect()
    }

    pub fn specs(&self) -> Vec<ActionSpec> {
        self.actions.lock().unwrap().iter().map(|a| a.spec()).collect()
    }

    /// Specs for the subset an agent has enabled, in registration order.
    pub fn enabled_specs(&self, enabled: &BTreeSet<String>) -> Vec<ActionSpec> {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .filter(|a| enabled.contains(a.name()))
            .map(|a| a.spec())
            .collect()
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.name() == name)
            .cloned()
    }

    /// Resolve and run one action. Required arguments are checked against
    /// the declared schema first, so a malformed call never reaches the
    /// action's side effect.
    pub async fn invoke(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: &ActionContext,
    ) -> ActionOutcome {
        let Some(action) = self.get(name) else {
            return ActionOutcome::fail(format!("unknown action '{name}'"));
        };

        if let Err(missing) = check_required(&action.parameters_schema(), &args) {
            return ActionOutcome::fail(format!(
                "missing required argument '{missing}' for action '{name}'"
            ));
        }

        match action.execute(args, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => ActionOutcome::fail(format!("action '{name}' failed: {e:#}")),
        }
    }
}

/// Verify every key in the schema's `required` list is present in the
/// argument object. Returns the first missing key.
fn check_required(schema: &serde_json::Value, args: &serde_json::Value) -> Result<(), String> {
    let Some(required) = schema.get("required").and_then(|r| r.as_array()) else {
        return Ok(());
    };
    for key in required.iter().filter_map(|k| k.as_str()) {
        let present = args.get(key).is_some_and(|v| !v.is_null());
        if !present {
            return Err(key.to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Action;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAction {
        invocations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Action for CountingAction {
        fn name(&self) -> &str {
            "counting"
        }

        fn description(&self) -> &str {
            "Counts how many times it actually runs"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {
                    "target": {"type": "string"}
                },
                "required": ["target"]
            })
        }

        async fn execute(
            &self,
            _args: serde_json::Value,
            _ctx: &ActionContext,
        ) -> anyhow::Result<ActionOutcome> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(ActionOutcome::ok(json!({"done": true})))
        }
    }

    fn test_ctx() -> ActionContext {
        ActionContext::new(
            Arc::new(crate::providers::OllamaProvider::new()),
            "test-agent",
        )
    }

    #[tokio::test]
    async fn missing_required_argument_skips_side_effect() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let registry = ActionRegistry::new();
        registry.register(Arc::new(CountingAction {
            invocations: invocations.clone(),
        }));

        let outcome = registry.invoke("counting", json!({}), &test_ctx()).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("target"));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn null_argument_counts_as_missing() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let registry = ActionRegistry::new();
        registry.register(Arc::new(CountingAction {
            invocations: invocations.clone(),
        }));

        let outcome = registry
            .invoke("counting", json!({"target": null}), &test_ctx())
            .await;
        assert!(!outcome.success);
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn valid_arguments_reach_the_action() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let registry = ActionRegistry::new();
        registry.register(Arc::new(CountingAction {
            invocations: invocations.clone(),
        }));

        let outcome = registry
            .invoke("counting", json!({"target": "x"}), &test_ctx())
            .await;
        assert!(outcome.success);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_action_fails_cleanly() {
        let registry = ActionRegistry::new();
        let outcome = registry.invoke("nope", json!({}), &test_ctx()).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("unknown action"));
    }

    #[test]
    fn builtins_are_registered() {
        let registry = ActionRegistry::with_builtins();
        for name in [
            "web_fetch",
            "generate_image",
            "analyze_image_urls",
            "create_embedding",
            "brain_document_search",
        ] {
            assert!(registry.contains(name), "missing builtin {name}");
        }
    }
}
