use crate::actions::{extract_f64_arg_opt, extract_string_arg, extract_string_arg_opt};
use crate::agent::ActionContext;
use crate::traits::{Action, ActionOutcome, GenerateOptions};
use async_trait::async_trait;
use serde_json::json;

/// Analyze one or more image URLs with a vision-capable model.
pub struct ImageAnalyzeAction;

#[async_trait]
impl Action for ImageAnalyzeAction {
    fn name(&self) -> &str {
        "analyze_image_urls"
    }

    fn description(&self) -> &str {
        "Analyze one or more image URLs with a vision-capable model."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {"type": "string"},
                "image_urls": {
                    "type": "array",
                    "items": {"type": "string"},
                    "minItems": 1
                },
                "model": {"type": "string"},
                "temperature": {"type": "number"},
                "max_tokens": {"type": "integer"}
            },
            "required": ["prompt", "image_urls"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ActionContext,
    ) -> anyhow::Result<ActionOutcome> {
        let prompt = extract_string_arg(&args, "prompt")?;
        let urls: Vec<String> = args
            .get("image_urls")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if urls.is_empty() {
            return Ok(ActionOutcome::fail("image_urls must contain at least one URL"));
        }

        let opts = GenerateOptions {
            model: extract_string_arg_opt(&args, "model"),
            temperature: extract_f64_arg_opt(&args, "temperature"),
            max_tokens: args
                .get("max_tokens")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32),
        };

        match ctx.provider.vision(&prompt, &urls, &opts).await {
            Ok(text) => Ok(ActionOutcome::ok(json!({"text": text}))),
            Err(e) => Ok(ActionOutcome::fail(format!("{e:#}"))),
        }
    }
}
