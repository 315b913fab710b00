use crate::actions::{extract_string_arg, extract_string_arg_opt};
use crate::agent::ActionContext;
use crate::traits::{Action, ActionOutcome, ImageRequest};
use async_trait::async_trait;
use serde_json::json;

/// Generate an image through the active provider and return its URL (or
/// base64 payload, depending on the backend).
pub struct ImageGenerateAction;

#[async_trait]
impl Action for ImageGenerateAction {
    fn name(&self) -> &str {
        "generate_image"
    }

    fn description(&self) -> &str {
        "Generate an image from a prompt and return the image URL."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {"type": "string"},
                "model": {"type": "string"},
                "size": {"type": "string", "enum": ["256x256", "512x512", "1024x1024"]},
                "quality": {"type": "string", "enum": ["standard", "hd"]},
                "style": {"type": "string", "enum": ["vivid", "natural"]}
            },
            "required": ["prompt"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ActionContext,
    ) -> anyhow::Result<ActionOutcome> {
        let request = ImageRequest {
            prompt: extract_string_arg(&args, "prompt")?,
            model: extract_string_arg_opt(&args, "model"),
            size: extract_string_arg_opt(&args, "size"),
            quality: extract_string_arg_opt(&args, "quality"),
            style: extract_string_arg_opt(&args, "style"),
        };

        match ctx.provider.generate_image(&request).await {
            Ok(image) => Ok(ActionOutcome::ok(serde_json::to_value(image)?)),
            Err(e) => Ok(ActionOutcome::fail(format!("{e:#}"))),
        }
    }
}
