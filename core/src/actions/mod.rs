use serde_json::Value;

pub mod brain_search;
pub mod embedding;
pub mod image_analyze;
pub mod image_generate;
pub mod web_fetch;

pub use brain_search::BrainSearchAction;
pub use embedding::EmbeddingCreateAction;
pub use image_analyze::ImageAnalyzeAction;
pub use image_generate::ImageGenerateAction;
pub use web_fetch::WebFetchAction;

pub fn extract_string_arg(args: &Value, key: &str) -> anyhow::Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' parameter", key))
        .map(|s| s.to_string())
}

pub fn extract_string_arg_opt(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

pub fn extract_usize_arg_opt(args: &Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

pub fn extract_f64_arg_opt(args: &Value, key: &str) -> Option<f64> {
    args.get(key).and_then(|v| v.as_f64())
}
