use crate::error::Error;
use crate::providers::{AnthropicProvider, OllamaProvider, OpenAIProvider};
use crate::store::Store;
use crate::traits::Provider;
use crate::usage::UsageLog;
use anyhow::Result;
use std::sync::Arc;

pub const AVAILABLE_PROVIDERS: &[(&str, &str)] = &[
    ("openai", "OpenAI chat, vision, images, audio, embeddings"),
    ("anthropic", "Anthropic Claude chat, tools and vision"),
    ("ollama", "Local Ollama daemon (chat, tools, embeddings)"),
];

/// Name-to-constructor dispatch. The store supplies credentials (env var
/// first) and per-provider default models; `{NAME}_BASE_URL` overrides
/// the endpoint.
pub fn create_provider(
    name: &str,
    store: &Store,
    usage: Option<Arc<UsageLog>>,
) -> Result<Arc<dyn Provider>> {
    let base_url = std::env::var(format!("{}_BASE_URL", name.to_uppercase())).ok();

    match name.to_lowercase().as_str() {
        "openai" => {
            let api_key = store.api_key("openai").ok_or_else(|| {
                Error::Config(
                    "no OpenAI API key; set OPENAI_API_KEY or run 'aictl config --provider openai --key ...'"
                        .into(),
                )
            })?;
            let mut provider = OpenAIProvider::new(api_key);
            if let Some(model) = store.default_model("openai") {
                provider = provider.with_model(model);
            }
            if let Some(url) = base_url {
                provider = provider.with_base_url(url);
            }
            if let Some(usage) = usage {
                provider = provider.with_usage_log(usage);
            }
            Ok(Arc::new(provider))
        }
        "anthropic" => {
            let api_key = store.api_key("anthropic").ok_or_else(|| {
                Error::Config(
                    "no Anthropic API key; set ANTHROPIC_API_KEY or run 'aictl config --provider anthropic --key ...'"
                        .into(),
                )
            })?;
            let mut provider = AnthropicProvider::new(api_key);
            if let Some(model) = store.default_model("anthropic") {
                provider = provider.with_model(model);
            }
            if let Some(url) = base_url {
                provider = provider.with_base_url(url);
            }
            if let Some(usage) = usage {
                provider = provider.with_usage_log(usage);
            }
            Ok(Arc::new(provider))
        }
        "ollama" => {
            let mut provider = OllamaProvider::new();
            if let Some(model) = store.default_model("ollama") {
                provider = provider.with_model(model);
            }
            if let Some(url) = base_url {
                provider = provider.with_base_url(url);
            }
            if let Some(usage) = usage {
                provider = provider.with_usage_log(usage);
            }
            Ok(Arc::new(provider))
        }
        other => Err(Error::config(format!(
            "unknown provider '{other}'; available: openai, anthropic, ollama"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn unknown_provider_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open_at(tmp.path().join("config.json")).unwrap();
        let err = create_provider("mystery", &store, None).unwrap_err();
        assert!(format!("{err}").contains("unknown provider"));
    }

    #[test]
    fn ollama_needs_no_credential() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open_at(tmp.path().join("config.json")).unwrap();
        let provider = create_provider("ollama", &store, None).unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn openai_uses_stored_key() {
        let tmp = TempDir::new().unwrap();
        let mut store = Store::open_at(tmp.path().join("config.json")).unwrap();
        store.set_api_key("openai", "sk-stored").unwrap();
        let provider = create_provider("openai", &store, None).unwrap();
        assert_eq!(provider.name(), "openai");
    }
}
