use crate::actions::extract_string_arg;
use crate::agent::ActionContext;
use crate::traits::{Action, ActionOutcome};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const DEFAULT_MAX_BYTES: usize = 150_000;
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Fetch a URL over HTTP(S) and return the text content, truncated to a
/// fixed byte budget so a large page cannot flood the model context.
pub struct WebFetchAction {
    client: reqwest::Client,
    max_bytes: usize,
}

impl WebFetchAction {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_BYTES, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_limits(max_bytes: usize, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, max_bytes }
    }
}

impl Default for WebFetchAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for WebFetchAction {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL over HTTP(S) and return the text content (truncated)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "HTTP or HTTPS URL"},
                "headers": {"type": "object", "description": "Optional request headers"}
            },
            "required": ["url"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ActionContext,
    ) -> anyhow::Result<ActionOutcome> {
        let url = extract_string_arg(&args, "url")?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Ok(ActionOutcome::fail(
                "url must start with http:// or https://",
            ));
        }

        let mut request = self.client.get(&url);
        if let Some(headers) = args.get("headers").and_then(|v| v.as_object()) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, value);
                }
            }
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return Ok(ActionOutcome::fail(format!("fetch failed: {e}"))),
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if !status.is_success() {
            return Ok(ActionOutcome::fail(format!("{url} returned {status}")));
        }

        let body = response.text().await.unwrap_or_default();
        let total = body.len();
        let truncated = total > self.max_bytes;
        let text = if truncated {
            let mut end = self.max_bytes;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!(
                "{}\n\n[... truncated at {} bytes, total response was {total} bytes]",
                &body[..end],
                self.max_bytes
            )
        } else {
            body
        };

        let mut output = json!({
            "url": url,
            "status_code": status.as_u16(),
            "content_type": content_type,
            "text": text,
        });
        if truncated {
            output["truncated"] = json!(true);
        }
        Ok(ActionOutcome::ok(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ActionContext;
    use crate::providers::OllamaProvider;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx() -> ActionContext {
        ActionContext::new(Arc::new(OllamaProvider::new()), "t")
    }

    #[test]
    fn schema_requires_url() {
        let schema = WebFetchAction::new().parameters_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&serde_json::json!("url")));
    }

    #[tokio::test]
    async fn rejects_non_http_scheme() {
        let outcome = WebFetchAction::new()
            .execute(serde_json::json!({"url": "ftp://example.com"}), &ctx())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("http"));
    }

    #[tokio::test]
    async fn fetches_and_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello body"))
            .mount(&server)
            .await;

        let outcome = WebFetchAction::new()
            .execute(
                serde_json::json!({"url": format!("{}/doc", server.uri())}),
                &ctx(),
            )
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.output["status_code"], 200);
        assert_eq!(outcome.output["text"], "hello body");
    }

    #[tokio::test]
    async fn oversized_body_is_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_string("A".repeat(2000)))
            .mount(&server)
            .await;

        let action = WebFetchAction::with_limits(500, Duration::from_secs(5));
        let outcome = action
            .execute(
                serde_json::json!({"url": format!("{}/big", server.uri())}),
                &ctx(),
            )
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.output["truncated"], true);
        let text = outcome.output["text"].as_str().unwrap();
        assert!(text.contains("truncated at 500 bytes"));
    }

    #[tokio::test]
    async fn error_status_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = WebFetchAction::new()
            .execute(
                serde_json::json!({"url": format!("{}/gone", server.uri())}),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(!outcome.success);
    }
}
