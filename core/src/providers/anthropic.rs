use crate::error::Error;
use crate::traits::{
    ActionSpec, ChatMessage, ChatOutcome, GenerateOptions, Provider, TextStream, ToolCall,
};
use crate::usage::UsageLog;
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;

const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Serialize)]
struct MessagesBody {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    content: Vec<ContentBlock>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    usage: Option<Arc<UsageLog>>,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            usage: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_usage_log(mut self, usage: Arc<UsageLog>) -> Self {
        self.usage = Some(usage);
        self
    }

    fn record_usage(&self, usage: Option<&WireUsage>) {
        if let (Some(log), Some(u)) = (&self.usage, usage) {
            log.record("anthropic", u.input_tokens + u.output_tokens);
        }
    }

    /// The Messages API takes the system prompt out of band and only
    /// accepts alternating user/assistant turns; tool results ride as
    /// `tool_result` blocks on a user message.
    fn convert_messages(messages: &[ChatMessage]) -> anyhow::Result<(Option<String>, Vec<Value>)> {
        let system = messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.clone());

        let mut converted = Vec::new();
        for m in messages {
            match m.role.as_str() {
                "system" => {}
                "tool" => {
                    let id = m.tool_call_id.as_deref().unwrap_or("unknown");
                    converted.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": id,
                            "content": m.content,
                        }],
                    }));
                }
                "assistant" if m.tool_calls.is_some() => {
                    let mut blocks = Vec::new();
                    if !m.content.trim().is_empty() {
                        blocks.push(json!({"type": "text", "text": m.content}));
                    }
                    for tc in m.tool_calls.as_deref().unwrap_or_default() {
                        let input: Value =
                            serde_json::from_str(&tc.arguments).unwrap_or(Value::Null);
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": input,
                        }));
                    }
                    converted.push(json!({"role": "assistant", "content": blocks}));
                }
                _ if !m.images.is_empty() => {
                    let mut blocks = vec![json!({"type": "text", "text": m.content})];
                    for image in &m.images {
                        blocks.push(image_block(image)?);
                    }
                    converted.push(json!({"role": m.role, "content": blocks}));
                }
                _ => {
                    converted.push(json!({"role": m.role, "content": m.content}));
                }
            }
        }
        Ok((system, converted))
    }

    fn convert_actions(actions: &[ActionSpec]) -> Vec<Value> {
        actions
            .iter()
            .map(|a| {
                json!({
                    "name": a.name,
                    "description": a.description,
                    "input_schema": a.parameters_schema,
                })
            })
            .collect()
    }

    async fn post_messages(&self, body: &MessagesBody) -> anyhow::Result<MessagesReply> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::provider(format!("anthropic request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!("anthropic {status}: {error_text}")));
        }

        let reply: MessagesReply = response
            .json()
            .await
            .map_err(|e| Error::provider(format!("anthropic returned malformed response: {e}")))?;
        self.record_usage(reply.usage.as_ref());
        Ok(reply)
    }

    fn body_for(
        &self,
        messages: &[ChatMessage],
        actions: &[ActionSpec],
        opts: &GenerateOptions,
        stream: bool,
    ) -> anyhow::Result<MessagesBody> {
        let (system, converted) = Self::convert_messages(messages)?;
        Ok(MessagesBody {
            model: opts.model.clone().unwrap_or_else(|| self.model.clone()),
            max_tokens: opts.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: opts.temperature,
            system,
            messages: converted,
            tools: if actions.is_empty() {
                None
            } else {
                Some(Self::convert_actions(actions))
            },
            stream: stream.then_some(true),
        })
    }

    fn parse_stream_line(line: &str) -> Option<anyhow::Result<String>> {
        let data = line.trim().strip_prefix("data: ")?;

        #[derive(Deserialize)]
        struct StreamEvent {
            r#type: String,
            delta: Option<StreamDelta>,
        }
        #[derive(Deserialize)]
        struct StreamDelta {
            text: Option<String>,
        }

        let event: StreamEvent = serde_json::from_str(data).ok()?;
        if event.r#type != "content_block_delta" {
            return None;
        }
        let text = event.delta?.text?;
        if text.is_empty() { None } else { Some(Ok(text)) }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> anyhow::Result<String> {
        self.chat(&[ChatMessage::user(prompt)], opts).await
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> anyhow::Result<TextStream> {
        let body = self.body_for(&[ChatMessage::user(prompt)], &[], opts, true)?;

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::provider(format!("anthropic request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!("anthropic {status}: {error_text}")));
        }

        let (tx, rx) = tokio::sync::mpsc::channel::<anyhow::Result<String>>(256);

        tokio::spawn(async move {
            use futures_util::StreamExt as _;
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = stream.next().await {
                match chunk_result {
                    Ok(chunk) => {
                        if let Ok(text) = std::str::from_utf8(&chunk) {
                            buffer.push_str(text);
                            while let Some(pos) = buffer.find('\n') {
                                let line = buffer[..pos].to_string();
                                buffer = buffer[pos + 1..].to_string();
                                if let Some(item) = Self::parse_stream_line(&line)
                                    && tx.send(item).await.is_err()
                                {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(Error::provider(format!("anthropic stream failed: {e}"))))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        opts: &GenerateOptions,
    ) -> anyhow::Result<String> {
        let body = self.body_for(messages, &[], opts, false)?;
        let reply = self.post_messages(&body).await?;

        let text: String = reply
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if text.is_empty() {
            return Err(Error::provider("anthropic returned an empty completion"));
        }
        Ok(text)
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        actions: &[ActionSpec],
        opts: &GenerateOptions,
    ) -> anyhow::Result<ChatOutcome> {
        let body = self.body_for(messages, actions, opts, false)?;
        let reply = self.post_messages(&body).await?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in reply.content {
            match block {
                ContentBlock::Text { text: t } => text.push_str(&t),
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall {
                        id,
                        name,
                        arguments: serde_json::to_string(&input).unwrap_or_default(),
                    });
                }
                ContentBlock::Other => {}
            }
        }

        if text.trim().is_empty() && tool_calls.is_empty() {
            return Err(Error::provider(
                "anthropic returned neither text nor tool calls",
            ));
        }

        Ok(ChatOutcome {
            text: if text.trim().is_empty() { None } else { Some(text) },
            tool_calls,
        })
    }

    async fn vision(
        &self,
        prompt: &str,
        images: &[String],
        opts: &GenerateOptions,
    ) -> anyhow::Result<String> {
        let message = ChatMessage::user_with_images(prompt, images.to_vec());
        self.chat(&[message], opts).await
    }
}

/// Local files are inlined as base64 blocks; anything else is passed as
/// a URL source.
fn image_block(image: &str) -> anyhow::Result<Value> {
    let path = Path::new(image);
    if !path.exists() {
        return Ok(json!({
            "type": "image",
            "source": {"type": "url", "url": image},
        }));
    }
    let bytes = std::fs::read(path)
        .map_err(|e| Error::provider(format!("cannot read image {}: {e}", path.display())))?;
    let media_type = match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    };
    Ok(json!({
        "type": "image",
        "source": {
            "type": "base64",
            "media_type": media_type,
            "data": base64::engine::general_purpose::STANDARD.encode(bytes),
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn tool_use_blocks_become_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "text", "text": "looking that up"},
                    {"type": "tool_use", "id": "toolu_1", "name": "web_fetch",
                     "input": {"url": "https://example.com"}}
                ],
                "usage": {"input_tokens": 12, "output_tokens": 4}
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("sk-ant").with_base_url(server.uri());
        let outcome = provider
            .chat_with_tools(&[ChatMessage::user("fetch it")], &[], &GenerateOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.text.as_deref(), Some("looking that up"));
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].name, "web_fetch");
        assert!(outcome.tool_calls[0].arguments.contains("example.com"));
    }

    #[test]
    fn system_message_is_lifted_out() {
        let (system, converted) = AnthropicProvider::convert_messages(&[
            ChatMessage::system("be brief"),
            ChatMessage::user("hello"),
        ])
        .unwrap();
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0]["role"], "user");
    }

    #[test]
    fn tool_results_ride_on_user_messages() {
        let (_, converted) = AnthropicProvider::convert_messages(&[ChatMessage::tool_result(
            "toolu_1".into(),
            "{\"ok\":true}",
        )])
        .unwrap();
        assert_eq!(converted[0]["role"], "user");
        assert_eq!(converted[0]["content"][0]["type"], "tool_result");
        assert_eq!(converted[0]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn stream_line_parsing() {
        let chunk = AnthropicProvider::parse_stream_line(
            r#"data: {"type":"content_block_delta","delta":{"type":"text_delta","text":"hi"}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(chunk, "hi");
        assert!(
            AnthropicProvider::parse_stream_line(r#"data: {"type":"message_stop"}"#).is_none()
        );
    }
}
