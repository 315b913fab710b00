use crate::error::Error;
use crate::traits::{
    ActionSpec, ChatMessage, ChatOutcome, EmbeddingOptions, GenerateOptions, Provider, TextStream,
    ToolCall,
};
use crate::usage::UsageLog;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;

const DEFAULT_MODEL: &str = "llama3.2";
const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

#[derive(Debug, Serialize)]
struct ChatBody {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<WireOptions>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCallOut>>,
}

#[derive(Debug, Serialize)]
struct WireToolCallOut {
    function: WireFunctionOut,
}

#[derive(Debug, Serialize)]
struct WireFunctionOut {
    name: String,
    arguments: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: &'static str,
    function: WireToolFunction,
}

#[derive(Debug, Serialize)]
struct WireToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct WireOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    message: ReplyMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCallIn>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallIn {
    function: WireFunctionIn,
}

#[derive(Debug, Deserialize)]
struct WireFunctionIn {
    name: String,
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StreamReply {
    message: Option<StreamMessage>,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    content: Option<String>,
}

/// Local Ollama daemon. No credential; the generous timeout covers cold
/// model loads.
#[derive(Debug)]
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    usage: Option<Arc<UsageLog>>,
}

impl OllamaProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: "http://localhost:11434".to_string(),
            model: DEFAULT_MODEL.to_string(),
            usage: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_usage_log(mut self, usage: Arc<UsageLog>) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Ollama has no tool-result role, so runs of tool results are folded
    /// into a single user message ahead of the next turn.
    fn convert_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
        let mut result = Vec::new();
        let mut pending_results: Vec<String> = Vec::new();

        let flush = |pending: &mut Vec<String>, result: &mut Vec<WireMessage>| {
            if pending.is_empty() {
                return;
            }
            result.push(WireMessage {
                role: "user".to_string(),
                content: Some(format!("[Tool results]\n{}", pending.join("\n"))),
                tool_calls: None,
            });
            pending.clear();
        };

        for m in messages {
            if m.role == "tool" {
                let id = m.tool_call_id.as_deref().unwrap_or("unknown");
                pending_results.push(format!(
                    "<tool_result id=\"{id}\">\n{}\n</tool_result>",
                    m.content
                ));
                continue;
            }

            flush(&mut pending_results, &mut result);

            let tool_calls = m.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|tc| WireToolCallOut {
                        function: WireFunctionOut {
                            name: tc.name.clone(),
                            arguments: serde_json::from_str(&tc.arguments)
                                .unwrap_or(serde_json::Value::Null),
                        },
                    })
                    .collect()
            });

            result.push(WireMessage {
                role: m.role.clone(),
                content: if m.content.is_empty() {
                    None
                } else {
                    Some(m.content.clone())
                },
                tool_calls,
            });
        }

        flush(&mut pending_results, &mut result);
        result
    }

    fn convert_actions(actions: &[ActionSpec]) -> Vec<WireTool> {
        actions
            .iter()
            .map(|a| WireTool {
                r#type: "function",
                function: WireToolFunction {
                    name: a.name.clone(),
                    description: a.description.clone(),
                    parameters: a.parameters_schema.clone(),
                },
            })
            .collect()
    }

    fn body_for(
        &self,
        messages: &[ChatMessage],
        actions: &[ActionSpec],
        opts: &GenerateOptions,
        stream: bool,
    ) -> ChatBody {
        ChatBody {
            model: opts.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: Self::convert_messages(messages),
            tools: if actions.is_empty() {
                None
            } else {
                Some(Self::convert_actions(actions))
            },
            options: opts.temperature.map(|t| WireOptions { temperature: t }),
            stream,
        }
    }

    async fn post_chat(&self, body: &ChatBody) -> anyhow::Result<ChatReply> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::provider(format!("ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!("ollama {status}: {error_text}")));
        }

        let reply: ChatReply = response
            .json()
            .await
            .map_err(|e| Error::provider(format!("ollama returned malformed response: {e}")))?;

        if let Some(log) = &self.usage {
            let total = reply.prompt_eval_count.unwrap_or(0) + reply.eval_count.unwrap_or(0);
            log.record("ollama", total);
        }
        Ok(reply)
    }

    fn parse_stream_line(line: &str) -> Option<anyhow::Result<String>> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let reply: StreamReply = serde_json::from_str(line).ok()?;
        let content = reply.message?.content?;
        if content.is_empty() {
            None
        } else {
            Some(Ok(content))
        }
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> anyhow::Result<String> {
        self.chat(&[ChatMessage::user(prompt)], opts).await
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> anyhow::Result<TextStream> {
        let body = self.body_for(&[ChatMessage::user(prompt)], &[], opts, true);

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::provider(format!("ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!("ollama {status}: {error_text}")));
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
                            .send(Err(Error::provider(format!("ollama stream failed: {e}"))))
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
        let reply = self.post_chat(&self.body_for(messages, &[], opts, false)).await?;
        reply
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::provider("ollama returned an empty completion"))
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        actions: &[ActionSpec],
        opts: &GenerateOptions,
    ) -> anyhow::Result<ChatOutcome> {
        let reply = self
            .post_chat(&self.body_for(messages, actions, opts, false))
            .await?;

        let tool_calls: Vec<ToolCall> = reply
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: format!("ollama_{}", uuid::Uuid::new_v4()),
                name: tc.function.name,
                arguments: serde_json::to_string(&tc.function.arguments).unwrap_or_default(),
            })
            .collect();

        let text = reply.message.content.filter(|c| !c.trim().is_empty());
        if text.is_none() && tool_calls.is_empty() {
            return Err(Error::provider(
                "ollama returned neither text nor tool calls",
            ));
        }

        Ok(ChatOutcome { text, tool_calls })
    }

    async fn embeddings(
        &self,
        input: &[String],
        opts: &EmbeddingOptions,
    ) -> anyhow::Result<Vec<Vec<f32>>> {
        #[derive(Serialize)]
        struct EmbedBody<'a> {
            model: String,
            input: &'a [String],
        }
        #[derive(Deserialize)]
        struct EmbedReply {
            embeddings: Vec<Vec<f32>>,
        }

        let body = EmbedBody {
            model: opts
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            input,
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::provider(format!("ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!("ollama {status}: {error_text}")));
        }

        let reply: EmbedReply = response
            .json()
            .await
            .map_err(|e| Error::provider(format!("ollama returned malformed response: {e}")))?;
        Ok(reply.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_results_fold_into_one_user_message() {
        let messages = vec![
            ChatMessage::user("fetch both"),
            ChatMessage::assistant_with_tool_calls(
                "",
                vec![ToolCall {
                    id: "a".into(),
                    name: "web_fetch".into(),
                    arguments: "{}".into(),
                }],
            ),
            ChatMessage::tool_result("a".into(), "first"),
            ChatMessage::tool_result("b".into(), "second"),
        ];

        let wire = OllamaProvider::convert_messages(&messages);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[2].role, "user");
        let folded = wire[2].content.as_deref().unwrap();
        assert!(folded.contains("first"));
        assert!(folded.contains("second"));
    }

    #[test]
    fn trailing_tool_results_are_flushed() {
        let messages = vec![ChatMessage::tool_result("x".into(), "only")];
        let wire = OllamaProvider::convert_messages(&messages);
        assert_eq!(wire.len(), 1);
        assert!(wire[0].content.as_deref().unwrap().contains("only"));
    }

    #[test]
    fn stream_line_parsing() {
        let chunk =
            OllamaProvider::parse_stream_line(r#"{"message":{"content":"hi"},"done":false}"#)
                .unwrap()
                .unwrap();
        assert_eq!(chunk, "hi");
        assert!(OllamaProvider::parse_stream_line("").is_none());
    }
}
