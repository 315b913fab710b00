use crate::error::Error;
use crate::traits::{
    ActionSpec, ChatMessage, ChatOutcome, EmbeddingOptions, GenerateOptions, GeneratedImage,
    ImageRequest, Provider, SpeechOptions, TextStream, ToolCall, Transcript, TranscribeOptions,
};
use crate::usage::UsageLog;
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
const DEFAULT_AUDIO_MODEL: &str = "whisper-1";
const DEFAULT_SPEECH_MODEL: &str = "tts-1";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Serialize)]
struct ChatBody {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCallOut>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolCallOut {
    id: String,
    r#type: &'static str,
    function: WireFunctionOut,
}

#[derive(Debug, Serialize)]
struct WireFunctionOut {
    name: String,
    arguments: String,
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
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    choices: Vec<ReplyChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ReplyChoice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCallIn>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallIn {
    id: String,
    function: WireFunctionIn,
}

#[derive(Debug, Deserialize)]
struct WireFunctionIn {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct StreamReply {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug)]
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    usage: Option<Arc<UsageLog>>,
}

impl OpenAIProvider {
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
            base_url: "https://api.openai.com/v1".to_string(),
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

    fn model_for(&self, opts: &GenerateOptions) -> String {
        opts.model.clone().unwrap_or_else(|| self.model.clone())
    }

    fn record_usage(&self, usage: Option<&WireUsage>) {
        if let (Some(log), Some(u)) = (&self.usage, usage) {
            log.record("openai", u.prompt_tokens + u.completion_tokens);
        }
    }

    fn convert_messages(messages: &[ChatMessage]) -> anyhow::Result<Vec<WireMessage>> {
        messages.iter().map(Self::convert_message).collect()
    }

    fn convert_message(m: &ChatMessage) -> anyhow::Result<WireMessage> {
        let tool_calls = m.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|tc| WireToolCallOut {
                    id: tc.id.clone(),
                    r#type: "function",
                    function: WireFunctionOut {
                        name: tc.name.clone(),
                        arguments: tc.arguments.clone(),
                    },
                })
                .collect()
        });

        let content = if m.images.is_empty() {
            Some(Value::String(m.content.clone()))
        } else {
            let mut parts = vec![json!({"type": "text", "text": m.content})];
            for image in &m.images {
                parts.push(json!({
                    "type": "image_url",
                    "image_url": {"url": image_source_url(image)?}
                }));
            }
            Some(Value::Array(parts))
        };

        Ok(WireMessage {
            role: m.role.clone(),
            content,
            tool_calls,
            tool_call_id: m.tool_call_id.clone(),
        })
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

    async fn post_chat(&self, body: &ChatBody) -> anyhow::Result<ChatReply> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::provider(format!("openai request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!("openai {status}: {error_text}")));
        }

        let reply: ChatReply = response
            .json()
            .await
            .map_err(|e| Error::provider(format!("openai returned malformed response: {e}")))?;
        self.record_usage(reply.usage.as_ref());
        Ok(reply)
    }

    async fn complete_text(
        &self,
        messages: Vec<WireMessage>,
        opts: &GenerateOptions,
    ) -> anyhow::Result<String> {
        let body = ChatBody {
            model: self.model_for(opts),
            messages,
            tools: None,
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
            stream: None,
        };
        let reply = self.post_chat(&body).await?;
        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider("openai returned no choices"))?;
        choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::provider("openai returned an empty completion"))
    }

    fn parse_stream_line(line: &str) -> Option<anyhow::Result<String>> {
        let line = line.trim();
        let data = line.strip_prefix("data: ")?;
        if data == "[DONE]" {
            return None;
        }
        let reply: StreamReply = serde_json::from_str(data).ok()?;
        let chunk = reply.choices.first()?.delta.content.clone()?;
        if chunk.is_empty() {
            None
        } else {
            Some(Ok(chunk))
        }
    }

    async fn transcribe_endpoint(
        &self,
        endpoint: &str,
        audio: &Path,
        opts: &TranscribeOptions,
        include_language: bool,
    ) -> anyhow::Result<Transcript> {
        let bytes = tokio::fs::read(audio)
            .await
            .map_err(|e| Error::provider(format!("cannot read {}: {e}", audio.display())))?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            )
            .text(
                "model",
                opts.model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_AUDIO_MODEL.to_string()),
            )
            .text("response_format", "json");
        if include_language && let Some(language) = &opts.language {
            form = form.text("language", language.clone());
        }
        if let Some(prompt) = &opts.prompt {
            form = form.text("prompt", prompt.clone());
        }

        let response = self
            .client
            .post(format!("{}/audio/{endpoint}", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::provider(format!("openai request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!("openai {status}: {error_text}")));
        }

        response
            .json::<Transcript>()
            .await
            .map_err(|e| Error::provider(format!("openai returned malformed response: {e}")))
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> anyhow::Result<String> {
        let messages = Self::convert_messages(&[ChatMessage::user(prompt)])?;
        self.complete_text(messages, opts).await
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> anyhow::Result<TextStream> {
        let body = ChatBody {
            model: self.model_for(opts),
            messages: Self::convert_messages(&[ChatMessage::user(prompt)])?,
            tools: None,
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
            stream: Some(true),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::provider(format!("openai request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!("openai {status}: {error_text}")));
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
                            .send(Err(Error::provider(format!("openai stream failed: {e}"))))
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
        self.complete_text(Self::convert_messages(messages)?, opts)
            .await
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        actions: &[ActionSpec],
        opts: &GenerateOptions,
    ) -> anyhow::Result<ChatOutcome> {
        let body = ChatBody {
            model: self.model_for(opts),
            messages: Self::convert_messages(messages)?,
            tools: if actions.is_empty() {
                None
            } else {
                Some(Self::convert_actions(actions))
            },
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
            stream: None,
        };

        let reply = self.post_chat(&body).await?;
        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider("openai returned no choices"))?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect();

        let text = choice.message.content.filter(|c| !c.trim().is_empty());
        if text.is_none() && tool_calls.is_empty() {
            return Err(Error::provider(
                "openai returned neither text nor tool calls",
            ));
        }

        Ok(ChatOutcome { text, tool_calls })
    }

    async fn vision(
        &self,
        prompt: &str,
        images: &[String],
        opts: &GenerateOptions,
    ) -> anyhow::Result<String> {
        let message = ChatMessage::user_with_images(prompt, images.to_vec());
        self.complete_text(Self::convert_messages(&[message])?, opts)
            .await
    }

    async fn generate_image(&self, request: &ImageRequest) -> anyhow::Result<GeneratedImage> {
        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(DEFAULT_IMAGE_MODEL),
            "prompt": request.prompt,
            "n": 1,
        });
        if let Some(size) = &request.size {
            body["size"] = json!(size);
        }
        if let Some(quality) = &request.quality {
            body["quality"] = json!(quality);
        }
        if let Some(style) = &request.style {
            body["style"] = json!(style);
        }

        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::provider(format!("openai request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!("openai {status}: {error_text}")));
        }

        #[derive(Deserialize)]
        struct ImageReply {
            data: Vec<ImageDatum>,
        }
        #[derive(Deserialize)]
        struct ImageDatum {
            url: Option<String>,
            b64_json: Option<String>,
            revised_prompt: Option<String>,
        }

        let reply: ImageReply = response
            .json()
            .await
            .map_err(|e| Error::provider(format!("openai returned malformed response: {e}")))?;
        let datum = reply
            .data
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider("openai returned no image data"))?;

        Ok(GeneratedImage {
            url: datum.url,
            b64: datum.b64_json,
            revised_prompt: datum.revised_prompt,
        })
    }

    async fn transcribe(
        &self,
        audio: &Path,
        opts: &TranscribeOptions,
    ) -> anyhow::Result<Transcript> {
        self.transcribe_endpoint("transcriptions", audio, opts, true)
            .await
    }

    async fn translate(
        &self,
        audio: &Path,
        opts: &TranscribeOptions,
    ) -> anyhow::Result<Transcript> {
        // The translations endpoint rejects a language parameter.
        self.transcribe_endpoint("translations", audio, opts, false)
            .await
    }

    async fn text_to_speech(
        &self,
        text: &str,
        out: &Path,
        opts: &SpeechOptions,
    ) -> anyhow::Result<()> {
        let body = json!({
            "model": opts.model.as_deref().unwrap_or(DEFAULT_SPEECH_MODEL),
            "input": text,
            "voice": opts.voice.as_deref().unwrap_or("alloy"),
            "speed": opts.speed.unwrap_or(1.0),
        });

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::provider(format!("openai request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!("openai {status}: {error_text}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::provider(format!("openai stream failed: {e}")))?;
        tokio::fs::write(out, &bytes)
            .await
            .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", out.display()))?;
        Ok(())
    }

    async fn embeddings(
        &self,
        input: &[String],
        opts: &EmbeddingOptions,
    ) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut body = json!({
            "model": opts.model.as_deref().unwrap_or(DEFAULT_EMBEDDING_MODEL),
            "input": input,
        });
        if let Some(dimensions) = opts.dimensions {
            body["dimensions"] = json!(dimensions);
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::provider(format!("openai request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!("openai {status}: {error_text}")));
        }

        #[derive(Deserialize)]
        struct EmbeddingReply {
            data: Vec<EmbeddingDatum>,
            usage: Option<WireUsage>,
        }
        #[derive(Deserialize)]
        struct EmbeddingDatum {
            embedding: Vec<f32>,
        }

        let reply: EmbeddingReply = response
            .json()
            .await
            .map_err(|e| Error::provider(format!("openai returned malformed response: {e}")))?;
        self.record_usage(reply.usage.as_ref());
        Ok(reply.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// A local file becomes a base64 data URL; anything else passes through
/// as a remote URL.
fn image_source_url(image: &str) -> anyhow::Result<String> {
    let path = Path::new(image);
    if !path.exists() {
        return Ok(image.to_string());
    }
    let bytes = std::fs::read(path)
        .map_err(|e| Error::provider(format!("cannot read image {}: {e}", path.display())))?;
    let mime = match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{mime};base64,{encoded}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> OpenAIProvider {
        OpenAIProvider::new("sk-test").with_base_url(server.uri())
    }

    #[tokio::test]
    async fn chat_with_tools_parses_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {
                                "name": "web_fetch",
                                "arguments": "{\"url\":\"https://example.com\"}"
                            }
                        }]
                    }
                }],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5}
            })))
            .mount(&server)
            .await;

        let outcome = provider_for(&server)
            .chat_with_tools(&[ChatMessage::user("fetch it")], &[], &GenerateOptions::default())
            .await
            .unwrap();

        assert!(outcome.has_tool_calls());
        assert_eq!(outcome.tool_calls[0].name, "web_fetch");
        assert_eq!(outcome.tool_calls[0].id, "call_1");
    }

    #[tokio::test]
    async fn error_status_surfaces_backend_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .generate("hi", &GenerateOptions::default())
            .await
            .unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("provider error"), "got: {msg}");
        assert!(msg.contains("invalid api key"), "got: {msg}");
    }

    #[tokio::test]
    async fn generate_returns_completion_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "hello there"}}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 2}
            })))
            .mount(&server)
            .await;

        let text = provider_for(&server)
            .generate("hi", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "hello there");
    }

    #[test]
    fn stream_line_parsing() {
        assert!(OpenAIProvider::parse_stream_line("data: [DONE]").is_none());
        assert!(OpenAIProvider::parse_stream_line("").is_none());
        let chunk = OpenAIProvider::parse_stream_line(
            r#"data: {"choices":[{"delta":{"content":"hi"}}]}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(chunk, "hi");
    }

    #[test]
    fn remote_image_url_passes_through() {
        let url = image_source_url("https://example.com/cat.png").unwrap();
        assert_eq!(url, "https://example.com/cat.png");
    }
}
