use crate::error::Error;
use crate::traits::ActionSpec;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Image attachments (URLs or local paths) carried on user messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            images: vec![],
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn user_with_images(content: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            images,
            ..Self::plain("user", content)
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::plain("assistant", content)
        }
    }

    pub fn tool_result(tool_call_id: String, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id),
            ..Self::plain("tool", content)
        }
    }
}

/// A tool invocation requested by the model. Transient: its resolution is
/// folded back into the next message, it is never persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON object string, parsed at execution time.
    pub arguments: String,
}

/// Result of a `chat_with_tools` round: a final text answer, requested
/// tool calls, or both (interim commentary alongside calls).
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatOutcome {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ImageRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub size: Option<String>,
    pub quality: Option<String>,
    pub style: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedImage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    pub model: Option<String>,
    pub language: Option<String>,
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct SpeechOptions {
    pub model: Option<String>,
    pub voice: Option<String>,
    pub speed: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct EmbeddingOptions {
    pub model: Option<String>,
    pub dimensions: Option<u32>,
}

/// A finite, non-restartable sequence of generated text fragments.
pub type TextStream = BoxStream<'static, anyhow::Result<String>>;

fn unsupported(provider: &str, capability: &str) -> anyhow::Error {
    Error::action(format!(
        "provider '{provider}' does not support {capability}"
    ))
}

/// Uniform capability surface over one hosted backend.
///
/// Only the chat family is mandatory; the richer operations default to a
/// capability error so a backend that cannot serve them fails before any
/// network traffic.
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> anyhow::Result<String>;

    async fn generate_stream(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> anyhow::Result<TextStream>;

    async fn chat(
        &self,
        messages: &[ChatMessage],
        opts: &GenerateOptions,
    ) -> anyhow::Result<String>;

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        actions: &[ActionSpec],
        opts: &GenerateOptions,
    ) -> anyhow::Result<ChatOutcome>;

    async fn vision(
        &self,
        prompt: &str,
        images: &[String],
        opts: &GenerateOptions,
    ) -> anyhow::Result<String> {
        let _ = (prompt, images, opts);
        Err(unsupported(self.name(), "vision"))
    }

    async fn generate_image(&self, request: &ImageRequest) -> anyhow::Result<GeneratedImage> {
        let _ = request;
        Err(unsupported(self.name(), "image generation"))
    }

    async fn transcribe(
        &self,
        audio: &Path,
        opts: &TranscribeOptions,
    ) -> anyhow::Result<Transcript> {
        let _ = (audio, opts);
        Err(unsupported(self.name(), "transcription"))
    }

    async fn translate(
        &self,
        audio: &Path,
        opts: &TranscribeOptions,
    ) -> anyhow::Result<Transcript> {
        let _ = (audio, opts);
        Err(unsupported(self.name(), "audio translation"))
    }

    async fn text_to_speech(
        &self,
        text: &str,
        out: &Path,
        opts: &SpeechOptions,
    ) -> anyhow::Result<()> {
        let _ = (text, out, opts);
        Err(unsupported(self.name(), "text-to-speech"))
    }

    async fn embeddings(
        &self,
        input: &[String],
        opts: &EmbeddingOptions,
    ) -> anyhow::Result<Vec<Vec<f32>>> {
        let _ = (input, opts);
        Err(unsupported(self.name(), "embeddings"))
    }
}
