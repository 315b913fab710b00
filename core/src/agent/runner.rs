use crate::agent::{ActionContext, ActionRegistry, TranscriptSink};
use crate::error::Error;
use crate::store::ThreadMessage;
use crate::traits::{ChatMessage, GenerateOptions, ToolCall};
use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Hard cap on chat-with-tools rounds per invocation. Exceeding it is a
/// fatal error for the run, never retried.
pub const MAX_ACTION_ROUNDS: usize = 8;

const TOOL_CALL_OPEN: &str = "<tool_call>";
const TOOL_CALL_CLOSE: &str = "</tool_call>";

/// The action-calling loop: one provider round may request actions, each
/// resolved through the registry and fed back as a tool-result message,
/// until the model answers in plain text or the round cap trips.
///
/// Every message goes through the [`TranscriptSink`] as it is produced,
/// so the thread keeps a complete audit trail even when the invocation
/// fails midway.
pub struct AgentRunner {
    registry: Arc<ActionRegistry>,
    ctx: ActionContext,
    enabled: BTreeSet<String>,
    max_rounds: usize,
}

impl AgentRunner {
    pub fn new(registry: Arc<ActionRegistry>, ctx: ActionContext) -> Self {
        Self {
            registry,
            ctx,
            enabled: BTreeSet::new(),
            max_rounds: MAX_ACTION_ROUNDS,
        }
    }

    pub fn with_enabled_actions(mut self, enabled: BTreeSet<String>) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_rounds(mut self, max: usize) -> Self {
        self.max_rounds = max;
        self
    }

    pub async fn run(
        &self,
        sink: &mut dyn TranscriptSink,
        instructions: &str,
        history: &[ThreadMessage],
        prompt: &str,
        images: &[String],
        opts: &GenerateOptions,
    ) -> Result<String> {
        sink.append("user", prompt)?;

        let mut messages = Vec::new();
        if !instructions.trim().is_empty() {
            messages.push(ChatMessage::system(instructions));
        }
        for m in history {
            messages.push(ChatMessage {
                role: m.role.clone(),
                content: m.content.clone(),
                tool_calls: None,
                tool_call_id: None,
                images: vec![],
            });
        }
        messages.push(if images.is_empty() {
            ChatMessage::user(prompt)
        } else {
            ChatMessage::user_with_images(prompt, images.to_vec())
        });

        let specs = self.registry.enabled_specs(&self.enabled);

        for round in 1..=self.max_rounds {
            debug!(round, "awaiting model");
            let outcome = self
                .ctx
                .provider
                .chat_with_tools(&messages, &specs, opts)
                .await?;

            let (text, tool_calls) = if outcome.has_tool_calls() {
                (
                    outcome.text.clone().unwrap_or_default(),
                    outcome.tool_calls.clone(),
                )
            } else {
                parse_inline_tool_calls(outcome.text_or_empty())
            };

            if tool_calls.is_empty() {
                messages.push(ChatMessage::assistant(text.clone()));
                sink.append("assistant", &text)?;
                return Ok(text);
            }

            messages.push(ChatMessage::assistant_with_tool_calls(
                text.clone(),
                tool_calls.clone(),
            ));
            if !text.trim().is_empty() {
                sink.append("assistant", &text)?;
            }

            for call in tool_calls {
                debug!(action = %call.name, "executing action");
                let outcome = match serde_json::from_str(&call.arguments) {
                    Ok(args) => self.registry.invoke(&call.name, args, &self.ctx).await,
                    Err(e) => crate::traits::ActionOutcome::fail(format!(
                        "arguments for '{}' are not valid JSON: {e}",
                        call.name
                    )),
                };
                let rendered = serde_json::to_string(&outcome)?;
                sink.append("system", &format!("[action:{}] {rendered}", call.name))?;
                messages.push(ChatMessage::tool_result(call.id, rendered));
            }
        }

        Err(Error::LoopBound {
            max: self.max_rounds,
        }
        .into())
    }
}

/// Some backends emit tool calls as `<tool_call>{json}</tool_call>`
/// blocks inside plain text instead of structured calls. Split those out;
/// whatever text remains around the blocks is kept as the answer.
pub fn parse_inline_tool_calls(response: &str) -> (String, Vec<ToolCall>) {
    let mut text_parts = Vec::new();
    let mut calls = Vec::new();
    let mut remaining = response;

    while let Some(start) = remaining.find(TOOL_CALL_OPEN) {
        let before = &remaining[..start];
        if !before.trim().is_empty() {
            text_parts.push(before.trim().to_string());
        }

        let after_open = &remaining[start + TOOL_CALL_OPEN.len()..];
        let Some(close_idx) = after_open.find(TOOL_CALL_CLOSE) else {
            remaining = after_open;
            break;
        };

        for value in extract_json_objects(&after_open[..close_idx]) {
            if let Some(call) = tool_call_from_value(&value) {
                calls.push(call);
            }
        }
        remaining = &after_open[close_idx + TOOL_CALL_CLOSE.len()..];
    }

    if !remaining.trim().is_empty() {
        text_parts.push(remaining.trim().to_string());
    }

    (text_parts.join("\n"), calls)
}

/// Scan for balanced top-level `{...}` objects, string-aware.
fn extract_json_objects(text: &str) -> Vec<serde_json::Value> {
    let mut values = Vec::new();
    let mut depth = 0;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        match ch {
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start
                        && let Ok(value) = serde_json::from_str::<serde_json::Value>(&text[s..=i])
                    {
                        values.push(value);
                    }
                    start = None;
                }
            }
            '"' if !escape_next => {
                in_string = !in_string;
            }
            '\\' if in_string => {
                escape_next = true;
            }
            _ => {
                escape_next = false;
            }
        }
    }

    values
}

fn tool_call_from_value(value: &serde_json::Value) -> Option<ToolCall> {
    let name = value.get("name")?.as_str()?.to_string();
    let arguments = serde_json::to_string(value.get("arguments")?).ok()?;
    let id = format!("call_{:x}", md5::compute(arguments.as_bytes()));
    Some(ToolCall {
        id,
        name,
        arguments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::MemoryTranscript;
    use crate::traits::{
        Action, ActionOutcome, ActionSpec, ChatOutcome, Provider, TextStream,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Plays back a fixed sequence of chat outcomes.
    #[derive(Debug)]
    struct ScriptedProvider {
        script: Mutex<Vec<ChatOutcome>>,
    }

    impl ScriptedProvider {
        fn new(mut outcomes: Vec<ChatOutcome>) -> Self {
            outcomes.reverse();
            Self {
                script: Mutex::new(outcomes),
            }
        }

        fn next(&self) -> ChatOutcome {
            self.script.lock().unwrap().pop().unwrap_or(ChatOutcome {
                text: Some("script exhausted".into()),
                tool_calls: vec![],
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _: &str, _: &GenerateOptions) -> Result<String> {
            Ok(self.next().text.unwrap_or_default())
        }

        async fn generate_stream(&self, _: &str, _: &GenerateOptions) -> Result<TextStream> {
            unimplemented!("not exercised")
        }

        async fn chat(&self, _: &[ChatMessage], _: &GenerateOptions) -> Result<String> {
            Ok(self.next().text.unwrap_or_default())
        }

        async fn chat_with_tools(
            &self,
            _: &[ChatMessage],
            _: &[ActionSpec],
            _: &GenerateOptions,
        ) -> Result<ChatOutcome> {
            Ok(self.next())
        }
    }

    struct EchoAction {
        invocations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Action for EchoAction {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes its input back"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {"value": {"type": "string"}},
                "required": ["value"]
            })
        }

        async fn execute(
            &self,
            args: serde_json::Value,
            _ctx: &ActionContext,
        ) -> Result<ActionOutcome> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(ActionOutcome::ok(json!({"echoed": args["value"]})))
        }
    }

    fn tool_call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: args.to_string(),
        }
    }

    fn runner_for(provider: Arc<dyn Provider>, invocations: Arc<AtomicUsize>) -> AgentRunner {
        let registry = Arc::new(ActionRegistry::new());
        registry.register(Arc::new(EchoAction { invocations }));
        let ctx = ActionContext::new(provider, "tester");
        AgentRunner::new(registry, ctx)
            .with_enabled_actions(BTreeSet::from(["echo".to_string()]))
    }

    #[tokio::test]
    async fn plain_text_terminates_immediately() {
        let provider = Arc::new(ScriptedProvider::new(vec![ChatOutcome {
            text: Some("done".into()),
            tool_calls: vec![],
        }]));
        let runner = runner_for(provider, Arc::new(AtomicUsize::new(0)));
        let mut sink = MemoryTranscript::default();

        let answer = runner
            .run(&mut sink, "", &[], "hi", &[], &GenerateOptions::default())
            .await
            .unwrap();

        assert_eq!(answer, "done");
        let roles: Vec<&str> = sink.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["user", "assistant"]);
    }

    #[tokio::test]
    async fn tool_round_then_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ChatOutcome {
                text: None,
                tool_calls: vec![tool_call("echo", json!({"value": "ping"}))],
            },
            ChatOutcome {
                text: Some("pong".into()),
                tool_calls: vec![],
            },
        ]));
        let invocations = Arc::new(AtomicUsize::new(0));
        let runner = runner_for(provider, invocations.clone());
        let mut sink = MemoryTranscript::default();

        let answer = runner
            .run(&mut sink, "be useful", &[], "say pong", &[], &GenerateOptions::default())
            .await
            .unwrap();

        assert_eq!(answer, "pong");
        assert_eq!(invocations.load(Ordering::SeqCst), 1);

        let roles: Vec<&str> = sink.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["user", "system", "assistant"]);
        assert!(sink.messages[1].content.starts_with("[action:echo]"));
        assert!(sink.messages[1].content.contains("ping"));
    }

    #[tokio::test]
    async fn round_cap_is_a_hard_error() {
        // Never answers in plain text.
        let endless: Vec<ChatOutcome> = (0..20)
            .map(|_| ChatOutcome {
                text: None,
                tool_calls: vec![tool_call("echo", json!({"value": "again"}))],
            })
            .collect();
        let provider = Arc::new(ScriptedProvider::new(endless));
        let invocations = Arc::new(AtomicUsize::new(0));
        let runner = runner_for(provider, invocations.clone()).with_max_rounds(3);
        let mut sink = MemoryTranscript::default();

        let err = runner
            .run(&mut sink, "", &[], "loop", &[], &GenerateOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::LoopBound { max: 3 })
        ));
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        // Partial progress survived: user message plus one result per round.
        assert_eq!(sink.messages.len(), 4);
        assert_eq!(sink.messages[0].role, "user");
    }

    #[tokio::test]
    async fn missing_argument_reaches_model_not_action() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ChatOutcome {
                text: None,
                tool_calls: vec![tool_call("echo", json!({}))],
            },
            ChatOutcome {
                text: Some("gave up".into()),
                tool_calls: vec![],
            },
        ]));
        let invocations = Arc::new(AtomicUsize::new(0));
        let runner = runner_for(provider, invocations.clone());
        let mut sink = MemoryTranscript::default();

        let answer = runner
            .run(&mut sink, "", &[], "try", &[], &GenerateOptions::default())
            .await
            .unwrap();

        assert_eq!(answer, "gave up");
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        assert!(sink.messages[1].content.contains("missing required argument"));
    }

    #[tokio::test]
    async fn inline_tool_call_text_is_parsed() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ChatOutcome {
                text: Some(
                    "<tool_call>{\"name\":\"echo\",\"arguments\":{\"value\":\"x\"}}</tool_call>"
                        .into(),
                ),
                tool_calls: vec![],
            },
            ChatOutcome {
                text: Some("parsed".into()),
                tool_calls: vec![],
            },
        ]));
        let invocations = Arc::new(AtomicUsize::new(0));
        let runner = runner_for(provider, invocations.clone());
        let mut sink = MemoryTranscript::default();

        let answer = runner
            .run(&mut sink, "", &[], "go", &[], &GenerateOptions::default())
            .await
            .unwrap();

        assert_eq!(answer, "parsed");
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn web_fetch_end_to_end() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fetched content"))
            .mount(&server)
            .await;

        let url = format!("{}/page", server.uri());
        let provider = Arc::new(ScriptedProvider::new(vec![
            ChatOutcome {
                text: None,
                tool_calls: vec![tool_call("web_fetch", json!({"url": url}))],
            },
            ChatOutcome {
                text: Some("summarized".into()),
                tool_calls: vec![],
            },
        ]));

        let registry = Arc::new(ActionRegistry::with_builtins());
        let ctx = ActionContext::new(provider, "a");
        let runner = AgentRunner::new(registry, ctx)
            .with_enabled_actions(BTreeSet::from(["web_fetch".to_string()]));
        let mut sink = MemoryTranscript::default();

        let answer = runner
            .run(&mut sink, "", &[], "fetch the page", &[], &GenerateOptions::default())
            .await
            .unwrap();

        assert_eq!(answer, "summarized");
        let roles: Vec<&str> = sink.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["user", "system", "assistant"]);
        assert_eq!(sink.messages[0].content, "fetch the page");
        assert!(sink.messages[1].content.starts_with("[action:web_fetch]"));
        assert!(sink.messages[1].content.contains("fetched content"));
        assert_eq!(sink.messages[2].content, "summarized");
    }

    #[test]
    fn inline_parser_splits_text_and_calls() {
        let (text, calls) = parse_inline_tool_calls(
            "thinking\n<tool_call>{\"name\":\"a\",\"arguments\":{\"k\":1}}</tool_call>\nafter",
        );
        assert_eq!(text, "thinking\nafter");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "a");
    }

    #[test]
    fn inline_parser_ignores_braces_in_strings() {
        let objects = extract_json_objects(r#"{"name":"a","arguments":{"s":"}{"}}"#);
        assert_eq!(objects.len(), 1);
    }

    #[test]
    fn inline_parser_handles_plain_text() {
        let (text, calls) = parse_inline_tool_calls("no calls here");
        assert_eq!(text, "no calls here");
        assert!(calls.is_empty());
    }
}
