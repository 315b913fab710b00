use crate::store::{Store, ThreadMessage};
use anyhow::Result;

/// Where the loop writes its audit trail. Implementations must persist
/// each append before returning, so a failed round still leaves every
/// message it produced on record.
pub trait TranscriptSink {
    fn append(&mut self, role: &str, content: &str) -> Result<()>;
}

/// Appends to one agent's active thread, saving the store each time.
pub struct StoreTranscript<'a> {
    store: &'a mut Store,
    agent: String,
    thread: String,
}

impl<'a> StoreTranscript<'a> {
    pub fn new(store: &'a mut Store, agent: impl Into<String>, thread: impl Into<String>) -> Self {
        Self {
            store,
            agent: agent.into(),
            thread: thread.into(),
        }
    }
}

impl TranscriptSink for StoreTranscript<'_> {
    fn append(&mut self, role: &str, content: &str) -> Result<()> {
        self.store
            .append_thread_message(&self.agent, &self.thread, role, content)
    }
}

/// In-memory sink for one-shot runs and tests.
#[derive(Default)]
pub struct MemoryTranscript {
    pub messages: Vec<ThreadMessage>,
}

impl TranscriptSink for MemoryTranscript {
    fn append(&mut self, role: &str, content: &str) -> Result<()> {
        self.messages.push(ThreadMessage {
            role: role.into(),
            content: content.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
        Ok(())
    }
}
