//! The persisted JSON store backing every CLI invocation.
//!
//! One document (`~/.aictl/config.json`) holds provider credentials,
//! default models, the brain and agent registries, and each agent's
//! threads. The whole file is read at open and rewritten on every
//! mutation; concurrent invocations are last-writer-wins by design
//! (single-process CLI usage model).

use crate::error::Error;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

const AICTL_DIR: &str = ".aictl";
const CONFIG_FILE: &str = "config.json";

pub fn aictl_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(AICTL_DIR)
}

pub fn config_path() -> PathBuf {
    aictl_dir().join(CONFIG_FILE)
}

pub fn ensure_aictl_dir() -> Result<PathBuf> {
    let dir = aictl_dir();
    if !dir.exists() {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create aictl directory at {}", dir.display()))?;
    }
    Ok(dir)
}

/// One persisted conversation message. Append-only; never mutated after
/// insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub role: String,
    pub content: String,
    pub timestamp: String,
}

/// An ordered conversation history owned by one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub created_at: String,
    #[serde(default)]
    pub messages: Vec<ThreadMessage>,
}

impl Thread {
    fn new() -> Self {
        Self {
            created_at: chrono::Utc::now().to_rfc3339(),
            messages: vec![],
        }
    }
}

/// A named bundle of provider, model, instructions, optional brain and
/// enabled actions, plus its threads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub provider: String,
    pub model: String,
    pub instructions: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brain: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub actions: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub threads: BTreeMap<String, Thread>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_thread: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainEntry {
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_session: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreData {
    pub api_keys: BTreeMap<String, String>,
    pub default_models: BTreeMap<String, String>,
    pub default_provider: Option<String>,
    pub agents: BTreeMap<String, AgentEntry>,
    pub current_agent: Option<String>,
    pub brains: BTreeMap<String, BrainEntry>,
    pub current_brain: Option<String>,
}

pub struct Store {
    path: PathBuf,
    data: StoreData,
}

impl Store {
    pub fn open() -> Result<Self> {
        ensure_aictl_dir()?;
        Self::open_at(config_path())
    }

    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read store from {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse store at {}", path.display()))?
        } else {
            StoreData::default()
        };
        Ok(Self { path, data })
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(&self.data)
            .context("Failed to serialize store to JSON")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write store to {}", self.path.display()))?;
        Ok(())
    }

    // ---- credentials & defaults ----

    /// Env var first (`OPENAI_API_KEY` for provider "openai"), then the
    /// stored key.
    pub fn api_key(&self, provider: &str) -> Option<String> {
        if let Ok(key) = std::env::var(format!("{}_API_KEY", provider.to_uppercase()))
            && !key.is_empty()
        {
            return Some(key);
        }
        self.data.api_keys.get(provider).cloned()
    }

    pub fn stored_api_key(&self, provider: &str) -> Option<&str> {
        self.data.api_keys.get(provider).map(String::as_str)
    }

    pub fn set_api_key(&mut self, provider: &str, key: &str) -> Result<()> {
        self.data.api_keys.insert(provider.into(), key.into());
        self.save()
    }

    pub fn default_model(&self, provider: &str) -> Option<&str> {
        self.data.default_models.get(provider).map(String::as_str)
    }

    pub fn set_default_model(&mut self, provider: &str, model: &str) -> Result<()> {
        self.data.default_models.insert(provider.into(), model.into());
        self.save()
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.data.default_provider.as_deref()
    }

    pub fn set_default_provider(&mut self, provider: &str) -> Result<()> {
        self.data.default_provider = Some(provider.into());
        self.save()
    }

    // ---- agents ----

    pub fn create_agent(&mut self, name: &str, entry: AgentEntry) -> Result<()> {
        if self.data.agents.contains_key(name) {
            return Err(Error::config(format!("agent '{name}' already exists")));
        }
        self.data.agents.insert(name.into(), entry);
        if self.data.current_agent.is_none() {
            self.data.current_agent = Some(name.into());
        }
        self.save()
    }

    pub fn agent(&self, name: &str) -> Result<&AgentEntry> {
        self.data
            .agents
            .get(name)
            .ok_or_else(|| Error::Config(format!("unknown agent '{name}'")).into())
    }

    fn agent_mut(&mut self, name: &str) -> Result<&mut AgentEntry> {
        self.data
            .agents
            .get_mut(name)
            .ok_or_else(|| Error::Config(format!("unknown agent '{name}'")).into())
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.data.agents.keys().cloned().collect()
    }

    pub fn delete_agent(&mut self, name: &str) -> Result<()> {
        if self.data.agents.remove(name).is_none() {
            return Err(Error::config(format!("unknown agent '{name}'")));
        }
        if self.data.current_agent.as_deref() == Some(name) {
            self.data.current_agent = None;
        }
        self.save()
    }

    pub fn use_agent(&mut self, name: &str) -> Result<()> {
        self.agent(name)?;
        self.data.current_agent = Some(name.into());
        self.save()
    }

    pub fn current_agent(&self) -> Option<&str> {
        self.data.current_agent.as_deref()
    }

    /// Resolve an explicit agent name or fall back to the current one.
    pub fn resolve_agent(&self, name: Option<&str>) -> Result<String> {
        match name {
            Some(n) => {
                self.agent(n)?;
                Ok(n.to_string())
            }
            None => self
                .current_agent()
                .map(str::to_string)
                .ok_or_else(|| Error::config("no agent selected; run 'aictl agent use <name>'")),
        }
    }

    pub fn set_agent_property(&mut self, agent: &str, key: &str, value: &str) -> Result<()> {
        self.agent_mut(agent)?.properties.insert(key.into(), value.into());
        self.save()
    }

    pub fn unset_agent_property(&mut self, agent: &str, key: &str) -> Result<()> {
        if self.agent_mut(agent)?.properties.remove(key).is_none() {
            return Err(Error::config(format!(
                "agent '{agent}' has no property '{key}'"
            )));
        }
        self.save()
    }

    pub fn enable_action(&mut self, agent: &str, action: &str) -> Result<()> {
        self.agent_mut(agent)?.actions.insert(action.into());
        self.save()
    }

    pub fn disable_action(&mut self, agent: &str, action: &str) -> Result<()> {
        if !self.agent_mut(agent)?.actions.remove(action) {
            return Err(Error::config(format!(
                "action '{action}' is not enabled on agent '{agent}'"
            )));
        }
        self.save()
    }

    // ---- threads ----

    pub fn create_thread(&mut self, agent: &str, thread: &str) -> Result<()> {
        let entry = self.agent_mut(agent)?;
        if entry.threads.contains_key(thread) {
            return Err(Error::config(format!(
                "thread '{thread}' already exists on agent '{agent}'"
            )));
        }
        entry.threads.insert(thread.into(), Thread::new());
        entry.current_thread = Some(thread.into());
        self.save()
    }

    pub fn thread(&self, agent: &str, thread: &str) -> Result<&Thread> {
        self.agent(agent)?.threads.get(thread).ok_or_else(|| {
            Error::Config(format!("unknown thread '{thread}' on agent '{agent}'")).into()
        })
    }

    pub fn thread_names(&self, agent: &str) -> Result<Vec<String>> {
        Ok(self.agent(agent)?.threads.keys().cloned().collect())
    }

    pub fn use_thread(&mut self, agent: &str, thread: &str) -> Result<()> {
        let entry = self.agent_mut(agent)?;
        if !entry.threads.contains_key(thread) {
            return Err(Error::config(format!(
                "unknown thread '{thread}' on agent '{agent}'"
            )));
        }
        entry.current_thread = Some(thread.into());
        self.save()
    }

    pub fn current_thread(&self, agent: &str) -> Result<Option<&str>> {
        Ok(self.agent(agent)?.current_thread.as_deref())
    }

    /// Active thread for an agent, creating and selecting a `default`
    /// thread when none is active yet.
    pub fn ensure_active_thread(&mut self, agent: &str) -> Result<String> {
        if let Some(current) = self.agent(agent)?.current_thread.clone() {
            return Ok(current);
        }
        let entry = self.agent_mut(agent)?;
        entry.threads.entry("default".into()).or_insert_with(Thread::new);
        entry.current_thread = Some("default".into());
        self.save()?;
        Ok("default".into())
    }

    /// Truncate a thread to empty. The thread itself survives.
    pub fn clear_thread(&mut self, agent: &str, thread: &str) -> Result<()> {
        let entry = self.agent_mut(agent)?;
        match entry.threads.get_mut(thread) {
            Some(t) => t.messages.clear(),
            None => {
                return Err(Error::config(format!(
                    "unknown thread '{thread}' on agent '{agent}'"
                )));
            }
        }
        self.save()
    }

    pub fn delete_thread(&mut self, agent: &str, thread: &str) -> Result<()> {
        let entry = self.agent_mut(agent)?;
        if entry.threads.remove(thread).is_none() {
            return Err(Error::config(format!(
                "unknown thread '{thread}' on agent '{agent}'"
            )));
        }
        if entry.current_thread.as_deref() == Some(thread) {
            entry.current_thread = None;
        }
        self.save()
    }

    /// Append one message and persist immediately, so partial loop
    /// progress survives a failed invocation.
    pub fn append_thread_message(
        &mut self,
        agent: &str,
        thread: &str,
        role: &str,
        content: &str,
    ) -> Result<()> {
        let entry = self.agent_mut(agent)?;
        let t = entry.threads.get_mut(thread).ok_or_else(|| {
            Error::Config(format!("unknown thread '{thread}' on agent '{agent}'"))
        })?;
        t.messages.push(ThreadMessage {
            role: role.into(),
            content: content.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
        self.save()
    }

    // ---- brains ----

    pub fn create_brain(&mut self, name: &str, entry: BrainEntry) -> Result<()> {
        if self.data.brains.contains_key(name) {
            return Err(Error::config(format!("brain '{name}' already exists")));
        }
        self.data.brains.insert(name.into(), entry);
        if self.data.current_brain.is_none() {
            self.data.current_brain = Some(name.into());
        }
        self.save()
    }

    pub fn brain(&self, name: &str) -> Result<&BrainEntry> {
        self.data
            .brains
            .get(name)
            .ok_or_else(|| Error::Config(format!("unknown brain '{name}'")).into())
    }

    pub fn brain_names(&self) -> Vec<String> {
        self.data.brains.keys().cloned().collect()
    }

    pub fn delete_brain(&mut self, name: &str) -> Result<()> {
        if self.data.brains.remove(name).is_none() {
            return Err(Error::config(format!("unknown brain '{name}'")));
        }
        if self.data.current_brain.as_deref() == Some(name) {
            self.data.current_brain = None;
        }
        self.save()
    }

    pub fn use_brain(&mut self, name: &str) -> Result<()> {
        self.brain(name)?;
        self.data.current_brain = Some(name.into());
        self.save()
    }

    pub fn current_brain(&self) -> Option<&str> {
        self.data.current_brain.as_deref()
    }

    pub fn resolve_brain(&self, name: Option<&str>) -> Result<String> {
        match name {
            Some(n) => {
                self.brain(n)?;
                Ok(n.to_string())
            }
            None => self
                .current_brain()
                .map(str::to_string)
                .ok_or_else(|| Error::config("no brain selected; run 'aictl brain use <name>'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store(tmp: &TempDir) -> Store {
        Store::open_at(tmp.path().join("config.json")).unwrap()
    }

    fn sample_agent() -> AgentEntry {
        AgentEntry {
            provider: "openai".into(),
            model: "gpt-4o".into(),
            instructions: "You are terse.".into(),
            brain: None,
            properties: BTreeMap::new(),
            actions: BTreeSet::new(),
            threads: BTreeMap::new(),
            current_thread: None,
        }
    }

    #[test]
    fn create_then_get_roundtrips() {
        let tmp = TempDir::new().unwrap();
        let mut store = test_store(&tmp);
        store.create_agent("a", sample_agent()).unwrap();

        let reopened = Store::open_at(tmp.path().join("config.json")).unwrap();
        let entry = reopened.agent("a").unwrap();
        assert_eq!(entry.provider, "openai");
        assert_eq!(entry.model, "gpt-4o");
        assert_eq!(entry.instructions, "You are terse.");
    }

    #[test]
    fn duplicate_agent_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut store = test_store(&tmp);
        store.create_agent("a", sample_agent()).unwrap();
        assert!(store.create_agent("a", sample_agent()).is_err());
    }

    #[test]
    fn first_agent_becomes_current() {
        let tmp = TempDir::new().unwrap();
        let mut store = test_store(&tmp);
        store.create_agent("a", sample_agent()).unwrap();
        assert_eq!(store.current_agent(), Some("a"));
        store.delete_agent("a").unwrap();
        assert_eq!(store.current_agent(), None);
    }

    #[test]
    fn thread_messages_keep_insertion_order() {
        let tmp = TempDir::new().unwrap();
        let mut store = test_store(&tmp);
        store.create_agent("a", sample_agent()).unwrap();
        store.create_thread("a", "t").unwrap();

        for i in 0..5 {
            store
                .append_thread_message("a", "t", "user", &format!("msg {i}"))
                .unwrap();
        }

        let thread = store.thread("a", "t").unwrap();
        assert_eq!(thread.messages.len(), 5);
        for (i, m) in thread.messages.iter().enumerate() {
            assert_eq!(m.content, format!("msg {i}"));
        }
    }

    #[test]
    fn clear_empties_delete_removes() {
        let tmp = TempDir::new().unwrap();
        let mut store = test_store(&tmp);
        store.create_agent("a", sample_agent()).unwrap();
        store.create_thread("a", "t").unwrap();
        store.append_thread_message("a", "t", "user", "hi").unwrap();

        store.clear_thread("a", "t").unwrap();
        assert!(store.thread("a", "t").unwrap().messages.is_empty());

        store.delete_thread("a", "t").unwrap();
        assert!(store.thread_names("a").unwrap().is_empty());
        assert!(store.thread("a", "t").is_err());
    }

    #[test]
    fn ensure_active_thread_creates_default() {
        let tmp = TempDir::new().unwrap();
        let mut store = test_store(&tmp);
        store.create_agent("a", sample_agent()).unwrap();
        assert_eq!(store.ensure_active_thread("a").unwrap(), "default");
        assert_eq!(store.current_thread("a").unwrap(), Some("default"));

        store.create_thread("a", "other").unwrap();
        assert_eq!(store.ensure_active_thread("a").unwrap(), "other");
    }

    #[test]
    fn action_toggles() {
        let tmp = TempDir::new().unwrap();
        let mut store = test_store(&tmp);
        store.create_agent("a", sample_agent()).unwrap();
        store.enable_action("a", "web_fetch").unwrap();
        assert!(store.agent("a").unwrap().actions.contains("web_fetch"));
        store.disable_action("a", "web_fetch").unwrap();
        assert!(store.disable_action("a", "web_fetch").is_err());
    }

    #[test]
    fn stored_api_key_survives_reload() {
        let tmp = TempDir::new().unwrap();
        let mut store = test_store(&tmp);
        store.set_api_key("openai", "sk-test").unwrap();

        let reopened = Store::open_at(tmp.path().join("config.json")).unwrap();
        assert_eq!(reopened.stored_api_key("openai"), Some("sk-test"));
    }
}
