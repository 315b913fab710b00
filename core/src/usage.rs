//! Token usage bookkeeping: UTC date -> provider -> cumulative count,
//! persisted to `~/.aictl/usage.json` on every record.

use crate::store::aictl_dir;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

const USAGE_FILE: &str = "usage.json";

pub type UsageTable = BTreeMap<String, BTreeMap<String, u64>>;

#[derive(Debug)]
pub struct UsageLog {
    path: PathBuf,
    data: Mutex<UsageTable>,
}

impl UsageLog {
    pub fn open() -> Result<Self> {
        Self::open_at(aictl_dir().join(USAGE_FILE))
    }

    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read usage log from {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse usage log at {}", path.display()))?
        } else {
            UsageTable::new()
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Add tokens under today's UTC date. Best-effort: a failed write is
    /// logged and swallowed so usage accounting never fails a provider
    /// call that already succeeded.
    pub fn record(&self, provider: &str, tokens: u64) {
        if tokens == 0 {
            return;
        }
        let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let snapshot = {
            let mut data = self.data.lock().unwrap();
            *data
                .entry(date)
                .or_default()
                .entry(provider.to_string())
                .or_insert(0) += tokens;
            data.clone()
        };
        if let Err(e) = self.persist(&snapshot) {
            warn!("failed to persist token usage: {e}");
        }
    }

    fn persist(&self, data: &UsageTable) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(data)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write usage log to {}", self.path.display()))?;
        Ok(())
    }

    pub fn snapshot(&self) -> UsageTable {
        self.data.lock().unwrap().clone()
    }

    pub fn for_date(&self, date: &str) -> BTreeMap<String, u64> {
        self.data
            .lock()
            .unwrap()
            .get(date)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn records_accumulate_per_provider() {
        let tmp = TempDir::new().unwrap();
        let log = UsageLog::open_at(tmp.path().join("usage.json")).unwrap();

        log.record("openai", 100);
        log.record("openai", 50);
        log.record("anthropic", 7);

        let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let today = log.for_date(&date);
        assert_eq!(today.get("openai"), Some(&150));
        assert_eq!(today.get("anthropic"), Some(&7));
    }

    #[test]
    fn zero_tokens_not_recorded() {
        let tmp = TempDir::new().unwrap();
        let log = UsageLog::open_at(tmp.path().join("usage.json")).unwrap();
        log.record("openai", 0);
        assert!(log.snapshot().is_empty());
    }

    #[test]
    fn usage_survives_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("usage.json");
        UsageLog::open_at(&path).unwrap().record("ollama", 42);

        let reopened = UsageLog::open_at(&path).unwrap();
        let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
        assert_eq!(reopened.for_date(&date).get("ollama"), Some(&42));
    }
}
