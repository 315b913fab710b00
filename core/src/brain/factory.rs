use crate::brain::{LocalBrain, RemoteBrain};
use crate::error::Error;
use crate::store::{BrainEntry, aictl_dir};
use crate::traits::Brain;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub fn default_index_dir() -> PathBuf {
    aictl_dir().join("index")
}

/// Backend-name dispatch. Remote brains need `AICTL_BRAIN_URL` (and
/// optionally `AICTL_BRAIN_API_KEY`) in the environment.
pub fn create_brain(name: &str, entry: &BrainEntry, index_dir: &Path) -> Result<Arc<dyn Brain>> {
    match entry.backend.as_str() {
        "local" => Ok(Arc::new(LocalBrain::new(
            name,
            entry.default_session.clone(),
            index_dir,
        ))),
        "remote" => {
            let base_url = std::env::var("AICTL_BRAIN_URL").map_err(|_| {
                Error::Config("remote brain requires AICTL_BRAIN_URL to be set".into())
            })?;
            let api_key = std::env::var("AICTL_BRAIN_API_KEY").ok();
            Ok(Arc::new(RemoteBrain::new(
                name,
                entry.default_session.clone(),
                base_url,
                api_key,
            )))
        }
        other => Err(Error::config(format!(
            "unknown brain backend '{other}'; available: remote, local"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn factory_local() {
        let tmp = TempDir::new().unwrap();
        let entry = BrainEntry {
            backend: "local".into(),
            default_session: None,
        };
        let brain = create_brain("notes", &entry, tmp.path()).unwrap();
        assert_eq!(brain.name(), "notes");
        assert_eq!(brain.backend(), "local");
    }

    #[test]
    fn factory_rejects_unknown_backend() {
        let tmp = TempDir::new().unwrap();
        let entry = BrainEntry {
            backend: "graph".into(),
            default_session: None,
        };
        assert!(create_brain("notes", &entry, tmp.path()).is_err());
    }
}
