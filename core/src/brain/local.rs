//! Local brain backend: one JSON file per collection under
//! `~/.aictl/index/`, with lexical relevance scoring. A stand-in for an
//! external vector-index collaborator that works offline.

use crate::error::Error;
use crate::traits::{Brain, MemoryMessage, SearchHit, namespaced_collection};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionFile {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    documents: Vec<StoredDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    text: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    meta: BTreeMap<String, String>,
}

pub struct LocalBrain {
    name: String,
    default_session: Option<String>,
    index_dir: PathBuf,
}

impl LocalBrain {
    pub fn new(
        name: impl Into<String>,
        default_session: Option<String>,
        index_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            name: name.into(),
            default_session,
            index_dir: index_dir.as_ref().to_path_buf(),
        }
    }

    fn resolve_session(&self, session: Option<&str>) -> String {
        session
            .map(str::to_string)
            .or_else(|| self.default_session.clone())
            .unwrap_or_else(|| self.name.clone())
    }

    /// Memory lives in reserved per-session collections without a `::`
    /// separator, so they never show up in `collection_list`.
    fn memory_collection(&self, session: Option<&str>) -> String {
        format!("{}__memory__{}", self.name, self.resolve_session(session))
    }

    fn file_path(&self, collection: &str) -> PathBuf {
        let safe: String = collection
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            })
            .collect();
        self.index_dir.join(format!("{safe}.json"))
    }

    fn load(&self, collection: &str) -> Result<CollectionFile> {
        let path = self.file_path(collection);
        if !path.exists() {
            return Ok(CollectionFile {
                name: collection.to_string(),
                ..CollectionFile::default()
            });
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read index {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse index {}", path.display()))
    }

    fn store(&self, collection: &str, file: &CollectionFile) -> Result<()> {
        if !self.index_dir.exists() {
            std::fs::create_dir_all(&self.index_dir)
                .with_context(|| format!("Failed to create {}", self.index_dir.display()))?;
        }
        let path = self.file_path(collection);
        let content = serde_json::to_string_pretty(file)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write index {}", path.display()))?;
        Ok(())
    }

    fn search_collection(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        min_score: Option<f64>,
    ) -> Result<Vec<SearchHit>> {
        let file = self.load(collection)?;
        let mut hits: Vec<SearchHit> = file
            .documents
            .iter()
            .filter_map(|doc| {
                let score = relevance(query, &doc.text);
                if score <= 0.0 {
                    return None;
                }
                if let Some(min) = min_score
                    && score < min
                {
                    return None;
                }
                Some(SearchHit {
                    text: doc.text.clone(),
                    score: Some(score),
                    document_id: doc.id.clone(),
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Fraction of query tokens that appear in the document, in [0, 1].
fn relevance(query: &str, text: &str) -> f64 {
    let query_tokens: Vec<String> = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let text_tokens: std::collections::BTreeSet<String> = tokenize(text).into_iter().collect();
    let matched = query_tokens
        .iter()
        .filter(|t| text_tokens.contains(*t))
        .count();
    matched as f64 / query_tokens.len() as f64
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Brain for LocalBrain {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &str {
        "local"
    }

    async fn memory_add(&self, session: Option<&str>, messages: &[MemoryMessage]) -> Result<()> {
        if messages.is_empty() {
            return Err(Error::action("no messages provided"));
        }
        let collection = self.memory_collection(session);
        let mut file = self.load(&collection)?;
        for m in messages {
            let mut meta = BTreeMap::new();
            meta.insert("role".to_string(), m.role.clone());
            meta.insert("timestamp".to_string(), m.timestamp.clone());
            file.documents.push(StoredDocument {
                id: None,
                text: m.content.clone(),
                meta,
            });
        }
        self.store(&collection, &file)
    }

    async fn memory_get(&self, session: Option<&str>) -> Result<Vec<MemoryMessage>> {
        let file = self.load(&self.memory_collection(session))?;
        Ok(file
            .documents
            .into_iter()
            .map(|doc| MemoryMessage {
                role: doc.meta.get("role").cloned().unwrap_or_else(|| "user".into()),
                content: doc.text,
                timestamp: doc.meta.get("timestamp").cloned().unwrap_or_default(),
            })
            .collect())
    }

    async fn memory_search(
        &self,
        session: Option<&str>,
        query: &str,
        limit: usize,
        min_score: Option<f64>,
    ) -> Result<Vec<SearchHit>> {
        self.search_collection(&self.memory_collection(session), query, limit, min_score)
    }

    async fn memory_clear(&self, session: Option<&str>) -> Result<()> {
        let path = self.file_path(&self.memory_collection(session));
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
        Ok(())
    }

    async fn collection_create(&self, name: &str, description: Option<&str>) -> Result<()> {
        let full = namespaced_collection(&self.name, name);
        let mut file = self.load(&full)?;
        file.description = description.map(str::to_string);
        self.store(&full, &file)
    }

    async fn collection_list(&self) -> Result<Vec<String>> {
        let prefix = format!("{}::", self.name);
        let mut names = Vec::new();
        if !self.index_dir.exists() {
            return Ok(names);
        }
        for entry in std::fs::read_dir(&self.index_dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // The real collection name is stored inside the file; the
            // filename is sanitized and not reversible.
            if let Ok(content) = std::fs::read_to_string(entry.path())
                && let Ok(file) = serde_json::from_str::<CollectionFile>(&content)
                && file.name.starts_with(&prefix)
            {
                names.push(file.name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn document_add(
        &self,
        collection: &str,
        document_id: Option<&str>,
        text: &str,
    ) -> Result<()> {
        let full = namespaced_collection(&self.name, collection);
        let mut file = self.load(&full)?;
        file.documents.push(StoredDocument {
            id: document_id.map(str::to_string),
            text: text.to_string(),
            meta: BTreeMap::new(),
        });
        self.store(&full, &file)
    }

    async fn document_search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        min_score: Option<f64>,
    ) -> Result<Vec<SearchHit>> {
        let full = namespaced_collection(&self.name, collection);
        self.search_collection(&full, query, limit, min_score)
    }

    async fn document_delete(&self, collection: &str, document_id: &str) -> Result<bool> {
        let full = namespaced_collection(&self.name, collection);
        let mut file = self.load(&full)?;
        let before = file.documents.len();
        file.documents
            .retain(|doc| doc.id.as_deref() != Some(document_id));
        if file.documents.len() == before {
            return Ok(false);
        }
        self.store(&full, &file)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn brain(tmp: &TempDir) -> LocalBrain {
        LocalBrain::new("research", None, tmp.path())
    }

    #[tokio::test]
    async fn memory_roundtrip_preserves_order() {
        let tmp = TempDir::new().unwrap();
        let b = brain(&tmp);

        b.memory_add(
            None,
            &[
                MemoryMessage::new("user", "first"),
                MemoryMessage::new("assistant", "second"),
            ],
        )
        .await
        .unwrap();

        let messages = b.memory_get(None).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].role, "assistant");

        b.memory_clear(None).await.unwrap();
        assert!(b.memory_get(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn document_search_ranks_by_overlap() {
        let tmp = TempDir::new().unwrap();
        let b = brain(&tmp);
        b.collection_create("papers", Some("test docs")).await.unwrap();
        b.document_add("papers", Some("d1"), "rust borrow checker ownership")
            .await
            .unwrap();
        b.document_add("papers", Some("d2"), "gardening in spring")
            .await
            .unwrap();

        let hits = b
            .document_search("papers", "rust ownership", 5, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id.as_deref(), Some("d1"));
        assert!(hits[0].score.unwrap() > 0.9);
    }

    #[tokio::test]
    async fn min_score_filters_weak_hits() {
        let tmp = TempDir::new().unwrap();
        let b = brain(&tmp);
        b.document_add("papers", Some("d1"), "rust is fast").await.unwrap();

        let hits = b
            .document_search("papers", "rust gardening spring flowers", 5, Some(0.5))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let tmp = TempDir::new().unwrap();
        let b = brain(&tmp);
        b.document_add("papers", Some("d1"), "something").await.unwrap();

        assert!(b.document_delete("papers", "d1").await.unwrap());
        assert!(!b.document_delete("papers", "d1").await.unwrap());
    }

    #[tokio::test]
    async fn memory_sessions_hidden_from_collection_list() {
        let tmp = TempDir::new().unwrap();
        let b = brain(&tmp);
        b.memory_add(Some("s1"), &[MemoryMessage::new("user", "hi")])
            .await
            .unwrap();
        b.collection_create("visible", None).await.unwrap();

        let collections = b.collection_list().await.unwrap();
        assert_eq!(collections, vec!["research::visible".to_string()]);
    }

    #[test]
    fn namespacing_is_idempotent() {
        assert_eq!(namespaced_collection("b", "c"), "b::c");
        assert_eq!(namespaced_collection("b", "other::c"), "other::c");
    }
}
