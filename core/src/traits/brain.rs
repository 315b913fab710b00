use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One remembered conversation turn inside a brain session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMessage {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub timestamp: String,
}

impl MemoryMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// A scored search result from session memory or a document collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

/// A namespaced memory/document-search context.
///
/// Collections are namespaced as `brain::collection`; a `None` session
/// resolves to the brain's default session (or the brain name itself).
#[async_trait]
pub trait Brain: Send + Sync {
    /// Brain name (the CLI-level namespace).
    fn name(&self) -> &str;

    /// Backend identifier, `"remote"` or `"local"`.
    fn backend(&self) -> &str;

    async fn memory_add(
        &self,
        session: Option<&str>,
        messages: &[MemoryMessage],
    ) -> anyhow::Result<()>;

    async fn memory_get(&self, session: Option<&str>) -> anyhow::Result<Vec<MemoryMessage>>;

    async fn memory_search(
        &self,
        session: Option<&str>,
        query: &str,
        limit: usize,
        min_score: Option<f64>,
    ) -> anyhow::Result<Vec<SearchHit>>;

    async fn memory_clear(&self, session: Option<&str>) -> anyhow::Result<()>;

    async fn collection_create(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> anyhow::Result<()>;

    async fn collection_list(&self) -> anyhow::Result<Vec<String>>;

    async fn document_add(
        &self,
        collection: &str,
        document_id: Option<&str>,
        text: &str,
    ) -> anyhow::Result<()>;

    async fn document_search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        min_score: Option<f64>,
    ) -> anyhow::Result<Vec<SearchHit>>;

    /// Returns false when the document was not present.
    async fn document_delete(&self, collection: &str, document_id: &str) -> anyhow::Result<bool>;
}

/// Qualify a collection name with the brain namespace unless it already
/// carries one.
pub fn namespaced_collection(brain: &str, collection: &str) -> String {
    if collection.contains("::") {
        collection.to_string()
    } else {
        format!("{brain}::{collection}")
    }
}
