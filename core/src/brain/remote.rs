//! Remote brain backend: a thin REST client for the external
//! conversational-memory/document-store service. The service owns all
//! storage and scoring; this client only shuttles JSON.

use crate::error::Error;
use crate::traits::{Brain, MemoryMessage, SearchHit, namespaced_collection};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct MemoryReply {
    #[serde(default)]
    messages: Vec<MemoryMessage>,
}

#[derive(Debug, Deserialize)]
struct SearchReply {
    #[serde(default)]
    results: Vec<RemoteHit>,
}

#[derive(Debug, Deserialize)]
struct RemoteHit {
    text: String,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CollectionsReply {
    #[serde(default)]
    collections: Vec<CollectionEntry>,
}

#[derive(Debug, Deserialize)]
struct CollectionEntry {
    name: String,
}

pub struct RemoteBrain {
    name: String,
    default_session: Option<String>,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl RemoteBrain {
    pub fn new(
        name: impl Into<String>,
        default_session: Option<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            name: name.into(),
            default_session,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    fn resolve_session(&self, session: Option<&str>) -> String {
        session
            .map(str::to_string)
            .or_else(|| self.default_session.clone())
            .unwrap_or_else(|| self.name.clone())
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::provider(format!("brain service unreachable: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!("brain service {status}: {body}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl Brain for RemoteBrain {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &str {
        "remote"
    }

    async fn memory_add(&self, session: Option<&str>, messages: &[MemoryMessage]) -> Result<()> {
        if messages.is_empty() {
            return Err(Error::action("no messages provided"));
        }
        let sid = self.resolve_session(session);
        let body = json!({"messages": messages});
        self.send(
            self.request(reqwest::Method::POST, &format!("/api/v1/sessions/{sid}/memory"))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn memory_get(&self, session: Option<&str>) -> Result<Vec<MemoryMessage>> {
        let sid = self.resolve_session(session);
        let response = self
            .send(self.request(reqwest::Method::GET, &format!("/api/v1/sessions/{sid}/memory")))
            .await?;
        let reply: MemoryReply = response
            .json()
            .await
            .map_err(|e| Error::provider(format!("brain service returned malformed data: {e}")))?;
        Ok(reply.messages)
    }

    async fn memory_search(
        &self,
        session: Option<&str>,
        query: &str,
        limit: usize,
        min_score: Option<f64>,
    ) -> Result<Vec<SearchHit>> {
        let sid = self.resolve_session(session);
        let body = json!({"text": query, "limit": limit, "min_score": min_score});
        let response = self
            .send(
                self.request(reqwest::Method::POST, &format!("/api/v1/sessions/{sid}/search"))
                    .json(&body),
            )
            .await?;
        let reply: SearchReply = response
            .json()
            .await
            .map_err(|e| Error::provider(format!("brain service returned malformed data: {e}")))?;
        Ok(reply
            .results
            .into_iter()
            .map(|h| SearchHit {
                text: h.text,
                score: h.score,
                document_id: h.id,
            })
            .collect())
    }

    async fn memory_clear(&self, session: Option<&str>) -> Result<()> {
        let sid = self.resolve_session(session);
        self.send(self.request(
            reqwest::Method::DELETE,
            &format!("/api/v1/sessions/{sid}/memory"),
        ))
        .await?;
        Ok(())
    }

    async fn collection_create(&self, name: &str, description: Option<&str>) -> Result<()> {
        let full = namespaced_collection(&self.name, name);
        let body = json!({"name": full, "description": description});
        self.send(
            self.request(reqwest::Method::POST, "/api/v1/collections")
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn collection_list(&self) -> Result<Vec<String>> {
        let response = self
            .send(self.request(reqwest::Method::GET, "/api/v1/collections"))
            .await?;
        let reply: CollectionsReply = response
            .json()
            .await
            .map_err(|e| Error::provider(format!("brain service returned malformed data: {e}")))?;
        let prefix = format!("{}::", self.name);
        Ok(reply
            .collections
            .into_iter()
            .map(|c| c.name)
            .filter(|n| n.starts_with(&prefix))
            .collect())
    }

    async fn document_add(
        &self,
        collection: &str,
        document_id: Option<&str>,
        text: &str,
    ) -> Result<()> {
        let full = namespaced_collection(&self.name, collection);
        let body = json!({"documents": [{"id": document_id, "text": text}]});
        self.send(
            self.request(
                reqwest::Method::POST,
                &format!("/api/v1/collections/{full}/documents"),
            )
            .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn document_search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        min_score: Option<f64>,
    ) -> Result<Vec<SearchHit>> {
        let full = namespaced_collection(&self.name, collection);
        let body = json!({"text": query, "limit": limit, "min_score": min_score});
        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/api/v1/collections/{full}/search"),
                )
                .json(&body),
            )
            .await?;
        let reply: SearchReply = response
            .json()
            .await
            .map_err(|e| Error::provider(format!("brain service returned malformed data: {e}")))?;
        Ok(reply
            .results
            .into_iter()
            .map(|h| SearchHit {
                text: h.text,
                score: h.score,
                document_id: h.id,
            })
            .collect())
    }

    async fn document_delete(&self, collection: &str, document_id: &str) -> Result<bool> {
        let full = namespaced_collection(&self.name, collection);
        let response = self
            .request(
                reqwest::Method::DELETE,
                &format!("/api/v1/collections/{full}/documents/{document_id}"),
            )
            .send()
            .await
            .map_err(|e| Error::provider(format!("brain service unreachable: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!("brain service {status}: {body}")));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn memory_search_parses_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/sessions/work/search"))
            .and(body_partial_json(json!({"text": "deadline"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"text": "deadline is friday", "score": 0.9}]
            })))
            .mount(&server)
            .await;

        let brain = RemoteBrain::new("work", None, server.uri(), None);
        let hits = brain.memory_search(None, "deadline", 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "deadline is friday");
        assert_eq!(hits[0].score, Some(0.9));
    }

    #[tokio::test]
    async fn missing_document_delete_returns_false() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let brain = RemoteBrain::new("work", None, server.uri(), None);
        assert!(!brain.document_delete("docs", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn service_error_is_provider_category() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let brain = RemoteBrain::new("work", None, server.uri(), None);
        let err = brain.memory_get(None).await.unwrap_err();
        assert!(format!("{err}").contains("provider error"));
    }
}
