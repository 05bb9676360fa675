//! Supabase REST adapter: similarity search over the document store plus
//! the row insert/select calls the metrics store needs.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{MatchQuery, ProviderError, Result, VectorStore, http_client};
use crate::pipeline::messages::Document;

const SERVICE: &str = "supabase";

/// Thin client for the PostgREST endpoints of a Supabase project.
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    service_key: String,
    client: reqwest::Client,
}

impl SupabaseClient {
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the URL or key is empty.
    pub fn new(
        base_url: impl Into<String>,
        service_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url.into();
        let service_key = service_key.into();
        if base_url.is_empty() || service_key.is_empty() {
            return Err(ProviderError::Config(
                "Supabase URL and service key are required".into(),
            ));
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            client: http_client(timeout)?,
        })
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{path}", self.base_url)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(|e| ProviderError::request(SERVICE, e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::from_status(SERVICE, status, &body))
    }

    /// Call a database function.
    pub async fn rpc<T: DeserializeOwned>(
        &self,
        function: &str,
        args: &serde_json::Value,
    ) -> Result<T> {
        let builder = self
            .client
            .post(self.rest_url(&format!("rpc/{function}")))
            .json(args);
        self.send(builder)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("{function} response: {e}")))
    }

    /// Insert one row without reading it back.
    pub async fn insert<T: Serialize + ?Sized>(&self, table: &str, row: &T) -> Result<()> {
        let builder = self
            .client
            .post(self.rest_url(table))
            .header("Prefer", "return=minimal")
            .json(row);
        self.send(builder).await.map(|_| ())
    }

    /// Select rows with PostgREST query parameters such as
    /// `("timestamp", "gte.2024-01-01T00:00:00Z")`.
    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let builder = self.client.get(self.rest_url(table)).query(params);
        self.send(builder)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("{table} rows: {e}")))
    }
}

/// Vector search through a `match_documents`-style database function.
#[derive(Debug, Clone)]
pub struct SupabaseVectorStore {
    client: SupabaseClient,
    match_function: String,
}

impl SupabaseVectorStore {
    pub fn new(client: SupabaseClient, match_function: impl Into<String>) -> Self {
        Self {
            client,
            match_function: match_function.into(),
        }
    }
}

#[async_trait]
impl VectorStore for SupabaseVectorStore {
    async fn match_documents(&self, query: &MatchQuery) -> Result<Vec<Document>> {
        let args = serde_json::json!({
            "query_embedding": query.embedding,
            "match_threshold": query.threshold,
            "match_count": query.limit,
        });
        let mut docs: Vec<Document> = self.client.rpc(&self.match_function, &args).await?;
        docs.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        docs.truncate(query.limit);
        Ok(docs)
    }
}
