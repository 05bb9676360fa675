//! Cohere rerank adapter.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ProviderError, Reranker, Result, http_client};

const SERVICE: &str = "cohere";

/// Reranks candidates through `POST /v1/rerank`.
#[derive(Debug, Clone)]
pub struct CohereReranker {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
}

impl CohereReranker {
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the API key is empty.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ProviderError::Config("Cohere API key is empty".into()));
        }
        Ok(Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl Reranker for CohereReranker {
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<usize>> {
        if documents.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "query": query,
            "documents": documents,
            "top_n": top_n.min(documents.len()),
        });
        let response = self
            .client
            .post(format!("{}/v1/rerank", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::request(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(SERVICE, status, &body));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("rerank response: {e}")))?;
        Ok(parsed.results.into_iter().map(|r| r.index).collect())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[tokio::test]
    async fn empty_candidates_skip_the_call() {
        let reranker = CohereReranker::new(
            "key",
            "http://127.0.0.1:9",
            "rerank-english-v3.0",
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(reranker.rerank("q", &[], 5).await.unwrap().is_empty());
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(CohereReranker::new("", "https://api.cohere.com", "m", Duration::from_secs(1)).is_err());
    }
}
