use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use url::Url;

use super::Retriever;
use crate::config::RetrievalConfig;
use crate::error::{LexError, Result};
use crate::models::{ChatMessage, RetrievalOutcome, SearchFilter};

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a SearchFilter>,
    #[serde(skip_serializing_if = "is_empty_history")]
    history: &'a [ChatMessage],
}

fn is_empty_history(history: &&[ChatMessage]) -> bool {
    history.is_empty()
}

/// Retrieval backend reached over HTTP: `POST {base_url}/search`.
#[derive(Clone)]
pub struct HttpRetriever {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpRetriever {
    pub fn new(config: &RetrievalConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LexError::Retrieval(format!("Failed to create HTTP client: {e}")))?;

        let base = if config.base_url.ends_with('/') {
            config.base_url.clone()
        } else {
            format!("{}/", config.base_url)
        };
        let endpoint = Url::parse(&base)?.join("search")?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn search_with_routing(
        &self,
        query: &str,
        k: usize,
        filter: Option<&SearchFilter>,
        history: &[ChatMessage],
    ) -> Result<RetrievalOutcome> {
        let request = SearchRequest {
            query,
            k,
            filter,
            history,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LexError::Timeout {
                        stage: "retrieval",
                        after_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    LexError::Retrieval(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LexError::Retrieval(format!(
                "Retrieval backend returned {status}: {body}"
            )));
        }

        let outcome: RetrievalOutcome = response
            .json()
            .await
            .map_err(|e| LexError::Retrieval(format!("Failed to parse response: {e}")))?;

        tracing::debug!(
            documents = outcome.documents.len(),
            latency_ms = outcome.metrics.latency_ms,
            detected_intent = ?outcome.detected_intent,
            "Retrieval response received"
        );

        Ok(outcome)
    }
}
