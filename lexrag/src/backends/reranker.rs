use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankResult as FastEmbedRerankResult, RerankerModel, TextRerank};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::Reranker;
use crate::config::RerankerConfig;
use crate::error::{LexError, Result};
use crate::models::{RerankOutcome, RetrievedDocument};

/// Score for one input document, by position in the input list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredIndex {
    pub index: usize,
    pub score: f32,
}

impl From<FastEmbedRerankResult> for ScoredIndex {
    fn from(result: FastEmbedRerankResult) -> Self {
        Self {
            index: result.index,
            score: result.score,
        }
    }
}

#[derive(Clone)]
enum RerankerBackend {
    Local(Arc<Mutex<TextRerank>>),
    /// Fixed scores by input position, for tests and offline runs.
    Scripted(Arc<Vec<f32>>),
}

/// Cross-encoder reranker over FastEmbed's `TextRerank`.
#[derive(Clone)]
pub struct CrossEncoderReranker {
    backend: RerankerBackend,
    batch_size: usize,
}

impl CrossEncoderReranker {
    /// Loads the model. Returns `Ok(None)` when reranking is disabled.
    pub async fn new_async(config: &RerankerConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }

        let reranker_model = Self::parse_model(&config.model)?;
        let cache_dir = PathBuf::from(&config.cache_dir);

        // Model download and ONNX session setup block for seconds.
        let model = tokio::task::spawn_blocking(move || {
            TextRerank::try_new(
                RerankInitOptions::new(reranker_model)
                    .with_cache_dir(cache_dir)
                    .with_show_download_progress(true),
            )
        })
        .await
        .map_err(|e| LexError::Internal(format!("Reranker init task failed: {e}")))?
        .map_err(|e| LexError::Reranker(format!("Failed to initialize reranker: {e}")))?;

        tracing::info!(model = %config.model, "Cross-encoder reranker loaded");

        Ok(Some(Self {
            backend: RerankerBackend::Local(Arc::new(Mutex::new(model))),
            batch_size: config.batch_size,
        }))
    }

    pub fn new_scripted(scores: Vec<f32>) -> Self {
        Self {
            backend: RerankerBackend::Scripted(Arc::new(scores)),
            batch_size: 32,
        }
    }

    fn parse_model(model_name: &str) -> Result<RerankerModel> {
        match model_name {
            "bge-reranker-base" | "BAAI/bge-reranker-base" => Ok(RerankerModel::BGERerankerBase),
            "bge-reranker-v2-m3" | "rozgo/bge-reranker-v2-m3" => {
                Ok(RerankerModel::BGERerankerV2M3)
            }
            "jina-reranker-v2-base-multilingual"
            | "jinaai/jina-reranker-v2-base-multilingual" => {
                Ok(RerankerModel::JINARerankerV2BaseMultiligual)
            }
            _ => Err(LexError::Reranker(format!(
                "Unsupported reranker model: {model_name}. Supported models: bge-reranker-base, bge-reranker-v2-m3, jina-reranker-v2-base-multilingual"
            ))),
        }
    }

    async fn score(&self, query: &str, texts: Vec<String>) -> Result<Vec<ScoredIndex>> {
        match &self.backend {
            RerankerBackend::Local(model) => {
                let model = Arc::clone(model);
                let query = query.to_string();
                let batch_size = self.batch_size;

                tokio::task::spawn_blocking(move || {
                    let mut model = model.lock().unwrap_or_else(|e| e.into_inner());
                    let doc_refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
                    model
                        .rerank(query.as_str(), &doc_refs, false, Some(batch_size))
                        .map(|results| {
                            results.into_iter().map(ScoredIndex::from).collect::<Vec<_>>()
                        })
                        .map_err(|e| LexError::Reranker(format!("Reranking failed: {e}")))
                })
                .await
                .map_err(|e| LexError::Internal(format!("Reranker task failed: {e}")))?
            }
            RerankerBackend::Scripted(scores) => {
                let mut scored: Vec<ScoredIndex> = (0..texts.len())
                    .map(|index| ScoredIndex {
                        index,
                        score: scores.get(index).copied().unwrap_or(0.0),
                    })
                    .collect();
                scored.sort_by(|a, b| b.score.total_cmp(&a.score));
                Ok(scored)
            }
        }
    }
}

#[async_trait]
impl Reranker for CrossEncoderReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<RetrievedDocument>,
        top_k: usize,
    ) -> Result<RerankOutcome> {
        if documents.is_empty() || top_k == 0 {
            return Ok(RerankOutcome::default());
        }

        let texts: Vec<String> = documents
            .iter()
            .map(|doc| format!("{}\n{}", doc.title, doc.snippet))
            .collect();

        let ranked = self.score(query, texts).await?;

        let mut slots: Vec<Option<RetrievedDocument>> = documents.into_iter().map(Some).collect();
        let mut outcome = RerankOutcome::default();

        for scored in ranked.into_iter().take(top_k) {
            if let Some(doc) = slots.get_mut(scored.index).and_then(Option::take) {
                outcome.documents.push(doc);
                outcome.scores.push(scored.score);
            }
        }

        Ok(outcome)
    }
}
