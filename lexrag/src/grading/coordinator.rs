use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::DocumentGrader;
use crate::backends::Generator;
use crate::config::GradingConfig;
use crate::models::{GradeResult, GradingMetrics, RetrievedDocument};

/// Grades and the documents that survived them.
#[derive(Debug, Clone, Default)]
pub struct GradingOutcome {
    /// Relevant documents in their original rank order.
    pub relevant: Vec<RetrievedDocument>,
    /// One grade per input document, in input order.
    pub grades: Vec<GradeResult>,
    pub metrics: GradingMetrics,
}

impl GradingOutcome {
    pub fn has_evidence(&self) -> bool {
        !self.relevant.is_empty()
    }
}

/// Corrective retrieval grading: grades documents in bounded concurrent
/// batches and keeps the relevant ones.
#[derive(Clone)]
pub struct GradingCoordinator {
    grader: DocumentGrader,
    concurrency: usize,
    timeout: Duration,
}

impl GradingCoordinator {
    pub fn new(generator: Arc<dyn Generator>, config: &GradingConfig) -> Self {
        Self {
            grader: DocumentGrader::new(generator, config.threshold),
            concurrency: config.concurrency.max(1),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// A timeout or error for one document yields a synthetic negative grade;
    /// the batch and the request continue.
    pub async fn grade_documents(
        &self,
        question: &str,
        documents: &[RetrievedDocument],
    ) -> GradingOutcome {
        let start = Instant::now();
        let mut slots: Vec<Option<GradeResult>> = vec![None; documents.len()];

        for (batch_index, batch) in documents.chunks(self.concurrency).enumerate() {
            let offset = batch_index * self.concurrency;

            let mut pending: FuturesUnordered<_> = batch
                .iter()
                .enumerate()
                .map(|(i, document)| async move {
                    let doc_start = Instant::now();
                    let grade = match tokio::time::timeout(
                        self.timeout,
                        self.grader.grade(question, document),
                    )
                    .await
                    {
                        Ok(Ok(grade)) => grade,
                        Ok(Err(e)) => {
                            tracing::warn!(doc_id = %document.id, error = %e, "Grading failed, marking not relevant");
                            GradeResult::synthetic(
                                &document.id,
                                "grading error",
                                doc_start.elapsed().as_millis() as u64,
                            )
                        }
                        Err(_) => {
                            tracing::warn!(
                                doc_id = %document.id,
                                timeout_ms = self.timeout.as_millis() as u64,
                                "Grading timed out, marking not relevant"
                            );
                            GradeResult::synthetic(
                                &document.id,
                                "grading timeout",
                                doc_start.elapsed().as_millis() as u64,
                            )
                        }
                    };
                    (offset + i, grade)
                })
                .collect();

            while let Some((index, grade)) = pending.next().await {
                slots[index] = Some(grade);
            }
        }

        let grades: Vec<GradeResult> = slots
            .into_iter()
            .zip(documents)
            .map(|(slot, document)| {
                slot.unwrap_or_else(|| GradeResult::synthetic(&document.id, "not graded", 0))
            })
            .collect();

        let relevant: Vec<RetrievedDocument> = documents
            .iter()
            .zip(&grades)
            .filter(|(_, grade)| grade.relevant)
            .map(|(document, _)| document.clone())
            .collect();

        let metrics = GradingMetrics::from_grades(&grades, start.elapsed().as_millis() as u64);

        tracing::info!(
            total = metrics.total,
            relevant = metrics.relevant,
            degraded = metrics.degraded,
            latency_ms = metrics.latency_ms,
            "Grading complete"
        );

        GradingOutcome {
            relevant,
            grades,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{GenerationOptions, GenerationStats, StreamChunk, TokenStream};
    use crate::error::{LexError, Result};
    use crate::models::{ChatMessage, GradeSource};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies per document title: "yes", "no", "slow" (sleeps), "error".
    /// Earlier documents finish later so completion order is reversed.
    struct TitleGrader {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl TitleGrader {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Generator for TitleGrader {
        async fn chat_stream(
            &self,
            messages: &[ChatMessage],
            _options: &GenerationOptions,
        ) -> Result<TokenStream> {
            let prompt = messages[0].content.clone();
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let call = self.calls.fetch_add(1, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(30u64.saturating_sub(call as u64 * 5))).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let reply = if prompt.contains("Dokument: slow") {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "{}"
            } else if prompt.contains("Dokument: error") {
                return Err(LexError::Llm("boom".to_string()));
            } else if prompt.contains("Dokument: yes") {
                r#"{"verdict": "yes", "score": 0.9, "reason": "ok"}"#
            } else {
                r#"{"verdict": "no", "score": 0.1, "reason": "nej"}"#
            };

            let chunks = vec![
                Ok(StreamChunk::token(reply)),
                Ok(StreamChunk::finished(GenerationStats::default())),
            ];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    fn coordinator(generator: Arc<dyn Generator>, concurrency: usize, timeout_ms: u64) -> GradingCoordinator {
        GradingCoordinator::new(
            generator,
            &GradingConfig {
                enabled: true,
                threshold: 0.5,
                concurrency,
                timeout_ms,
                self_reflection: false,
            },
        )
    }

    fn docs(titles: &[&str]) -> Vec<RetrievedDocument> {
        titles
            .iter()
            .enumerate()
            .map(|(i, title)| RetrievedDocument::new(format!("d{i}"), *title, "text"))
            .collect()
    }

    #[tokio::test]
    async fn test_results_reassembled_in_input_order() {
        let generator = Arc::new(TitleGrader::new());
        let documents = docs(&["yes", "no", "yes", "no", "yes"]);

        let outcome = coordinator(generator.clone(), 2, 1000)
            .grade_documents("fråga", &documents)
            .await;

        let ids: Vec<&str> = outcome.grades.iter().map(|g| g.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["d0", "d1", "d2", "d3", "d4"]);

        let relevant: Vec<&str> = outcome.relevant.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(relevant, vec!["d0", "d2", "d4"]);
        assert_eq!(outcome.metrics.total, 5);
        assert_eq!(outcome.metrics.relevant, 3);
        assert!(generator.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_timeout_and_error_become_synthetic_grades() {
        let generator = Arc::new(TitleGrader::new());
        let documents = docs(&["slow", "error", "yes"]);

        let outcome = coordinator(generator, 3, 200)
            .grade_documents("fråga", &documents)
            .await;

        assert_eq!(outcome.grades[0].source, GradeSource::Synthetic);
        assert_eq!(outcome.grades[0].reason, "grading timeout");
        assert_eq!(outcome.grades[1].source, GradeSource::Synthetic);
        assert_eq!(outcome.grades[1].reason, "grading error");
        assert!(outcome.grades[2].relevant);
        assert_eq!(outcome.metrics.degraded, 2);
        assert!(outcome.has_evidence());
    }

    #[tokio::test]
    async fn test_no_documents() {
        let outcome = coordinator(Arc::new(TitleGrader::new()), 4, 100)
            .grade_documents("fråga", &[])
            .await;
        assert!(!outcome.has_evidence());
        assert_eq!(outcome.metrics.total, 0);
    }
}
