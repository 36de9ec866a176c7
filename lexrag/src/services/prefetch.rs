use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backends::{ExampleStore, FewShotExample};
use crate::classify::Intent;

/// Few-shot lookup started alongside retrieval and joined at prompt
/// assembly. Cancellation and failure both yield an empty example set.
pub struct FewShotPrefetch {
    intent: Intent,
    handle: Option<JoinHandle<Vec<FewShotExample>>>,
    token: CancellationToken,
}

impl FewShotPrefetch {
    /// Spawns the lookup on a child of `parent`, so cancelling the request
    /// cancels the prefetch too.
    pub fn spawn(
        store: Arc<dyn ExampleStore>,
        intent: Intent,
        limit: usize,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => {
                    tracing::debug!(%intent, "Few-shot prefetch cancelled");
                    Vec::new()
                }
                result = store.examples_for(intent, limit) => match result {
                    Ok(examples) => examples,
                    Err(e) => {
                        tracing::warn!(%intent, error = %e, "Few-shot prefetch failed, continuing without examples");
                        Vec::new()
                    }
                },
            }
        });

        Self {
            intent,
            handle: Some(handle),
            token,
        }
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn join(mut self) -> Vec<FewShotExample> {
        let Some(handle) = self.handle.take() else {
            return Vec::new();
        };

        match handle.await {
            Ok(examples) => examples,
            Err(e) => {
                tracing::warn!(error = %e, "Few-shot prefetch task failed");
                Vec::new()
            }
        }
    }

    /// Like [`join`](Self::join), but gives up after `limit` and cancels the
    /// lookup.
    pub async fn join_within(self, limit: Duration) -> Vec<FewShotExample> {
        let intent = self.intent;
        match tokio::time::timeout(limit, self.join()).await {
            Ok(examples) => examples,
            Err(_) => {
                tracing::warn!(%intent, after_ms = limit.as_millis() as u64, "Few-shot prefetch timed out, continuing without examples");
                Vec::new()
            }
        }
    }
}

impl Drop for FewShotPrefetch {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LexError, Result};
    use async_trait::async_trait;

    struct Store {
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl ExampleStore for Store {
        async fn examples_for(&self, intent: Intent, _limit: usize) -> Result<Vec<FewShotExample>> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(LexError::Internal("store down".to_string()));
            }
            Ok(vec![FewShotExample {
                intent,
                question: "q".to_string(),
                answer: "a".to_string(),
            }])
        }
    }

    fn spawn(delay_ms: u64, fail: bool, parent: &CancellationToken) -> FewShotPrefetch {
        FewShotPrefetch::spawn(
            Arc::new(Store {
                delay: Duration::from_millis(delay_ms),
                fail,
            }),
            Intent::Procedure,
            3,
            parent,
        )
    }

    #[tokio::test]
    async fn test_join_returns_examples() {
        let prefetch = spawn(5, false, &CancellationToken::new());
        assert_eq!(prefetch.join().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_yields_empty() {
        let prefetch = spawn(5_000, false, &CancellationToken::new());
        prefetch.cancel();
        assert!(prefetch.is_cancelled());
        assert!(prefetch.join().await.is_empty());
    }

    #[tokio::test]
    async fn test_parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let prefetch = spawn(5_000, false, &parent);
        parent.cancel();
        assert!(prefetch.join().await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_yields_empty() {
        let prefetch = spawn(1, true, &CancellationToken::new());
        assert!(prefetch.join().await.is_empty());
    }

    #[tokio::test]
    async fn test_join_within_gives_up_on_slow_store() {
        let parent = CancellationToken::new();
        let prefetch = spawn(60_000, false, &parent);
        let started = std::time::Instant::now();

        let examples = prefetch.join_within(Duration::from_millis(50)).await;

        assert!(examples.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_join_within_returns_ready_examples() {
        let prefetch = spawn(5, false, &CancellationToken::new());
        assert_eq!(prefetch.join_within(Duration::from_secs(2)).await.len(), 1);
    }
}
