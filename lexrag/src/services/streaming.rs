use std::pin::Pin;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use unicode_segmentation::UnicodeSegmentation;

use super::events::StreamEvent;
use super::orchestrator::Orchestrator;
use crate::models::{ProcessOptions, Query};

/// Bound on buffered events; a slow consumer applies backpressure.
const EVENT_BUFFER: usize = 64;

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Where a run reports its progress. Disabled for non-streaming calls.
#[derive(Clone, Default)]
pub(crate) struct EventSink {
    tx: Option<mpsc::Sender<StreamEvent>>,
}

impl EventSink {
    pub(crate) fn disabled() -> Self {
        Self { tx: None }
    }

    pub(crate) fn channel(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub(crate) async fn emit(&self, event: StreamEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(event).await.is_err() {
            tracing::debug!("Stream consumer disconnected, dropping event");
        }
    }
}

/// Word-boundary segments of validated answer text, in order. Joining them
/// reproduces the text exactly.
pub fn split_tokens(text: &str) -> Vec<String> {
    text.split_word_bounds().map(str::to_string).collect()
}

impl Orchestrator {
    /// Runs the pipeline on a background task and yields its events as they
    /// happen. The stream ends after exactly one `done` or `error` event.
    /// Dropping the stream cancels the run.
    pub fn stream(&self, query: Query, options: ProcessOptions) -> EventStream {
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let orchestrator = self.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let sink = EventSink::channel(tx);
            orchestrator.execute(query, options, &sink, &token).await;
        });

        let guard = cancel.drop_guard();
        Box::pin(async_stream::stream! {
            let _guard = guard;
            while let Some(event) = rx.recv().await {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    break;
                }
            }
        })
    }
}
