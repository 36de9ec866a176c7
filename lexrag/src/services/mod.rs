mod events;
mod metrics;
mod orchestrator;
mod prefetch;
mod streaming;

pub use events::{Phase, StreamEvent};
pub use metrics::{MetricsRecorder, Stage};
pub use orchestrator::Orchestrator;
pub use prefetch::FewShotPrefetch;
pub use streaming::{split_tokens, EventStream};
