use std::time::Instant;

use crate::models::PipelineMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Safety,
    Classify,
    Decontextualize,
    Retrieval,
    Rerank,
    Generation,
    Postprocess,
    Guardrail,
}

/// Accumulates [`PipelineMetrics`] during a run. Stage timings add up, so a
/// stage entered twice reports its total time.
#[derive(Debug)]
pub struct MetricsRecorder {
    started: Instant,
    metrics: PipelineMetrics,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::start()
    }
}

impl MetricsRecorder {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            metrics: PipelineMetrics::default(),
        }
    }

    pub fn record(&mut self, stage: Stage, since: Instant) {
        let elapsed = since.elapsed().as_millis() as u64;
        let slot = match stage {
            Stage::Safety => &mut self.metrics.safety_ms,
            Stage::Classify => &mut self.metrics.classify_ms,
            Stage::Decontextualize => &mut self.metrics.decontextualize_ms,
            Stage::Retrieval => &mut self.metrics.retrieval_ms,
            Stage::Rerank => &mut self.metrics.rerank_ms,
            Stage::Generation => &mut self.metrics.generation_ms,
            Stage::Postprocess => &mut self.metrics.postprocess_ms,
            Stage::Guardrail => &mut self.metrics.guardrail_ms,
        };
        *slot += elapsed;
    }

    pub fn metrics_mut(&mut self) -> &mut PipelineMetrics {
        &mut self.metrics
    }

    /// Copy of the metrics so far, with the running total filled in.
    pub fn snapshot(&self) -> PipelineMetrics {
        let mut metrics = self.metrics.clone();
        metrics.total_ms = self.started.elapsed().as_millis() as u64;
        metrics
    }

    pub fn finish(self) -> PipelineMetrics {
        let mut metrics = self.metrics;
        metrics.total_ms = self.started.elapsed().as_millis() as u64;
        metrics
    }
}
