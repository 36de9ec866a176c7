use serde::{Deserialize, Serialize};

/// How a grade was obtained. Determines its confidence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GradeSource {
    /// Parsed from the constrained JSON output.
    Structured,
    /// Recovered by scanning malformed output for keywords.
    Keyword,
    /// Produced without a model verdict (timeout or error).
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradeResult {
    pub doc_id: String,
    pub relevant: bool,
    pub reason: String,
    pub score: f32,
    pub confidence: f32,
    pub latency_ms: u64,
    pub source: GradeSource,
}

impl GradeResult {
    /// Negative grade used when the grading call could not produce a verdict.
    pub fn synthetic(doc_id: impl Into<String>, reason: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            doc_id: doc_id.into(),
            relevant: false,
            reason: reason.into(),
            score: 0.0,
            confidence: 0.0,
            latency_ms,
            source: GradeSource::Synthetic,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GradingMetrics {
    pub total: usize,
    pub relevant: usize,
    pub mean_score: f32,
    pub latency_ms: u64,
    /// Grades that had to be synthesized after a timeout or error.
    pub degraded: usize,
}

impl GradingMetrics {
    pub fn from_grades(grades: &[GradeResult], latency_ms: u64) -> Self {
        let total = grades.len();
        let relevant = grades.iter().filter(|g| g.relevant).count();
        let mean_score = if total == 0 {
            0.0
        } else {
            grades.iter().map(|g| g.score).sum::<f32>() / total as f32
        };
        let degraded = grades
            .iter()
            .filter(|g| g.source == GradeSource::Synthetic)
            .count();

        Self {
            total,
            relevant,
            mean_score,
            latency_ms,
            degraded,
        }
    }
}
