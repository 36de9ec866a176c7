//! Corrective retrieval grading (CRAG) and optional self-reflection.

mod coordinator;
mod grader;
mod reflection;

pub use coordinator::{GradingCoordinator, GradingOutcome};
pub use grader::{parse_grade, DocumentGrader};
pub use reflection::{ReflectionVerdict, SelfReflector};
