mod answer;
mod document;
mod grading;
mod query;
mod result;
mod verdict;

pub use answer::*;
pub use document::*;
pub use grading::*;
pub use query::*;
pub use result::*;
pub use verdict::*;
