//! Collaborators the pipeline depends on, and their concrete adapters.

mod fewshot;
mod reranker;
mod retrieval;
mod traits;

pub use fewshot::StaticExampleStore;
pub use reranker::{CrossEncoderReranker, ScoredIndex};
pub use retrieval::HttpRetriever;
pub use traits::*;
