//! Retrieval-augmented question answering over Swedish statutes and
//! preparatory works.
//!
//! A question passes safety checks, is classified into a response mode,
//! retrieved against, graded for relevance, answered as structured JSON and
//! validated before anything reaches the caller. [`services::Orchestrator`]
//! drives the whole pipeline; every collaborator it talks to is a trait in
//! [`backends`].

pub mod backends;
pub mod classify;
pub mod config;
pub mod error;
pub mod generation;
pub mod grading;
pub mod guardrail;
pub mod llm;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{LexError, Result};
pub use models::{ProcessOptions, Query, RagResult};
pub use services::{Orchestrator, StreamEvent};
