mod api;
mod json;
pub mod prompts;
mod provider;

pub use api::LlmApiClient;
pub use json::{extract_json_object, parse_json_reply};
pub use provider::{LlmBackend, LlmProvider};
