//! AI inference client used for automated review.

pub mod client;
pub mod json;

pub use client::{AiError, AnthropicClient, InferenceClient, UnconfiguredClient};
pub use json::extract_json_object;

#[cfg(test)]
pub use client::MockInferenceClient;
