//! Request model
//!
//! A [`RequestSpec`] is the immutable description of one logical request:
//! which backend and model to hit, the prompt payload, generation parameters,
//! and the per-request timeout. The orchestrator creates one per expanded
//! scenario case; everything downstream holds it behind an `Arc` and never
//! mutates it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sampling and generation parameters carried opaquely to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Maximum tokens to generate
    pub max_tokens: usize,
    /// Sampling temperature
    pub temperature: f64,
    /// Stop sequences, if any
    pub stop: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 128,
            temperature: 0.7,
            stop: Vec::new(),
        }
    }
}

impl GenerationParams {
    /// Create parameters with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set sampling temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set stop sequences
    #[must_use]
    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = stop;
        self
    }
}

/// Immutable description of one logical request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    /// Registered backend name this request targets
    pub backend: String,
    /// Model identifier, passed through to the backend untouched
    pub model: String,
    /// Input prompt
    pub prompt: String,
    /// Generation parameters
    pub params: GenerationParams,
    /// Per-request timeout covering the whole attempt
    pub timeout: Duration,
}

impl RequestSpec {
    /// Create a spec with default generation parameters and a 30s timeout
    #[must_use]
    pub fn new(backend: &str, model: &str, prompt: &str) -> Self {
        Self {
            backend: backend.to_string(),
            model: model.to_string(),
            prompt: prompt.to_string(),
            params: GenerationParams::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set generation parameters
    #[must_use]
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Set the per-request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_builder_chain() {
        let spec = RequestSpec::new("mock", "llama-7b", "hello")
            .with_params(GenerationParams::new().with_max_tokens(32))
            .with_timeout(Duration::from_secs(5));

        assert_eq!(spec.backend, "mock");
        assert_eq!(spec.params.max_tokens, 32);
        assert_eq!(spec.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_default_params() {
        let params = GenerationParams::default();
        assert_eq!(params.max_tokens, 128);
        assert!(params.stop.is_empty());
    }
}
