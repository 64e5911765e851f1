//! Scenario definition and expansion
//!
//! A [`Scenario`] names the backend and model under test plus the prompt
//! cases to cycle through. Expansion produces the bounded RequestSpec
//! sequence for a run: cases are dealt round-robin until the iteration
//! count is reached.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MedirError, Result};
use crate::request::{GenerationParams, RequestSpec};

/// One prompt variant within a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptCase {
    /// Input prompt
    pub prompt: String,
    /// Generation parameters for this case
    pub params: GenerationParams,
}

impl PromptCase {
    /// Create a case with default generation parameters
    #[must_use]
    pub fn new(prompt: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            params: GenerationParams::default(),
        }
    }

    /// Set generation parameters
    #[must_use]
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

/// The workload definition a run measures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name, for logs and reports
    pub name: String,
    /// Registered backend to target
    pub backend: String,
    /// Model identifier
    pub model: String,
    /// Prompt cases cycled round-robin
    pub cases: Vec<PromptCase>,
    /// Per-request timeout applied to every expanded spec
    pub timeout: Duration,
}

impl Scenario {
    /// Create a scenario with no cases yet
    #[must_use]
    pub fn new(name: &str, backend: &str, model: &str) -> Self {
        Self {
            name: name.to_string(),
            backend: backend.to_string(),
            model: model.to_string(),
            cases: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Add a prompt case
    #[must_use]
    pub fn with_case(mut self, case: PromptCase) -> Self {
        self.cases.push(case);
        self
    }

    /// Convenience: add a case from a bare prompt
    #[must_use]
    pub fn with_prompt(self, prompt: &str) -> Self {
        self.with_case(PromptCase::new(prompt))
    }

    /// Set the per-request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate the scenario is runnable
    ///
    /// # Errors
    ///
    /// Returns `MedirError::InvalidConfig` when no cases are defined.
    pub fn validate(&self) -> Result<()> {
        if self.cases.is_empty() {
            return Err(MedirError::InvalidConfig {
                message: format!("scenario '{}' has no prompt cases", self.name),
            });
        }
        Ok(())
    }

    /// Expand into exactly `iterations` request specs, round-robin over cases
    ///
    /// A scenario with no cases expands to nothing; [`validate`](Self::validate)
    /// rejects it before a run ever starts.
    #[must_use]
    pub fn expand(&self, iterations: usize) -> Vec<RequestSpec> {
        if self.cases.is_empty() {
            return Vec::new();
        }
        (0..iterations)
            .map(|i| {
                let case = &self.cases[i % self.cases.len()];
                RequestSpec::new(&self.backend, &self.model, &case.prompt)
                    .with_params(case.params.clone())
                    .with_timeout(self.timeout)
            })
            .collect()
    }
}
