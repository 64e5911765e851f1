//! Medir: concurrent measurement engine for LLM inference endpoints
//!
//! Medir drives N logical requests against pluggable inference backends
//! under explicit concurrency and rate bounds, stamps lifecycle events
//! (dispatch, first byte, per-token, completion) with a monotonic clock at
//! the moment they are observed, classifies and retries failures, and folds
//! every outcome into streaming, memory-bounded statistics.
//!
//! ## Architecture
//!
//! - [`clock`]: monotonic time source, probed once at startup
//! - [`backend`]: the capability interface; one implementation per remote
//!   API produces a lazy stream of lifecycle events
//! - [`timing`]: stamps and validates event streams, derives TTFT,
//!   inter-token gaps, and total duration
//! - [`classify`]: retry-or-give-up decisions with exponential backoff
//! - [`admission`]: the shared concurrency cap and token-bucket rate cap
//! - [`executor`]: the per-request state machine; exactly one [`Outcome`]
//!   per logical request
//! - [`aggregate`]: log-linear histograms and exact counters; mergeable,
//!   snapshot-able, never buffers raw samples
//! - [`orchestrator`]: scenario expansion, warmup, worker pool supervision,
//!   deadline and cancellation
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use medir::{MockBackend, MockFailure, Orchestrator, RetryPolicy, RunConfig, Scenario};
//!
//! #[tokio::main]
//! async fn main() -> medir::Result<()> {
//!     let config = RunConfig::new()
//!         .with_iterations(50)
//!         .with_concurrency(8)
//!         .with_warmup(5)
//!         .with_retry(RetryPolicy::new().with_max_attempts(3));
//!
//!     let mut orchestrator = Orchestrator::new(config);
//!     orchestrator.register_backend(Arc::new(
//!         MockBackend::new()
//!             .with_ttft(Duration::from_millis(2))
//!             .with_failures(3, MockFailure::Status(503)),
//!     ));
//!
//!     let scenario = Scenario::new("demo", "mock", "llama-7b")
//!         .with_prompt("Summarize the attached text.");
//!     let report = orchestrator.run(&scenario).await?;
//!
//!     assert_eq!(report.total, 50);
//!     println!("p99 ttft: {:?}us", report.ttft.quantile(0.99));
//!     Ok(())
//! }
//! ```
//!
//! The report is a plain serde-able snapshot; JSON/CSV/Prometheus exporters
//! live outside this crate, as do CLI parsing, config files, and the
//! concrete HTTP encodings per provider.

/// Admission control: concurrency cap and rate limiting
pub mod admission;
/// Streaming histograms, counters, and report snapshots
pub mod aggregate;
/// Backend capability interface and the scripted mock
pub mod backend;
/// Retry policy and failure classification
pub mod classify;
/// Monotonic time source
pub mod clock;
/// Error types
pub mod error;
/// Per-request lifecycle state machine
pub mod executor;
/// Run driver: expansion, warmup, workers, cancellation
pub mod orchestrator;
/// Request model
pub mod request;
/// Scenario definition and expansion
pub mod scenario;
/// Event stamping and timeline validation
pub mod timing;

pub use admission::{AdmissionController, AdmissionPermit, RateLimit};
pub use aggregate::{AggregatedReport, LatencyHistogram, MetricsAggregator};
pub use backend::{Backend, BackendRegistry, EventStream, MockBackend, MockFailure, RawEvent};
pub use classify::{RetryDecision, RetryPolicy};
pub use clock::{Clock, MonotonicClock};
pub use error::{ErrorKind, MedirError, Result};
pub use executor::{Outcome, OutcomeStatus, RequestExecutor, RequestState};
pub use orchestrator::{CancelHandle, Orchestrator, RunConfig};
pub use request::{GenerationParams, RequestSpec};
pub use scenario::{PromptCase, Scenario};
pub use timing::{AttemptMetrics, LifecycleEvent};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
