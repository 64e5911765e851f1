//! Run orchestration
//!
//! Expands a scenario into its request population, runs the warmup phase
//! (whose outcomes are discarded), then drives the measured population
//! through a bounded worker pool and returns the final aggregated report.
//!
//! A single attempt failing never aborts a run. The run itself ends on
//! completion, on the optional deadline, or on cancellation. If the
//! admission controller is closed underneath it and can no longer admit
//! anything, the run ends with [`MedirError::RunAborted`] carrying the
//! partial report.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::admission::{AdmissionController, RateLimit};
use crate::aggregate::{AggregatedReport, MetricsAggregator};
use crate::backend::{Backend, BackendRegistry};
use crate::classify::RetryPolicy;
use crate::clock::MonotonicClock;
use crate::error::{MedirError, Result};
use crate::executor::RequestExecutor;
use crate::request::RequestSpec;
use crate::scenario::Scenario;

/// Run-scoped cancellation signal
///
/// Cloneable; every suspension point in the pipeline observes a raised
/// signal within one scheduling quantum. Raising it is idempotent.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    /// Create an unraised signal
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Raise the signal
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether the signal has been raised
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Suspend until the signal is raised
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for one measurement run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Logical requests in the measured population
    pub iterations: usize,
    /// Maximum attempts in flight at any instant
    pub concurrency: usize,
    /// Optional issue-rate cap
    pub rate: Option<RateLimit>,
    /// Requests run (and discarded) before measurement begins
    pub warmup: usize,
    /// Retry policy applied per logical request
    pub retry: RetryPolicy,
    /// Wall-clock bound on the measured phase; expiry cancels what remains
    pub deadline: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            concurrency: 10,
            rate: None,
            warmup: 0,
            retry: RetryPolicy::default(),
            deadline: None,
        }
    }
}

impl RunConfig {
    /// Create a config with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the measured iteration count
    #[must_use]
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the concurrency cap
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the rate cap
    #[must_use]
    pub fn with_rate(mut self, rate: RateLimit) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Set the warmup request count
    #[must_use]
    pub fn with_warmup(mut self, warmup: usize) -> Self {
        self.warmup = warmup;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the run deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Validate field ranges
    ///
    /// # Errors
    ///
    /// Returns `MedirError::InvalidConfig` when a field is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(MedirError::InvalidConfig {
                message: "concurrency must be at least 1".to_string(),
            });
        }
        if let Some(rate) = &self.rate {
            if rate.per_second <= 0.0 || !rate.per_second.is_finite() {
                return Err(MedirError::InvalidConfig {
                    message: format!("rate.per_second must be positive, got {}", rate.per_second),
                });
            }
        }
        self.retry.validate()
    }
}

/// Top-level driver for measurement runs
pub struct Orchestrator {
    config: RunConfig,
    registry: BackendRegistry,
    cancel: CancelHandle,
}

impl Orchestrator {
    /// Create an orchestrator for the given run configuration
    #[must_use]
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            registry: BackendRegistry::new(),
            cancel: CancelHandle::new(),
        }
    }

    /// Register a backend the scenario can target
    pub fn register_backend(&mut self, backend: Arc<dyn Backend>) {
        self.registry.register(backend);
    }

    /// Handle for cancelling the run from outside
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Execute one run of the scenario and return the final report
    ///
    /// # Errors
    ///
    /// - `MedirError::InvalidConfig` for bad config, an unknown backend, or
    ///   an empty scenario
    /// - `MedirError::ClockUnavailable` when the monotonic source is unusable
    /// - `MedirError::RunAborted` (partial report attached) when admission
    ///   is permanently closed mid-run
    pub async fn run(&self, scenario: &Scenario) -> Result<AggregatedReport> {
        self.config.validate()?;
        scenario.validate()?;
        let clock = MonotonicClock::probe()?;
        let backend = self.registry.get(&scenario.backend).ok_or_else(|| {
            MedirError::InvalidConfig {
                message: format!("no backend registered under '{}'", scenario.backend),
            }
        })?;

        let admission = Arc::new(AdmissionController::new(
            self.config.concurrency,
            self.config.rate,
        ));
        let executor = Arc::new(RequestExecutor::new(
            clock,
            Arc::clone(&admission),
            self.config.retry.clone(),
            self.cancel.clone(),
        ));

        info!(
            scenario = %scenario.name,
            iterations = self.config.iterations,
            concurrency = self.config.concurrency,
            warmup = self.config.warmup,
            "starting run"
        );

        if self.config.warmup > 0 && !self.cancel.is_cancelled() {
            debug!(count = self.config.warmup, "warmup phase");
            let warmup_specs = scenario.expand(self.config.warmup);
            self.run_phase(&executor, &backend, warmup_specs, None).await;
        }

        let specs = scenario.expand(self.config.iterations);
        let expected = specs.len() as u64;
        let aggregator = Arc::new(MetricsAggregator::new());

        let aborted = {
            let phase = self.run_phase(&executor, &backend, specs, Some(Arc::clone(&aggregator)));
            match self.config.deadline {
                None => phase.await,
                Some(deadline) => {
                    let mut phase = Box::pin(phase);
                    tokio::select! {
                        aborted = &mut phase => aborted,
                        () = sleep(deadline) => {
                            warn!(?deadline, "run deadline reached, cancelling remainder");
                            self.cancel.cancel();
                            phase.await
                        }
                    }
                }
            }
        };

        let report = aggregator.snapshot();
        if report.total != expected {
            // Every expanded spec must produce exactly one outcome.
            warn!(
                folded = report.total,
                expected, "outcome accounting mismatch"
            );
        }
        if aborted {
            return Err(MedirError::RunAborted {
                reason: "admission controller closed while requests were pending".to_string(),
                partial: Box::new(report),
            });
        }

        info!(
            success = report.success,
            failed = report.failed(),
            cancelled = report.cancelled,
            "run complete"
        );
        Ok(report)
    }

    /// Drive one population of specs through a bounded worker pool
    ///
    /// Returns true when any worker saw the admission controller closed.
    async fn run_phase(
        &self,
        executor: &Arc<RequestExecutor<MonotonicClock>>,
        backend: &Arc<dyn Backend>,
        specs: Vec<RequestSpec>,
        aggregator: Option<Arc<MetricsAggregator>>,
    ) -> bool {
        if specs.is_empty() {
            return false;
        }
        let workers = self.config.concurrency.min(specs.len());
        let (tx, rx) = mpsc::channel::<RequestSpec>(specs.len());
        for spec in specs {
            // Capacity equals the population size, so this never suspends.
            let _ = tx.send(spec).await;
        }
        drop(tx);
        let rx = Arc::new(Mutex::new(rx));
        let aborted = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let executor = Arc::clone(executor);
                let backend = Arc::clone(backend);
                let rx = Arc::clone(&rx);
                let aggregator = aggregator.clone();
                let aborted = Arc::clone(&aborted);
                tokio::spawn(async move {
                    loop {
                        let spec = rx.lock().await.recv().await;
                        let Some(spec) = spec else { break };
                        let result = executor.drive(backend.as_ref(), &spec).await;
                        if let Some(aggregator) = &aggregator {
                            aggregator.record(&result.outcome);
                        }
                        if result.aborted {
                            aborted.store(true, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for joined in join_all(handles).await {
            if joined.is_err() {
                warn!("worker task panicked");
            }
        }
        aborted.load(Ordering::SeqCst)
    }
}
