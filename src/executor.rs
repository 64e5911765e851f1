//! Request executor
//!
//! Drives one logical request through its full lifecycle:
//!
//! ```text
//! Pending -> Admitted -> InFlight -> Succeeded
//!                               \-> Retrying -> (back to Admitted)
//!                               \-> Failed
//!     any state ------------------> Cancelled
//! ```
//!
//! The concurrency slot is scoped to the attempt: it is released the moment
//! the attempt resolves, before any backoff sleep, and RAII guarantees
//! exactly one release on every path. The per-request timeout pre-empts
//! retry logic: a timed-out request is final. Cancellation is observed at
//! every suspension point; an attempt already in flight is allowed to finish
//! its network call but is never retried afterwards.
//!
//! Every call to [`RequestExecutor::drive`] produces exactly one [`Outcome`].

use std::sync::Arc;

use tokio::time::sleep;
use tracing::debug;

use crate::admission::{AdmissionClosed, AdmissionController};
use crate::backend::Backend;
use crate::classify::{RetryDecision, RetryPolicy};
use crate::clock::Clock;
use crate::error::{ErrorKind, MedirError};
use crate::orchestrator::CancelHandle;
use crate::request::RequestSpec;
use crate::timing::{observe_attempt, AttemptMetrics};

/// Lifecycle state of one logical request, for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Waiting for admission
    Pending,
    /// Holds a concurrency slot, not yet dispatched
    Admitted,
    /// Attempt dispatched, stream being consumed
    InFlight,
    /// Waiting out a backoff delay
    Retrying,
    /// Terminal: completed cleanly
    Succeeded,
    /// Terminal: gave up
    Failed,
    /// Terminal: run-level cancellation
    Cancelled,
}

impl RequestState {
    /// Stable name for logging
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Admitted => "admitted",
            Self::InFlight => "in_flight",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Terminal status of a logical request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Completed cleanly
    Success,
    /// Gave up with the given classification
    Failed(ErrorKind),
    /// Run-level cancellation pre-empted the request
    Cancelled,
}

/// The single terminal result of one logical request
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Terminal status
    pub status: OutcomeStatus,
    /// Attempts made, retries included (0 when cancelled before admission)
    pub attempts: usize,
    /// Derived timing metrics; present for successful requests
    pub metrics: Option<AttemptMetrics>,
}

/// Result of driving one logical request
#[derive(Debug)]
pub struct ExecutionResult {
    /// The request's single outcome
    pub outcome: Outcome,
    /// True when the admission controller was closed underneath the request;
    /// the orchestrator escalates this to a run-level abort
    pub aborted: bool,
}

/// Per-request lifecycle driver, shared by all worker tasks
pub struct RequestExecutor<C: Clock> {
    clock: C,
    admission: Arc<AdmissionController>,
    policy: RetryPolicy,
    cancel: CancelHandle,
}

impl<C: Clock> RequestExecutor<C> {
    /// Create an executor over the shared admission controller
    pub fn new(
        clock: C,
        admission: Arc<AdmissionController>,
        policy: RetryPolicy,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            clock,
            admission,
            policy,
            cancel,
        }
    }

    fn transition(state: &mut RequestState, next: RequestState) {
        debug!(from = state.as_str(), to = next.as_str(), "request state");
        *state = next;
    }

    /// Drive one logical request to its terminal state
    ///
    /// Cancellation-safe at every suspension point; never panics on backend
    /// misbehavior (malformed streams become classified failures).
    pub async fn drive(&self, backend: &dyn Backend, spec: &RequestSpec) -> ExecutionResult {
        let mut state = RequestState::Pending;
        let mut attempts = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                Self::transition(&mut state, RequestState::Cancelled);
                return Self::finish(OutcomeStatus::Cancelled, attempts, None, false);
            }

            // Pending -> Admitted: wait for a slot and a rate token, unless
            // cancellation or controller closure wins the race.
            let permit = tokio::select! {
                admitted = self.admission.admit() => match admitted {
                    Ok(permit) => permit,
                    Err(AdmissionClosed) => {
                        Self::transition(&mut state, RequestState::Cancelled);
                        return Self::finish(OutcomeStatus::Cancelled, attempts, None, true);
                    }
                },
                () = self.cancel.cancelled() => {
                    Self::transition(&mut state, RequestState::Cancelled);
                    return Self::finish(OutcomeStatus::Cancelled, attempts, None, false);
                }
            };
            Self::transition(&mut state, RequestState::Admitted);

            // Admitted -> InFlight: the attempt owns its slot until it
            // resolves. A raised cancellation no longer interrupts the
            // attempt itself; it only suppresses retries afterwards.
            Self::transition(&mut state, RequestState::InFlight);
            let attempt_index = attempts;
            attempts += 1;
            let attempt = tokio::time::timeout(
                spec.timeout,
                observe_attempt(&self.clock, backend.issue(spec)),
            )
            .await;
            drop(permit);

            let error = match attempt {
                Ok(Ok(metrics)) => {
                    Self::transition(&mut state, RequestState::Succeeded);
                    return Self::finish(OutcomeStatus::Success, attempts, Some(metrics), false);
                }
                Ok(Err(error)) => error,
                Err(_) => MedirError::Timeout {
                    elapsed: spec.timeout,
                },
            };

            // Timeout is final: it pre-empts classification entirely.
            if matches!(error, MedirError::Timeout { .. }) {
                Self::transition(&mut state, RequestState::Failed);
                return Self::finish(OutcomeStatus::Failed(ErrorKind::Timeout), attempts, None, false);
            }

            // The in-flight call was allowed to finish; a raised
            // cancellation now blocks the retry path.
            if self.cancel.is_cancelled() {
                Self::transition(&mut state, RequestState::Cancelled);
                return Self::finish(OutcomeStatus::Cancelled, attempts, None, false);
            }

            match self.policy.classify(&error, attempt_index) {
                RetryDecision::GiveUp(kind) => {
                    Self::transition(&mut state, RequestState::Failed);
                    return Self::finish(OutcomeStatus::Failed(kind), attempts, None, false);
                }
                RetryDecision::Retry { after } => {
                    Self::transition(&mut state, RequestState::Retrying);
                    debug!(delay_ms = after.as_millis() as u64, "backing off");
                    tokio::select! {
                        () = sleep(after) => {}
                        () = self.cancel.cancelled() => {
                            Self::transition(&mut state, RequestState::Cancelled);
                            return Self::finish(OutcomeStatus::Cancelled, attempts, None, false);
                        }
                    }
                }
            }
        }
    }

    fn finish(
        status: OutcomeStatus,
        attempts: usize,
        metrics: Option<AttemptMetrics>,
        aborted: bool,
    ) -> ExecutionResult {
        ExecutionResult {
            outcome: Outcome {
                status,
                attempts,
                metrics,
            },
            aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::RateLimit;
    use crate::backend::{MockBackend, MockFailure};
    use crate::clock::MonotonicClock;
    use std::time::Duration;

    fn executor(
        concurrency: usize,
        rate: Option<RateLimit>,
        policy: RetryPolicy,
    ) -> (RequestExecutor<MonotonicClock>, CancelHandle) {
        let cancel = CancelHandle::new();
        let admission = Arc::new(AdmissionController::new(concurrency, rate));
        (
            RequestExecutor::new(MonotonicClock::new(), admission, policy, cancel.clone()),
            cancel,
        )
    }

    fn spec() -> RequestSpec {
        RequestSpec::new("mock", "m", "p").with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_clean_success_single_attempt() {
        let (exec, _cancel) = executor(4, None, RetryPolicy::default());
        let backend = MockBackend::new().with_ttft(Duration::from_millis(1));

        let result = exec.drive(&backend, &spec()).await;
        assert_eq!(result.outcome.status, OutcomeStatus::Success);
        assert_eq!(result.outcome.attempts, 1);
        let metrics = result.outcome.metrics.unwrap();
        assert!(metrics.ttft.unwrap() <= metrics.total);
        assert!(!result.aborted);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_initial_backoff(Duration::from_millis(1))
            .with_jitter(0.0);
        let (exec, _cancel) = executor(4, None, policy);
        let backend = MockBackend::new()
            .with_ttft(Duration::from_micros(100))
            .with_failures(2, MockFailure::Status(500));

        let result = exec.drive(&backend, &spec()).await;
        assert_eq!(result.outcome.status, OutcomeStatus::Success);
        assert_eq!(result.outcome.attempts, 3);
        assert_eq!(backend.attempts_issued(), 3);
    }

    #[tokio::test]
    async fn test_client_error_fails_without_retry() {
        let (exec, _cancel) = executor(4, None, RetryPolicy::default().with_max_attempts(5));
        let backend = MockBackend::new()
            .with_ttft(Duration::from_micros(100))
            .with_failures(usize::MAX, MockFailure::Status(401));

        let result = exec.drive(&backend, &spec()).await;
        assert_eq!(result.outcome.status, OutcomeStatus::Failed(ErrorKind::Client));
        assert_eq!(result.outcome.attempts, 1);
        assert_eq!(backend.attempts_issued(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_initial_backoff(Duration::from_millis(1))
            .with_jitter(0.0);
        let (exec, _cancel) = executor(4, None, policy);
        let backend = MockBackend::new()
            .with_ttft(Duration::from_micros(100))
            .with_failures(usize::MAX, MockFailure::Transport);

        let result = exec.drive(&backend, &spec()).await;
        assert_eq!(
            result.outcome.status,
            OutcomeStatus::Failed(ErrorKind::RetriesExhausted)
        );
        assert_eq!(result.outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_timeout_preempts_retries() {
        let (exec, _cancel) = executor(4, None, RetryPolicy::default().with_max_attempts(5));
        let backend = MockBackend::new().with_ttft(Duration::from_secs(60));
        let spec = spec().with_timeout(Duration::from_millis(10));

        let result = exec.drive(&backend, &spec).await;
        assert_eq!(result.outcome.status, OutcomeStatus::Failed(ErrorKind::Timeout));
        assert_eq!(result.outcome.attempts, 1);
        assert_eq!(backend.gauge().current(), 0, "stream must be dropped");
    }

    #[tokio::test]
    async fn test_malformed_stream_fails_without_retry() {
        let (exec, _cancel) = executor(4, None, RetryPolicy::default().with_max_attempts(5));
        let backend = MockBackend::new()
            .with_ttft(Duration::from_micros(100))
            .with_failures(usize::MAX, MockFailure::MalformedOrder);

        let result = exec.drive(&backend, &spec()).await;
        assert_eq!(
            result.outcome.status,
            OutcomeStatus::Failed(ErrorKind::MalformedEventOrder)
        );
        assert_eq!(result.outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_initial_backoff(Duration::from_secs(60))
            .with_jitter(0.0);
        let (exec, cancel) = executor(4, None, policy);
        let backend = MockBackend::new()
            .with_ttft(Duration::from_micros(100))
            .with_failures(usize::MAX, MockFailure::Transport);

        let driver = tokio::spawn(async move {
            let spec = spec();
            exec.drive(&backend, &spec).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = driver.await.unwrap();
        assert_eq!(result.outcome.status, OutcomeStatus::Cancelled);
        assert_eq!(result.outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_admission() {
        let (exec, cancel) = executor(1, None, RetryPolicy::default());
        cancel.cancel();
        let backend = MockBackend::new();

        let result = exec.drive(&backend, &spec()).await;
        assert_eq!(result.outcome.status, OutcomeStatus::Cancelled);
        assert_eq!(result.outcome.attempts, 0);
        assert_eq!(backend.attempts_issued(), 0);
    }

    #[tokio::test]
    async fn test_closed_admission_reports_aborted() {
        let (exec, _cancel) = executor(1, None, RetryPolicy::default());
        exec.admission.close();
        let backend = MockBackend::new();

        let result = exec.drive(&backend, &spec()).await;
        assert_eq!(result.outcome.status, OutcomeStatus::Cancelled);
        assert!(result.aborted);
    }
}
