//! Backend capability interface
//!
//! A [`Backend`] turns a [`RequestSpec`] into a finite, non-restartable
//! stream of [`RawEvent`]s. The core never inspects provider identity beyond
//! routing by registered name; the concrete HTTP encoding for vLLM, Ollama,
//! llama.cpp and friends lives outside this crate, one implementation per
//! remote API.
//!
//! Raw events carry no timestamps. Stamping happens in the timing engine on
//! the task that receives each event, so a slow consumer cannot smear the
//! measured timeline.
//!
//! Errors must surface as a terminal [`RawEvent::Failed`] inside the stream,
//! never as a panic or an early return past the engine.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};

use crate::error::MedirError;
use crate::request::RequestSpec;

/// Untimestamped lifecycle signal emitted by a backend
#[derive(Debug)]
pub enum RawEvent {
    /// The request left the client; measurement starts here
    Dispatched,
    /// First response byte arrived
    FirstByte,
    /// One generated token (or chunk) arrived
    Token,
    /// Generation finished cleanly
    Completed {
        /// Backend-reported token count, when the API returns usage stats
        /// instead of streaming per-token (non-streaming endpoints)
        tokens: Option<usize>,
    },
    /// Attempt failed; terminal
    Failed(MedirError),
}

/// Boxed, finite, consume-once stream of raw events
pub type EventStream = Pin<Box<dyn Stream<Item = RawEvent> + Send>>;

/// Capability interface implemented once per remote API
pub trait Backend: Send + Sync {
    /// Registered name, matched against `RequestSpec::backend`
    fn name(&self) -> &str;

    /// Start one attempt. The returned stream is finite and cannot be
    /// restarted; a retry must call `issue` again.
    fn issue(&self, spec: &RequestSpec) -> EventStream;
}

/// Registry of available backends, keyed by name
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn Backend>>,
}

impl BackendRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own name
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    /// Look up a backend by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.get(name).cloned()
    }

    /// Names of all registered backends
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

// ============================================================================
// Mock backend
// ============================================================================

/// Failure a [`MockBackend`] is scripted to produce
#[derive(Debug, Clone, Copy)]
pub enum MockFailure {
    /// HTTP status error (5xx retryable, 429 rate-limited, other 4xx terminal)
    Status(u16),
    /// Connection-level failure
    Transport,
    /// Emit a Token after Completed to exercise order validation
    MalformedOrder,
}

impl MockFailure {
    fn to_error(self) -> MedirError {
        match self {
            Self::Status(status) => MedirError::from_status(status),
            Self::Transport => MedirError::transport("connection reset by peer"),
            // MalformedOrder is produced by the event sequence, not an error
            // payload; the timing engine detects it downstream.
            Self::MalformedOrder => MedirError::transport("unreachable"),
        }
    }
}

/// Deterministic scripted backend for tests and synthetic load
///
/// Emits `Dispatched`, then after `ttft` a `FirstByte` and the first token,
/// then `tokens - 1` further tokens spaced `inter_token` apart, then
/// `Completed`. The first `fail_first` attempts instead fail with the
/// scripted [`MockFailure`].
pub struct MockBackend {
    name: String,
    ttft: Duration,
    inter_token: Duration,
    tokens: usize,
    fail_first: usize,
    failure: MockFailure,
    issued: AtomicUsize,
    in_flight: Arc<InFlightGauge>,
}

/// Shared gauge tracking concurrent open streams and the peak seen
#[derive(Debug, Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    /// Streams currently open
    #[must_use]
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest simultaneous stream count observed
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl MockBackend {
    /// Create a mock named "mock" with 5ms TTFT, 1ms ITL, 8 tokens
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            ttft: Duration::from_millis(5),
            inter_token: Duration::from_millis(1),
            tokens: 8,
            fail_first: 0,
            failure: MockFailure::Transport,
            issued: AtomicUsize::new(0),
            in_flight: Arc::new(InFlightGauge::default()),
        }
    }

    /// Set the registered name
    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set time to first byte
    #[must_use]
    pub fn with_ttft(mut self, ttft: Duration) -> Self {
        self.ttft = ttft;
        self
    }

    /// Set the gap between consecutive tokens
    #[must_use]
    pub fn with_inter_token(mut self, inter_token: Duration) -> Self {
        self.inter_token = inter_token;
        self
    }

    /// Set tokens emitted per successful attempt
    #[must_use]
    pub fn with_tokens(mut self, tokens: usize) -> Self {
        self.tokens = tokens;
        self
    }

    /// Fail the first `n` attempts with the given failure, then succeed
    #[must_use]
    pub fn with_failures(mut self, n: usize, failure: MockFailure) -> Self {
        self.fail_first = n;
        self.failure = failure;
        self
    }

    /// Handle to the in-flight gauge, for concurrency assertions
    #[must_use]
    pub fn gauge(&self) -> Arc<InFlightGauge> {
        Arc::clone(&self.in_flight)
    }

    /// Attempts issued so far
    #[must_use]
    pub fn attempts_issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    fn schedule(&self, attempt: usize) -> Vec<(Duration, RawEvent)> {
        if attempt < self.fail_first {
            if matches!(self.failure, MockFailure::MalformedOrder) {
                return vec![
                    (Duration::ZERO, RawEvent::Dispatched),
                    (self.ttft, RawEvent::FirstByte),
                    (Duration::ZERO, RawEvent::Completed { tokens: None }),
                    (Duration::ZERO, RawEvent::Token),
                ];
            }
            return vec![
                (Duration::ZERO, RawEvent::Dispatched),
                (self.ttft, RawEvent::Failed(self.failure.to_error())),
            ];
        }

        let mut events = vec![
            (Duration::ZERO, RawEvent::Dispatched),
            (self.ttft, RawEvent::FirstByte),
            (Duration::ZERO, RawEvent::Token),
        ];
        for _ in 1..self.tokens {
            events.push((self.inter_token, RawEvent::Token));
        }
        events.push((Duration::ZERO, RawEvent::Completed { tokens: None }));
        events
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn issue(&self, _spec: &RequestSpec) -> EventStream {
        let attempt = self.issued.fetch_add(1, Ordering::SeqCst);
        let events = self.schedule(attempt);
        let gauge = Arc::clone(&self.in_flight);
        gauge.enter();

        let inner = futures::stream::iter(events).then(|(delay, event)| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            event
        });

        Box::pin(GaugedStream {
            inner: Box::pin(inner),
            gauge: Some(gauge),
        })
    }
}

/// Stream wrapper that releases the in-flight gauge exactly once, even when
/// the consumer drops the stream early (timeout or cancellation)
struct GaugedStream {
    inner: EventStream,
    gauge: Option<Arc<InFlightGauge>>,
}

impl Stream for GaugedStream {
    type Item = RawEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = self.inner.as_mut().poll_next(cx);
        if let Poll::Ready(None) = poll {
            if let Some(gauge) = self.gauge.take() {
                gauge.exit();
            }
        }
        poll
    }
}

impl Drop for GaugedStream {
    fn drop(&mut self) {
        if let Some(gauge) = self.gauge.take() {
            gauge.exit();
        }
    }
}
