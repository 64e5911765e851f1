//! Timing engine
//!
//! Converts a backend's raw event stream into a canonical, validated
//! timeline. Each event is stamped with the [`Clock`] the moment it is
//! received, on the same task that polled it; timestamps are never assigned
//! after a cross-task hand-off.
//!
//! Ordering is enforced, not trusted: a stream that dispatches twice, emits
//! a first byte after tokens, or produces anything after a terminal event is
//! rejected with [`MedirError::MalformedEventOrder`] and the attempt is
//! discarded. Fabricating a plausible timeline from a broken stream would
//! poison every percentile downstream.

use std::time::{Duration, Instant};

use futures::StreamExt;

use crate::backend::{EventStream, RawEvent};
use crate::clock::Clock;
use crate::error::{MedirError, Result};

/// A raw backend signal stamped at the moment of receipt
#[derive(Debug)]
pub enum LifecycleEvent {
    /// Request left the client
    Dispatched {
        /// Stamp taken when the dispatch signal was observed
        at: Instant,
    },
    /// First response byte arrived
    FirstByte {
        /// Stamp taken when the first byte was observed
        at: Instant,
    },
    /// One generated token arrived
    Token {
        /// 0-based token index within the attempt
        index: usize,
        /// Stamp taken when the token was observed
        at: Instant,
    },
    /// Attempt finished cleanly
    Completed {
        /// Stamp taken at completion
        at: Instant,
    },
    /// Attempt failed
    Failed {
        /// Stamp taken when the failure was observed
        at: Instant,
        /// The failure itself
        error: MedirError,
    },
}

/// Canonical interval metrics derived from one attempt's timeline
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptMetrics {
    /// Time from dispatch to first byte; None when the attempt produced no
    /// response bytes at all
    pub ttft: Option<Duration>,
    /// Time from dispatch to the terminal event
    pub total: Duration,
    /// Gaps between consecutive tokens, in arrival order
    pub inter_token: Vec<Duration>,
    /// Tokens observed (stream count, or the backend's usage report for
    /// non-streaming endpoints)
    pub tokens: usize,
}

impl AttemptMetrics {
    /// Generation throughput over the whole attempt
    #[must_use]
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.total.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.tokens as f64 / secs
    }
}

/// Incremental timeline validator and metric deriver
///
/// Feed events in arrival order via [`observe`](Self::observe); any ordering
/// violation fails immediately. [`finish`](Self::finish) yields the derived
/// metrics once a clean terminal event was seen.
#[derive(Debug, Default)]
pub struct TimelineRecorder {
    dispatched_at: Option<Instant>,
    first_byte_at: Option<Instant>,
    last_token_at: Option<Instant>,
    terminal_at: Option<Instant>,
    inter_token: Vec<Duration>,
    tokens_seen: usize,
    tokens_reported: Option<usize>,
    failure: Option<MedirError>,
}

impl TimelineRecorder {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn malformed(detail: &str) -> MedirError {
        MedirError::MalformedEventOrder {
            detail: detail.to_string(),
        }
    }

    /// Observe the next stamped event
    ///
    /// # Errors
    ///
    /// Returns `MedirError::MalformedEventOrder` when the event violates the
    /// lifecycle ordering (duplicate dispatch, first byte after tokens,
    /// anything after a terminal event, or a non-dispatch first event).
    pub fn observe(&mut self, event: LifecycleEvent) -> Result<()> {
        if self.terminal_at.is_some() {
            return Err(Self::malformed("event after terminal event"));
        }
        match event {
            LifecycleEvent::Dispatched { at } => {
                if self.dispatched_at.is_some() {
                    return Err(Self::malformed("duplicate Dispatched"));
                }
                self.dispatched_at = Some(at);
            }
            LifecycleEvent::FirstByte { at } => {
                if self.dispatched_at.is_none() {
                    return Err(Self::malformed("FirstByte before Dispatched"));
                }
                if self.first_byte_at.is_some() {
                    return Err(Self::malformed("duplicate FirstByte"));
                }
                self.first_byte_at = Some(at);
            }
            LifecycleEvent::Token { at, .. } => {
                if self.dispatched_at.is_none() {
                    return Err(Self::malformed("Token before Dispatched"));
                }
                // A backend may skip the explicit FirstByte signal; the first
                // token then carries the first response byte.
                if self.first_byte_at.is_none() {
                    self.first_byte_at = Some(at);
                }
                if let Some(prev) = self.last_token_at {
                    self.inter_token.push(at.saturating_duration_since(prev));
                }
                self.last_token_at = Some(at);
                self.tokens_seen += 1;
            }
            LifecycleEvent::Completed { at } => {
                if self.dispatched_at.is_none() {
                    return Err(Self::malformed("Completed before Dispatched"));
                }
                self.terminal_at = Some(at);
            }
            LifecycleEvent::Failed { at, error } => {
                if self.dispatched_at.is_none() {
                    return Err(Self::malformed("Failed before Dispatched"));
                }
                self.terminal_at = Some(at);
                self.failure = Some(error);
            }
        }
        Ok(())
    }

    /// Record a backend-reported token count (usage stats)
    pub fn report_tokens(&mut self, tokens: usize) {
        self.tokens_reported = Some(tokens);
    }

    /// Token index for the next Token event
    #[must_use]
    pub fn next_token_index(&self) -> usize {
        self.tokens_seen
    }

    /// Finalize the attempt
    ///
    /// # Errors
    ///
    /// - The attempt's own failure, if the terminal event was `Failed`
    /// - `MedirError::Transport` when the stream ended with no terminal event
    pub fn finish(mut self) -> Result<AttemptMetrics> {
        if let Some(error) = self.failure.take() {
            return Err(error);
        }
        let (Some(dispatched_at), Some(terminal_at)) = (self.dispatched_at, self.terminal_at)
        else {
            return Err(MedirError::transport(
                "event stream ended without a terminal event",
            ));
        };
        let tokens = match self.tokens_reported {
            Some(reported) if self.tokens_seen == 0 => reported,
            _ => self.tokens_seen,
        };
        Ok(AttemptMetrics {
            ttft: self
                .first_byte_at
                .map(|fb| fb.saturating_duration_since(dispatched_at)),
            total: terminal_at.saturating_duration_since(dispatched_at),
            inter_token: self.inter_token,
            tokens,
        })
    }
}

/// Drive one attempt's event stream to completion, stamping on receipt
///
/// Consumes the stream fully, so a token arriving after a terminal event is
/// caught rather than silently left unpolled.
///
/// # Errors
///
/// - `MedirError::MalformedEventOrder` on any ordering violation
/// - the backend's own terminal failure
/// - `MedirError::Transport` when the stream ends without a terminal event
pub async fn observe_attempt<C: Clock>(clock: &C, mut stream: EventStream) -> Result<AttemptMetrics> {
    let mut recorder = TimelineRecorder::new();

    while let Some(raw) = stream.next().await {
        let at = clock.now();
        let event = match raw {
            RawEvent::Dispatched => LifecycleEvent::Dispatched { at },
            RawEvent::FirstByte => LifecycleEvent::FirstByte { at },
            RawEvent::Token => LifecycleEvent::Token {
                index: recorder.next_token_index(),
                at,
            },
            RawEvent::Completed { tokens } => {
                if let Some(tokens) = tokens {
                    recorder.report_tokens(tokens);
                }
                LifecycleEvent::Completed { at }
            }
            RawEvent::Failed(error) => LifecycleEvent::Failed { at, error },
        };
        recorder.observe(event)?;
    }

    recorder.finish()
}
