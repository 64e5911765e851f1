//! Admission control
//!
//! Two independent limits compose here:
//!
//! - a concurrency cap: at most K attempts in flight system-wide, enforced
//!   by a FIFO semaphore whose permits release exactly once via RAII;
//! - an optional rate cap: a token bucket refilled continuously at R
//!   tokens/second up to `burst`, with reservation-based pacing so waiters
//!   are served in arrival order.
//!
//! Both waits are scheduler-yielding suspensions. The slot is taken before
//! the rate token so that tokens are consumed at the moment of issuance;
//! otherwise paced attempts could queue on the semaphore and then burst
//! through it faster than R.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Rate cap configuration: R admissions per second plus a burst allowance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Sustained admissions per second
    pub per_second: f64,
    /// Extra admissions allowed as an initial/recovered burst
    pub burst: u32,
}

impl RateLimit {
    /// Create a rate limit with the given sustained rate and burst
    #[must_use]
    pub fn new(per_second: f64, burst: u32) -> Self {
        Self { per_second, burst }
    }
}

/// The controller was closed; no further admissions will ever be granted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionClosed;

/// Scoped admission: holds one concurrency slot, released exactly once on drop
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Shared admission controller bounding in-flight attempts and issue rate
pub struct AdmissionController {
    slots: Arc<Semaphore>,
    concurrency: usize,
    bucket: Option<TokenBucket>,
}

impl AdmissionController {
    /// Create a controller with `concurrency` slots and an optional rate cap
    ///
    /// The bucket starts full, so the first `burst` admissions are not paced.
    #[must_use]
    pub fn new(concurrency: usize, rate: Option<RateLimit>) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            bucket: rate.map(TokenBucket::new),
        }
    }

    /// Wait until both the concurrency cap and the rate cap permit issuance
    ///
    /// FIFO among waiters: the semaphore queues fairly, and the bucket hands
    /// out reservation times under a FIFO lock. Dropping the returned future
    /// (cancellation) releases the slot; a reserved rate token may be
    /// stranded, which under-admits rather than over-admits.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionClosed`] once [`close`](Self::close) was called.
    pub async fn admit(&self) -> Result<AdmissionPermit, AdmissionClosed> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| AdmissionClosed)?;
        if let Some(bucket) = &self.bucket {
            bucket.acquire().await;
        }
        Ok(AdmissionPermit { _permit: permit })
    }

    /// Permanently stop granting admissions; pending waiters fail
    pub fn close(&self) {
        debug!("admission controller closed");
        self.slots.close();
    }

    /// Whether the controller has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Attempts currently holding a slot
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.concurrency - self.slots.available_permits()
    }

    /// Configured concurrency cap
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

/// Continuous-refill token bucket with FIFO reservations
///
/// Each acquirer debits one token under the lock; a negative balance encodes
/// already-promised tokens, and the acquirer sleeps until its reservation
/// matures. Because the lock queue is FIFO and each reservation pushes the
/// schedule strictly forward, arrival order is preserved and no more than
/// `rate + burst` acquisitions mature in any one-second window.
struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

impl TokenBucket {
    fn new(limit: RateLimit) -> Self {
        Self {
            rate: limit.per_second,
            burst: f64::from(limit.burst.max(1)),
            state: Mutex::new(BucketState {
                tokens: f64::from(limit.burst.max(1)),
                refilled_at: Instant::now(),
            }),
        }
    }

    async fn acquire(&self) {
        let wait = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let elapsed = now.duration_since(state.refilled_at);
            state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
            state.refilled_at = now;
            state.tokens -= 1.0;
            if state.tokens >= 0.0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(-state.tokens / self.rate)
            }
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
