//! Per-client throttle with idle visitor eviction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::bucket::TokenBucket;
use super::clock::{Clock, SystemClock};
use super::visitor::ClientKey;
use crate::config::ThrottleConfig;
use crate::error::Result;

/// Throttle state for one client.
struct Visitor {
    /// The client's bucket, shared with in-flight admission checks
    bucket: Arc<Mutex<TokenBucket>>,
    /// Last time the client was seen by `admit`
    last_seen: Instant,
}

/// Admission control keyed by client identity.
///
/// Each distinct [`ClientKey`] gets its own token bucket the first time it
/// is seen. A background sweep (see [`VisitorThrottle::run_sweeper`])
/// drops visitors that have been idle longer than the configured threshold.
///
/// The visitor table is guarded by a single lock that is held only to
/// create or refresh an entry; the bucket decision itself runs under the
/// visitor's own lock, so clients with different keys never wait on each
/// other's arithmetic.
pub struct VisitorThrottle {
    /// Visitors indexed by client key
    visitors: Mutex<HashMap<ClientKey, Visitor>>,
    /// Validated throttle settings
    config: ThrottleConfig,
    /// Time source for refill and staleness
    clock: Arc<dyn Clock>,
}

impl VisitorThrottle {
    /// Create a throttle that reads the system clock.
    pub fn new(config: ThrottleConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a throttle with an explicit time source.
    pub fn with_clock(config: ThrottleConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            visitors: Mutex::new(HashMap::new()),
            config,
            clock,
        })
    }

    /// Decide whether `key` may proceed right now.
    ///
    /// An unknown key starts with a full bucket. Never fails.
    pub fn admit(&self, key: &ClientKey) -> bool {
        let now = self.clock.now();

        let bucket = {
            let mut visitors = self.visitors.lock();
            match visitors.get_mut(key) {
                Some(visitor) => {
                    visitor.last_seen = now;
                    Arc::clone(&visitor.bucket)
                }
                None => {
                    debug!(
                        client = %key,
                        rate = self.config.requests_per_second,
                        burst = self.config.burst,
                        "Creating new visitor"
                    );
                    let bucket = Arc::new(Mutex::new(TokenBucket::new(
                        self.config.requests_per_second,
                        self.config.burst,
                        now,
                    )));
                    visitors.insert(
                        key.clone(),
                        Visitor {
                            bucket: Arc::clone(&bucket),
                            last_seen: now,
                        },
                    );
                    bucket
                }
            }
        };

        let allowed = bucket.lock().try_acquire(now);

        if allowed {
            trace!(client = %key, "Request admitted");
        } else {
            debug!(client = %key, "Rate limit exceeded");
        }

        allowed
    }

    /// Remove every visitor idle longer than the staleness threshold.
    ///
    /// A visitor whose last-seen instant lies after the current clock
    /// reading cannot be aged and is removed as well. Returns the number
    /// of visitors removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let stale_after = self.config.stale_after();

        let mut visitors = self.visitors.lock();
        let before = visitors.len();
        visitors.retain(|_, visitor| {
            now.checked_duration_since(visitor.last_seen)
                .is_some_and(|idle| idle <= stale_after)
        });
        let removed = before - visitors.len();

        debug!(
            removed = removed,
            remaining = visitors.len(),
            "Swept idle visitors"
        );

        removed
    }

    /// Run the sweep on a fixed interval until `shutdown` is cancelled.
    ///
    /// The first pass happens one interval after the call.
    pub async fn run_sweeper(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.config.sweep_interval();
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.sweep_interval_secs,
            stale_after_secs = self.config.stale_after_secs,
            "Visitor sweeper started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Visitor sweeper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep();
                }
            }
        }
    }

    /// Spawn [`run_sweeper`](Self::run_sweeper) onto the tokio runtime.
    ///
    /// The caller owns the handle and should cancel `shutdown` and await
    /// the handle when tearing down.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run_sweeper(shutdown))
    }

    /// Tokens currently available to `key`, or `None` if it is not tracked.
    ///
    /// Does not refresh the visitor's last-seen time.
    pub fn available_tokens(&self, key: &ClientKey) -> Option<f64> {
        let now = self.clock.now();
        let bucket = {
            let visitors = self.visitors.lock();
            Arc::clone(&visitors.get(key)?.bucket)
        };
        let available = bucket.lock().available(now);
        Some(available)
    }

    /// Get the number of tracked visitors.
    pub fn visitor_count(&self) -> usize {
        self.visitors.lock().len()
    }

    /// Get the throttle settings.
    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Forget all visitors.
    pub fn clear(&self) {
        self.visitors.lock().clear();
    }
}

impl std::fmt::Debug for VisitorThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisitorThrottle")
            .field("config", &self.config)
            .field("visitors", &self.visitor_count())
            .finish()
    }
}
