//! Fixed-window rate limiting
//!
//! A process-local counter keyed by client identifier. Each key owns at most
//! one active window; once a window's reset time passes, the next request
//! replaces the entry rather than incrementing it, so admit/reject decisions
//! never depend on the background sweep having run.
//!
//! This is a fixed window, not a true sliding one: a client sending `limit`
//! requests just before a boundary and `limit` just after gets up to
//! `2 * limit` through in a short span. That approximation is accepted; the
//! limiter is advisory, not a security boundary. Counters are per-process
//! and are neither persisted nor shared across instances.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Time source. Injected so tests can drive window expiry deterministically.
pub trait Clock: Send + Sync {
    /// Current time as epoch milliseconds.
    fn now_ms(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Per-call budget: `limit` requests per `window_secs` window.
///
/// Callers are responsible for supplying positive values; the limiter does
/// not validate configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub const fn per_minute(limit: u32) -> Self {
        RateLimitConfig {
            limit,
            window_secs: 60,
        }
    }
}

/// Outcome of a single admission check. Never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub success: bool,
    pub limit: u32,
    /// Slots left in the current window; 0 on rejection.
    pub remaining: u32,
    /// Epoch milliseconds at which the current window resets.
    pub reset_at_ms: u64,
}

struct WindowEntry {
    count: u32,
    reset_at_ms: u64,
}

/// Process-wide fixed-window counter service.
///
/// Owns its map and its sweep lifecycle. Entries are created lazily on first
/// use per key and removed either lazily (replaced when expired) or by the
/// periodic sweep, which exists purely to bound memory.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, WindowEntry>>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        RateLimiter {
            clock,
            entries: Mutex::new(HashMap::new()),
            sweeper: Mutex::new(None),
        }
    }

    /// Admit or reject one request for `key` under `cfg`.
    ///
    /// Rejected requests still consume a slot: a client probing past the
    /// limit keeps its window saturated instead of sneaking in at the edge.
    pub fn check(&self, key: &str, cfg: RateLimitConfig) -> RateLimitDecision {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(key) {
            // An expired entry is logically nonexistent even if the sweep
            // has not removed it yet; fall through and replace it.
            if entry.reset_at_ms >= now {
                entry.count += 1;

                if entry.count > cfg.limit {
                    trace!(key, count = entry.count, "rate limit exceeded");
                    return RateLimitDecision {
                        success: false,
                        limit: cfg.limit,
                        remaining: 0,
                        reset_at_ms: entry.reset_at_ms,
                    };
                }

                return RateLimitDecision {
                    success: true,
                    limit: cfg.limit,
                    remaining: cfg.limit - entry.count,
                    reset_at_ms: entry.reset_at_ms,
                };
            }
        }

        let reset_at_ms = now + cfg.window_secs * 1000;
        entries.insert(
            key.to_string(),
            WindowEntry {
                count: 1,
                reset_at_ms,
            },
        );
        trace!(key, reset_at_ms, "opened rate-limit window");
        RateLimitDecision {
            success: true,
            limit: cfg.limit,
            remaining: cfg.limit.saturating_sub(1),
            reset_at_ms,
        }
    }

    /// Drop every entry whose window has already closed. Returns how many
    /// were removed. Correctness never depends on this being called.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.reset_at_ms >= now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "swept expired rate-limit entries");
        }
        removed
    }

    /// Number of live (possibly expired-but-unswept) entries.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Start the periodic sweep task. Replaces any previously started one.
    /// The task holds only a weak reference, so dropping the limiter ends it.
    pub fn start_sweeper(self: Arc<Self>, every: Duration) {
        let weak = Arc::downgrade(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(limiter) => {
                        limiter.sweep_expired();
                    }
                    None => break,
                }
            }
        });
        if let Some(old) = self.sweeper.lock().replace(handle) {
            old.abort();
        }
    }

    /// Stop the periodic sweep task, if running.
    pub fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}
