//! Clock abstraction for TTL evaluation
//!
//! Row freshness is judged against a clock that can be either the real
//! system time or a controlled virtual time in tests and simulation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock trait for time operations
///
/// Implementations:
/// - `SystemClock`: Uses real wall-clock time
/// - `SimulatedClock`: Uses controlled virtual time for DST
pub trait Clock: Send + Sync + Clone + 'static {
    /// Current time in Unix milliseconds
    fn now_ms(&self) -> u64;

    /// Whether `ttl` has fully elapsed since `written_at_ms`
    ///
    /// A TTL too long to express in milliseconds never elapses.
    fn is_expired(&self, written_at_ms: u64, ttl: Duration) -> bool {
        let deadline = written_at_ms.saturating_add(millis(ttl));
        self.now_ms() >= deadline
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        // A clock set before the epoch reads as zero, which never expires rows
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(millis)
            .unwrap_or(0)
    }
}

/// Simulated clock for deterministic testing
///
/// Time only advances when explicitly told to via `advance()` or `set()`.
/// Clones share the same virtual time.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    time_ms: Arc<AtomicU64>,
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SimulatedClock {
    pub fn new(start_ms: u64) -> Self {
        SimulatedClock {
            time_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.advance_ms(millis(duration));
    }

    pub fn advance_ms(&self, ms: u64) {
        self.time_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, time_ms: u64) {
        self.time_ms.store(time_ms, Ordering::SeqCst);
    }
}

impl Clock for SimulatedClock {
    fn now_ms(&self) -> u64 {
        self.time_ms.load(Ordering::SeqCst)
    }
}
