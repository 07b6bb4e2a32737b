//! Process-wide pipeline health state.
//!
//! A single `std::sync::Mutex`-guarded struct, matching the prevailing
//! `ContextState`/`LogBuffer` mutex style rather than an `RwLock` — the
//! critical section here is always short (a counter bump, a `VecDeque`
//! push/prune), so a plain mutex fits this shape
//! of state.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Width of the rolling throughput window.
const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Clone)]
struct Counters {
    total_events_sent: u64,
    total_events_failed: u64,
    in_memory_queue: u64,
    persisted_queue: u64,
    dead_letter_queue: u64,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    last_error: String,
}

struct Inner {
    counters: Counters,
    throughput_samples: VecDeque<(Instant, u64)>,
}

/// A point-in-time read of [`Diagnostics`], as served by the health endpoint.
#[derive(Debug, Clone)]
pub struct DiagnosticsSnapshot {
    pub total_events_sent: u64,
    pub total_events_failed: u64,
    pub in_memory_queue: u64,
    pub persisted_queue: u64,
    pub dead_letter_queue: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: String,
    pub throughput_per_min: u64,
}

impl DiagnosticsSnapshot {
    pub fn is_degraded(&self) -> bool {
        !self.last_error.is_empty()
    }
}

pub struct Diagnostics {
    inner: Mutex<Inner>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                counters: Counters::default(),
                throughput_samples: VecDeque::new(),
            }),
        }
    }

    /// Record a successful send of `count` events, updating both the success
    /// counter and the throughput window.
    pub fn record_success(&self, count: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.counters.total_events_sent += count;
        inner.counters.last_success_at = Some(Utc::now());
        let now = Instant::now();
        inner.throughput_samples.push_back((now, count));
        prune(&mut inner.throughput_samples, now);
    }

    /// Record a failed send/write of `count` events with `error` as the
    /// latest diagnostic message.
    pub fn record_failure(&self, count: u64, error: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.counters.total_events_failed += count;
        inner.counters.last_failure_at = Some(Utc::now());
        inner.counters.last_error = error.into();
    }

    /// Clear `lastError`, e.g. once a subsequent flush succeeds.
    pub fn clear_error(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.counters.last_error.clear();
    }

    pub fn set_in_memory_queue(&self, depth: u64) {
        self.inner.lock().unwrap().counters.in_memory_queue = depth;
    }

    pub fn set_persisted_queue(&self, depth: u64) {
        self.inner.lock().unwrap().counters.persisted_queue = depth;
    }

    pub fn set_dead_letter_queue(&self, depth: u64) {
        self.inner.lock().unwrap().counters.dead_letter_queue = depth;
    }

    /// Read a consistent snapshot, pruning the throughput window first so
    /// it's recomputed on every read as well as every update.
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        prune(&mut inner.throughput_samples, now);
        let throughput_per_min: u64 = inner.throughput_samples.iter().map(|(_, c)| c).sum();
        let c = &inner.counters;
        DiagnosticsSnapshot {
            total_events_sent: c.total_events_sent,
            total_events_failed: c.total_events_failed,
            in_memory_queue: c.in_memory_queue,
            persisted_queue: c.persisted_queue,
            dead_letter_queue: c.dead_letter_queue,
            last_success_at: c.last_success_at,
            last_failure_at: c.last_failure_at,
            last_error: c.last_error.clone(),
            throughput_per_min,
        }
    }
}

/// Drop samples older than [`THROUGHPUT_WINDOW`] relative to `now`.
fn prune(samples: &mut VecDeque<(Instant, u64)>, now: Instant) {
    while let Some((ts, _)) = samples.front() {
        if now.duration_since(*ts) > THROUGHPUT_WINDOW {
            samples.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_diagnostics_is_not_degraded() {
        let d = Diagnostics::new();
        assert!(!d.snapshot().is_degraded());
    }

    #[test]
    fn failure_sets_last_error_and_degraded_status() {
        let d = Diagnostics::new();
        d.record_failure(3, "connection refused");
        let snap = d.snapshot();
        assert!(snap.is_degraded());
        assert_eq!(snap.total_events_failed, 3);
        assert_eq!(snap.last_error, "connection refused");
    }

    #[test]
    fn clear_error_resets_degraded_status() {
        let d = Diagnostics::new();
        d.record_failure(1, "boom");
        d.clear_error();
        assert!(!d.snapshot().is_degraded());
    }

    /// throughput_per_min sums counts within the last 60s and excludes
    /// older samples.
    #[test]
    fn throughput_window_excludes_stale_samples() {
        let d = Diagnostics::new();
        d.record_success(10);
        {
            let mut inner = d.inner.lock().unwrap();
            let stale = Instant::now() - Duration::from_secs(61);
            inner.throughput_samples.push_front((stale, 999));
        }
        let snap = d.snapshot();
        assert_eq!(snap.throughput_per_min, 10);
    }

    #[test]
    fn queue_depth_setters_are_reflected_in_snapshot() {
        let d = Diagnostics::new();
        d.set_in_memory_queue(5);
        d.set_persisted_queue(2);
        d.set_dead_letter_queue(1);
        let snap = d.snapshot();
        assert_eq!(snap.in_memory_queue, 5);
        assert_eq!(snap.persisted_queue, 2);
        assert_eq!(snap.dead_letter_queue, 1);
    }
}
