//! Progress accounting: throughput, completion percentage, ETA.
//!
//! One writer (the extraction loop) calls [`ProgressAccountant::tick`];
//! any observer task may call [`ProgressAccountant::snapshot`] at any time.
//! The rate is computed against a trailing window so the ETA reacts to
//! recent slowdowns instead of being dominated by an initial fast burst.
//! With no total estimate, remaining work and ETA are reported as unknown,
//! never as a misleading zero.

use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Point-in-time view derived from the counters. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub elapsed: Duration,
    pub items_collected: u64,
    pub items_attempted: u64,
    pub errors: u64,
    pub rate_per_minute: f64,
    pub percent_complete: Option<f64>,
    pub estimated_remaining: Option<u64>,
    pub eta: Option<Duration>,
}

struct Inner {
    started: Instant,
    collected: u64,
    attempted: u64,
    errors: u64,
    total_estimate: Option<u64>,
    /// `(instant, cumulative collected)` samples, oldest first.
    samples: VecDeque<(Instant, u64)>,
}

/// Counter store for one session. Cheap to share behind an `Arc`.
pub struct ProgressAccountant {
    window: Duration,
    inner: RwLock<Inner>,
}

impl ProgressAccountant {
    pub fn new(window: Duration) -> Self {
        Self::seeded(window, 0, 0, 0)
    }

    /// Start from resumed session counters.
    pub fn seeded(window: Duration, collected: u64, attempted: u64, errors: u64) -> Self {
        let now = Instant::now();
        let mut samples = VecDeque::new();
        samples.push_back((now, collected));
        Self {
            window,
            inner: RwLock::new(Inner {
                started: now,
                collected,
                attempted,
                errors,
                total_estimate: None,
                samples,
            }),
        }
    }

    pub fn set_total_estimate(&self, total: Option<u64>) {
        let mut inner = self.inner.write().expect("progress lock poisoned");
        inner.total_estimate = total;
    }

    /// Reset to resumed session counters. The resumed items become the rate
    /// baseline, not a burst.
    pub fn seed(&self, collected: u64, attempted: u64, errors: u64) {
        let now = Instant::now();
        let mut inner = self.inner.write().expect("progress lock poisoned");
        inner.started = now;
        inner.collected = collected;
        inner.attempted = attempted;
        inner.errors = errors;
        inner.samples.clear();
        inner.samples.push_back((now, collected));
    }

    /// Record deltas from one unit of work.
    pub fn tick(&self, delta_collected: u64, delta_attempted: u64, delta_errors: u64) {
        let now = Instant::now();
        let mut inner = self.inner.write().expect("progress lock poisoned");
        inner.collected += delta_collected;
        inner.attempted += delta_attempted;
        inner.errors += delta_errors;

        let collected = inner.collected;
        inner.samples.push_back((now, collected));
        // Keep one sample at or before the window edge as the rate baseline.
        let cutoff = now.checked_sub(self.window).unwrap_or(inner.started);
        while inner.samples.len() > 1 && inner.samples[1].0 <= cutoff {
            inner.samples.pop_front();
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let now = Instant::now();
        let inner = self.inner.read().expect("progress lock poisoned");
        let elapsed = now.duration_since(inner.started);

        let rate_per_sec = {
            let baseline = inner
                .samples
                .iter()
                .find(|(t, _)| now.duration_since(*t) <= self.window)
                .or_else(|| inner.samples.back())
                .copied();
            match baseline {
                Some((t, count)) => {
                    let span = now.duration_since(t).as_secs_f64();
                    if span > 0.0 {
                        (inner.collected.saturating_sub(count)) as f64 / span
                    } else {
                        0.0
                    }
                }
                None => 0.0,
            }
        };

        let estimated_remaining = inner
            .total_estimate
            .map(|total| total.saturating_sub(inner.collected));
        let percent_complete = inner.total_estimate.and_then(|total| {
            (total > 0).then(|| ((inner.collected as f64 / total as f64) * 100.0).min(100.0))
        });
        let eta = estimated_remaining.and_then(|remaining| {
            if remaining == 0 {
                Some(Duration::ZERO)
            } else if rate_per_sec > f64::EPSILON {
                Some(Duration::from_secs_f64(remaining as f64 / rate_per_sec))
            } else {
                None
            }
        });

        ProgressSnapshot {
            elapsed,
            items_collected: inner.collected,
            items_attempted: inner.attempted,
            errors: inner.errors,
            rate_per_minute: rate_per_sec * 60.0,
            percent_complete,
            estimated_remaining,
            eta,
        }
    }
}
