//! Partial-extraction accumulation and graceful degradation.
//!
//! The accumulator collects batches of extracted posts and annotations for
//! pages that had to be skipped. Hitting the consecutive-failure threshold
//! is a policy stop, not an error: the session still completes, carrying
//! whatever was collected plus one annotation per skipped page.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::fetch::Post;

/// Annotation for a page that yielded no batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedPage {
    /// Page marker, e.g. `offset 30`.
    pub marker: String,
    pub reason: String,
}

/// Immutable outcome snapshot handed to the output writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialResult {
    /// Posts in the order their batches were recorded.
    pub items: Vec<Post>,
    /// One annotation per skipped page, in the order recorded.
    pub skipped_pages: Vec<SkippedPage>,
}

impl PartialResult {
    pub fn is_degraded(&self) -> bool {
        !self.skipped_pages.is_empty()
    }
}

/// Stop policy for the accumulator.
#[derive(Debug, Clone)]
pub struct AccumulatorPolicy {
    /// Consecutive skipped pages that end the session as a partial success.
    pub max_consecutive_page_failures: u32,
    /// Optional cap on collected items.
    pub max_items: Option<u64>,
}

impl Default for AccumulatorPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_page_failures: 3,
            max_items: None,
        }
    }
}

/// Single-producer collector of extraction results for one session.
pub struct Accumulator {
    policy: AccumulatorPolicy,
    items: Vec<Post>,
    skipped: Vec<SkippedPage>,
    consecutive_page_failures: u32,
    stop_requested: bool,
    snapshot: Option<Arc<PartialResult>>,
}

impl Accumulator {
    pub fn new(policy: AccumulatorPolicy) -> Self {
        Self {
            policy,
            items: Vec::new(),
            skipped: Vec::new(),
            consecutive_page_failures: 0,
            stop_requested: false,
            snapshot: None,
        }
    }

    /// Restore state from a resumed session's persisted items/annotations.
    pub fn seed(&mut self, items: Vec<Post>, skipped: Vec<SkippedPage>) {
        debug_assert!(self.items.is_empty() && self.snapshot.is_none());
        self.items = items;
        self.skipped = skipped;
    }

    /// Record a successfully extracted batch. Resets the failure streak.
    pub fn record_success(&mut self, batch: Vec<Post>) {
        debug_assert!(self.snapshot.is_none(), "recording after finalize");
        self.consecutive_page_failures = 0;
        self.items.extend(batch);
    }

    /// Record a page that had to be skipped. Extends the failure streak.
    pub fn record_page_failure(&mut self, marker: impl Into<String>, reason: impl Into<String>) {
        debug_assert!(self.snapshot.is_none(), "recording after finalize");
        self.consecutive_page_failures += 1;
        self.skipped.push(SkippedPage {
            marker: marker.into(),
            reason: reason.into(),
        });
    }

    /// External stop signal (cancellation, operator cap).
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    /// Degradation policy: keep going unless stopped, failed out, or full.
    pub fn should_continue(&self) -> bool {
        if self.stop_requested || self.snapshot.is_some() {
            return false;
        }
        if self.consecutive_page_failures >= self.policy.max_consecutive_page_failures {
            return false;
        }
        if let Some(cap) = self.policy.max_items
            && self.items.len() as u64 >= cap
        {
            return false;
        }
        true
    }

    pub fn items(&self) -> &[Post] {
        &self.items
    }

    pub fn skipped_pages(&self) -> &[SkippedPage] {
        &self.skipped
    }

    pub fn consecutive_page_failures(&self) -> u32 {
        self.consecutive_page_failures
    }

    /// Freeze and return the result snapshot. Idempotent: every call after
    /// the first returns the same immutable snapshot, so it is safe from
    /// both the completion path and an interruption handler.
    pub fn finalize(&mut self) -> Arc<PartialResult> {
        self.snapshot
            .get_or_insert_with(|| {
                Arc::new(PartialResult {
                    items: self.items.clone(),
                    skipped_pages: self.skipped.clone(),
                })
            })
            .clone()
    }
}
