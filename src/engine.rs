//! Session lifecycle orchestration: resume-vs-fresh, the extraction loop,
//! periodic checkpointing, degradation routing, and interruption handling.
//!
//! The engine is the sole writer of [`SessionState`]. Fetch attempts go
//! through a per-class retry executor; failed attempt chains degrade into
//! skipped-page annotations instead of crashing the session. Checkpoint
//! writes get the same retry/breaker discipline; losing the ability to
//! checkpoint is the one failure that turns a session terminal `failed`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelFlag;
use crate::config::GarimpoConfig;
use crate::error::FetchFailure;
use crate::fetch::{FetchOutcome, PageFetcher, cursor_marker};
use crate::partial::{Accumulator, AccumulatorPolicy, PartialResult};
use crate::progress::ProgressAccountant;
use crate::retry::{CircuitBreaker, RetryError, RetryExecutor, RetryPolicy};
use crate::session::{CheckpointError, CheckpointStore, SessionState, SessionStatus};

/// User-visible outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionVerdict {
    /// Everything the feed had was collected.
    Completed { collected: u64 },
    /// The feed had nothing to collect, which is not a failure.
    CompletedEmpty,
    /// Completed early with skipped pages (graceful degradation).
    CompletedPartial { collected: u64, skipped_pages: u64 },
    /// Stopped on an interruption signal; the checkpoint allows resuming.
    Interrupted { collected: u64 },
    /// Unrecoverable: nothing collected on a fatal error, or checkpointing
    /// itself kept failing.
    Failed { cause: String },
}

/// What one engine run produced.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub verdict: SessionVerdict,
    /// Finalized snapshot for the output writer. `None` for interrupted
    /// runs: the resumed run writes the document exactly once.
    pub result: Option<Arc<PartialResult>>,
}

/// Drives one session per process invocation.
pub struct SessionEngine {
    config: GarimpoConfig,
    store: CheckpointStore,
    progress: Arc<ProgressAccountant>,
    cancel: CancelFlag,
    /// Checkpoint saves must survive a stop request, so their retry chain
    /// watches an inert flag; the grace timeout bounds shutdown latency.
    checkpoint_cancel: CancelFlag,
}

impl SessionEngine {
    pub fn new(config: GarimpoConfig, store: CheckpointStore) -> Self {
        let progress = Arc::new(ProgressAccountant::new(config.progress_window()));
        Self {
            config,
            store,
            progress,
            cancel: CancelFlag::new(),
            checkpoint_cancel: CancelFlag::new(),
        }
    }

    /// Handle for the Ctrl-C task (or anyone else) to request a stop.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Shared counters for observer tasks; safe to snapshot at any time.
    pub fn progress(&self) -> Arc<ProgressAccountant> {
        self.progress.clone()
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.max_attempts,
            base_delay_ms: self.config.base_delay_ms,
            multiplier: self.config.backoff_multiplier,
            max_delay_ms: self.config.max_delay_ms,
            jitter_fraction: self.config.jitter_fraction,
        }
    }

    fn breaker(&self) -> CircuitBreaker {
        CircuitBreaker::new(self.config.breaker_threshold, self.config.breaker_cooldown())
    }

    /// Run the session for `target` to a verdict.
    pub async fn run<F: PageFetcher>(
        &mut self,
        fetcher: &F,
        target: &str,
        output_path: &str,
        fresh: bool,
    ) -> Result<SessionReport> {
        let mut state = self.resolve_session(target, output_path, fresh)?;
        let session_id = state.session_id.clone();
        info!(%session_id, status = %state.status, "session resolved");

        self.progress
            .seed(state.collected_count, state.attempted_count, state.error_count);

        let mut accumulator = Accumulator::new(AccumulatorPolicy {
            max_consecutive_page_failures: self.config.max_failed_pages,
            max_items: self.config.max_posts,
        });
        accumulator.seed(state.items.clone(), state.skipped_pages.clone());

        let mut fetch_exec = RetryExecutor::new("fetch_page", self.retry_policy(), self.breaker());
        let mut checkpoint_exec =
            RetryExecutor::new("checkpoint_save", self.retry_policy(), self.breaker());

        // Initial checkpoint: the session is resumable from the first moment.
        if let Err(e) = self.save_checkpoint(&mut checkpoint_exec, &mut state).await {
            return Ok(self.fail(&mut state, &accumulator, checkpoint_failure_cause(&e)));
        }

        let mut last_checkpoint = Instant::now();
        let mut batches_since_checkpoint = 0u32;
        let mut source_exhausted = false;
        let mut fatal_cause: Option<String> = None;

        while accumulator.should_continue() && !self.cancel.is_cancelled() {
            let marker = cursor_marker(&state.cursor);
            let cursor = state.cursor.clone();

            // An in-flight attempt gets at most the grace timeout after a
            // stop request before it is abandoned.
            let outcome = tokio::select! {
                r = fetch_exec.execute(&self.cancel, || fetcher.fetch_next(&cursor)) => r,
                _ = self.cancelled_past_grace() => Err(RetryError::Cancelled),
            };

            match outcome {
                Ok(FetchOutcome::Batch(batch)) => {
                    let collected = batch.posts.len() as u64;
                    let attempted = collected + batch.failed_items as u64;
                    debug!(marker = %batch.marker, collected, failed_items = batch.failed_items, "batch recorded");

                    accumulator.record_success(batch.posts);
                    state.record_progress(collected, attempted, batch.failed_items as u64);
                    self.progress.tick(collected, attempted, batch.failed_items as u64);
                    if batch.total_estimate.is_some() {
                        self.progress.set_total_estimate(batch.total_estimate);
                    }
                    state.cursor = batch.next_cursor;
                    batches_since_checkpoint += 1;
                }
                Ok(FetchOutcome::EndOfContent) => {
                    debug!(%marker, "end of content");
                    source_exhausted = true;
                    break;
                }
                Err(RetryError::Cancelled) => break,
                Err(err @ RetryError::CircuitOpen)
                | Err(err @ RetryError::RetriesExhausted { .. }) => {
                    warn!(%marker, error = %err, "page degraded to a skip annotation");
                    accumulator.record_page_failure(marker.clone(), err.to_string());
                    state.record_progress(0, 0, 1);
                    self.progress.tick(0, 0, 1);
                }
                Err(RetryError::Fatal(msg)) => {
                    error!(%marker, error = %msg, "fatal fetch failure, stopping the loop");
                    accumulator.record_page_failure(marker.clone(), format!("fatal: {msg}"));
                    state.record_progress(0, 0, 1);
                    self.progress.tick(0, 0, 1);
                    fatal_cause = Some(msg);
                    break;
                }
            }

            if batches_since_checkpoint >= self.config.checkpoint_every_batches
                || last_checkpoint.elapsed() >= self.config.checkpoint_interval()
            {
                sync_collections(&mut state, &accumulator);
                if let Err(e) = self.save_checkpoint(&mut checkpoint_exec, &mut state).await {
                    return Ok(self.fail(&mut state, &accumulator, checkpoint_failure_cause(&e)));
                }
                batches_since_checkpoint = 0;
                last_checkpoint = Instant::now();
            }

            if let Some(pause) = self.config.pacing()
                && !self.cancel.is_cancelled()
            {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
        }

        sync_collections(&mut state, &accumulator);

        // Interruption wins over every non-terminal exit reason.
        if self.cancel.is_cancelled() && !source_exhausted && fatal_cause.is_none() {
            state.transition(SessionStatus::Interrupted)?;
            if let Err(e) = self.save_checkpoint(&mut checkpoint_exec, &mut state).await {
                return Ok(self.fail(&mut state, &accumulator, checkpoint_failure_cause(&e)));
            }
            info!(%session_id, collected = state.collected_count, "session interrupted, resumable");
            return Ok(SessionReport {
                session_id,
                verdict: SessionVerdict::Interrupted {
                    collected: state.collected_count,
                },
                result: None,
            });
        }

        let result = accumulator.finalize();

        if let Some(cause) = fatal_cause
            && state.collected_count == 0
        {
            return Ok(self.fail(&mut state, &accumulator, format!("fatal failure: {cause}")));
        }

        state.transition(SessionStatus::Completed)?;
        if let Err(e) = self.save_checkpoint(&mut checkpoint_exec, &mut state).await {
            return Ok(self.fail(&mut state, &accumulator, checkpoint_failure_cause(&e)));
        }

        let verdict = if result.items.is_empty() && state.error_count == 0 {
            SessionVerdict::CompletedEmpty
        } else if result.is_degraded() {
            SessionVerdict::CompletedPartial {
                collected: state.collected_count,
                skipped_pages: result.skipped_pages.len() as u64,
            }
        } else {
            SessionVerdict::Completed {
                collected: state.collected_count,
            }
        };
        info!(%session_id, ?verdict, "session completed");

        Ok(SessionReport {
            session_id,
            verdict,
            result: Some(result),
        })
    }

    /// Load-or-create the session record per the resume rules.
    fn resolve_session(
        &self,
        target: &str,
        output_path: &str,
        fresh: bool,
    ) -> Result<SessionState> {
        let session_id = crate::session::derive_session_id(target, output_path);
        if fresh {
            self.store.delete(&session_id)?;
            info!(%session_id, "fresh start requested, previous checkpoint discarded");
        }

        let state = match self.store.load(&session_id) {
            Ok(mut prev) if !prev.status.is_terminal() => {
                if prev.status == SessionStatus::Interrupted {
                    prev.transition(SessionStatus::Active)?;
                }
                info!(%session_id, collected = prev.collected_count, "resuming from checkpoint");
                prev
            }
            Ok(prev) => {
                info!(%session_id, status = %prev.status, "previous session is terminal, starting over");
                SessionState::new(target, output_path)
            }
            Err(CheckpointError::NotFound(_)) => SessionState::new(target, output_path),
            Err(CheckpointError::Corrupt(id, reason)) => {
                warn!(session_id = %id, %reason, "checkpoint corrupt, prior progress lost; starting fresh");
                SessionState::new(target, output_path)
            }
            Err(e) => return Err(e.into()),
        };
        Ok(state)
    }

    async fn save_checkpoint(
        &self,
        exec: &mut RetryExecutor,
        state: &mut SessionState,
    ) -> Result<(), RetryError> {
        state.last_checkpoint_at = Utc::now();
        let store = &self.store;
        let state_ref: &SessionState = state;
        exec.execute(&self.checkpoint_cancel, || async {
            store.save(state_ref).map_err(|e| match e {
                CheckpointError::Serde(e) => FetchFailure::Fatal(e.to_string()),
                other => FetchFailure::Transient(other.to_string()),
            })
        })
        .await
    }

    /// Resolves once a stop was requested *and* the grace period passed.
    async fn cancelled_past_grace(&self) {
        self.cancel.cancelled().await;
        tokio::time::sleep(self.config.grace_timeout()).await;
    }

    /// Terminal failure path: best-effort checkpoint, then report.
    fn fail(
        &self,
        state: &mut SessionState,
        accumulator: &Accumulator,
        cause: String,
    ) -> SessionReport {
        error!(session_id = %state.session_id, %cause, "session failed");
        sync_collections(state, accumulator);
        if state.status.can_transition_to(SessionStatus::Failed) {
            let _ = state.transition(SessionStatus::Failed);
        }
        state.last_checkpoint_at = Utc::now();
        if let Err(e) = self.store.save(state) {
            warn!(error = %e, "could not persist failed session state");
        }
        SessionReport {
            session_id: state.session_id.clone(),
            verdict: SessionVerdict::Failed { cause },
            result: None,
        }
    }
}

fn sync_collections(state: &mut SessionState, accumulator: &Accumulator) {
    state.items = accumulator.items().to_vec();
    state.skipped_pages = accumulator.skipped_pages().to_vec();
}

fn checkpoint_failure_cause(err: &RetryError) -> String {
    format!("checkpoint write failure: {err}")
}
