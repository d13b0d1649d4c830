use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::fetch::Post;
use crate::partial::SkippedPage;

/// Lifecycle status of a session. Transitions only move forward; the one
/// backward edge is `Interrupted → Active`, taken on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Interrupted,
    Failed,
}

impl SessionStatus {
    /// Terminal sessions are never resurrected without a fresh start.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Active, Completed) | (Active, Interrupted) | (Active, Failed) | (Interrupted, Active)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Interrupted => write!(f, "interrupted"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Stable session identifier for a (target, output) pair, so re-running the
/// same job resumes the same session.
pub fn derive_session_id(target: &str, output_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(target.as_bytes());
    hasher.update(b"\n");
    hasher.update(output_path.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// The unit of durability: everything a resumed run needs.
///
/// Mutated only by the session engine; everyone else reads snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub target: String,
    pub output_path: String,
    /// Opaque progress marker owned by the fetch collaborator,
    /// round-tripped unchanged by the engine.
    #[serde(default)]
    pub cursor: Value,
    #[serde(default)]
    pub collected_count: u64,
    #[serde(default)]
    pub attempted_count: u64,
    #[serde(default)]
    pub error_count: u64,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub last_checkpoint_at: DateTime<Utc>,
    /// Collected posts, persisted so a resumed run keeps earlier pages.
    #[serde(default)]
    pub items: Vec<Post>,
    #[serde(default)]
    pub skipped_pages: Vec<SkippedPage>,
}

impl SessionState {
    pub fn new(target: impl Into<String>, output_path: impl Into<String>) -> Self {
        let target = target.into();
        let output_path = output_path.into();
        let now = Utc::now();
        Self {
            session_id: derive_session_id(&target, &output_path),
            target,
            output_path,
            cursor: Value::Null,
            collected_count: 0,
            attempted_count: 0,
            error_count: 0,
            status: SessionStatus::Active,
            started_at: now,
            last_checkpoint_at: now,
            items: Vec::new(),
            skipped_pages: Vec::new(),
        }
    }

    /// Fold one unit of work into the monotone counters.
    pub fn record_progress(&mut self, collected: u64, attempted: u64, errors: u64) {
        self.collected_count += collected;
        self.attempted_count += attempted;
        self.error_count += errors;
        debug_assert!(self.collected_count <= self.attempted_count);
    }

    /// Move to `next`, rejecting anything but a forward transition
    /// (or `Interrupted → Active` on resume).
    pub fn transition(&mut self, next: SessionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            bail!("invalid session transition: {} -> {}", self.status, next);
        }
        self.status = next;
        Ok(())
    }
}
