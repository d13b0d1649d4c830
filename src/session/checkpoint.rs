//! Durable checkpoint storage with integrity verification.
//!
//! One JSON record per session under the checkpoint directory. Saves are
//! atomic from the caller's perspective (write to a temp file, then rename)
//! and serialized through a store-level mutex so an interruption-handler
//! save can never interleave with the loop's periodic save. Every record
//! carries a digest over the canonical body; a mismatch on load surfaces as
//! [`CheckpointError::Corrupt`] rather than partially-valid state.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use super::state::SessionState;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("no checkpoint found for session {0}")]
    NotFound(String),

    #[error("checkpoint for {0} is corrupt: {1}")]
    Corrupt(String, String),

    #[error("checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// On-disk envelope. The tag covers `state` only, so future readers can add
/// sibling fields without invalidating old records.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    state: Value,
    integrity_tag: String,
}

/// File-backed store for session records.
pub struct CheckpointStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("session_{session_id}.json"))
    }

    /// Persist `state`, replacing any previous record for the session.
    /// Either the new record fully lands or the old one stays intact.
    pub fn save(&self, state: &SessionState) -> Result<(), CheckpointError> {
        let _guard = self.write_lock.lock().expect("checkpoint lock poisoned");

        let body = serde_json::to_value(state)?;
        let record = CheckpointRecord {
            integrity_tag: integrity_tag(&body),
            state: body,
        };

        let path = self.record_path(&state.session_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&record)?)?;
        fs::rename(&tmp, &path)?;

        debug!(session_id = %state.session_id, path = %path.display(), "checkpoint saved");
        Ok(())
    }

    pub fn load(&self, session_id: &str) -> Result<SessionState, CheckpointError> {
        let path = self.record_path(session_id);
        if !path.exists() {
            return Err(CheckpointError::NotFound(session_id.to_string()));
        }
        load_record(&path, session_id)
    }

    /// Remove a session's record. Missing records are fine.
    pub fn delete(&self, session_id: &str) -> Result<(), CheckpointError> {
        let _guard = self.write_lock.lock().expect("checkpoint lock poisoned");
        match fs::remove_file(self.record_path(session_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All readable session records, newest checkpoint first. Unreadable or
    /// corrupt records are skipped with a warning, not fatal.
    pub fn list_sessions(&self) -> Result<Vec<SessionState>, CheckpointError> {
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with("session_") || !name.ends_with(".json") {
                continue;
            }
            match load_record(&path, name) {
                Ok(state) => sessions.push(state),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable session record"),
            }
        }
        sessions.sort_by(|a, b| b.last_checkpoint_at.cmp(&a.last_checkpoint_at));
        Ok(sessions)
    }

    /// Delete session records whose file is older than `days`. Returns how
    /// many were removed.
    pub fn sweep_older_than(&self, days: u64) -> Result<usize, CheckpointError> {
        let _guard = self.write_lock.lock().expect("checkpoint lock poisoned");
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(days * 24 * 60 * 60))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with("session_") {
                continue;
            }
            let modified = entry_modified(&path);
            if modified < cutoff {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to remove old record"),
                }
            }
        }
        Ok(removed)
    }
}

fn entry_modified(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Digest over the canonical body: serde_json renders `Value` maps with
/// sorted keys, so the same logical state always hashes the same, and
/// unknown future fields stay part of the covered body.
fn integrity_tag(body: &Value) -> String {
    let canonical = serde_json::to_vec(body).expect("value serialization cannot fail");
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    format!("{:x}", hasher.finalize())
}

fn load_record(path: &Path, id_for_errors: &str) -> Result<SessionState, CheckpointError> {
    let bytes = fs::read(path)?;
    let record: CheckpointRecord = serde_json::from_slice(&bytes).map_err(|e| {
        CheckpointError::Corrupt(id_for_errors.to_string(), format!("unreadable record: {e}"))
    })?;

    if integrity_tag(&record.state) != record.integrity_tag {
        return Err(CheckpointError::Corrupt(
            id_for_errors.to_string(),
            "integrity tag mismatch".into(),
        ));
    }

    serde_json::from_value(record.state).map_err(|e| {
        CheckpointError::Corrupt(id_for_errors.to_string(), format!("invalid state body: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::state::SessionStatus;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, CheckpointStore) {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn sample_state() -> SessionState {
        let mut state = SessionState::new("https://feed.garimpo.dev/in/maria", "out.md");
        state.cursor = json!({ "offset": 60 });
        state.record_progress(12, 14, 2);
        state
    }

    #[test]
    fn save_then_load_round_trips_exactly() {
        let (_tmp, store) = temp_store();
        let state = sample_state();

        store.save(&state).unwrap();
        let loaded = store.load(&state.session_id).unwrap();

        assert_eq!(loaded, state);
        assert_eq!(loaded.cursor, json!({ "offset": 60 }));
        assert_eq!(loaded.status, SessionStatus::Active);
    }

    #[test]
    fn load_missing_session_is_not_found() {
        let (_tmp, store) = temp_store();
        let err = store.load("feedcafe00000000").unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[test]
    fn single_byte_corruption_is_detected() {
        let (_tmp, store) = temp_store();
        let state = sample_state();
        store.save(&state).unwrap();

        let path = store.record_path(&state.session_id);
        let contents = fs::read_to_string(&path).unwrap();
        // Flip one byte inside the body, keeping the JSON well-formed.
        let tampered = contents.replacen("maria", "marIa", 1);
        assert_ne!(contents, tampered);
        fs::write(&path, tampered).unwrap();

        let err = store.load(&state.session_id).unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt(_, _)), "got {err:?}");
    }

    #[test]
    fn truncated_record_is_corrupt_not_a_panic() {
        let (_tmp, store) = temp_store();
        let state = sample_state();
        store.save(&state).unwrap();

        let path = store.record_path(&state.session_id);
        let contents = fs::read_to_string(&path).unwrap();
        fs::write(&path, &contents[..contents.len() / 2]).unwrap();

        let err = store.load(&state.session_id).unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt(_, _)));
    }

    #[test]
    fn unknown_future_fields_are_ignored_but_still_verified() {
        let (_tmp, store) = temp_store();
        let state = sample_state();
        store.save(&state).unwrap();

        // Simulate a record written by a future version with an extra field.
        let path = store.record_path(&state.session_id);
        let mut record: serde_json::Map<String, Value> =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        let mut body = record["state"].clone();
        body["future_field"] = json!("whatever");
        record.insert("integrity_tag".into(), json!(integrity_tag(&body)));
        record.insert("state".into(), body);
        fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();

        let loaded = store.load(&state.session_id).unwrap();
        assert_eq!(loaded.collected_count, state.collected_count);
    }

    #[test]
    fn save_replaces_only_its_own_session() {
        let (_tmp, store) = temp_store();
        let first = sample_state();
        let second = SessionState::new("https://feed.garimpo.dev/in/joao", "joao.md");
        store.save(&first).unwrap();
        store.save(&second).unwrap();

        let mut updated = first.clone();
        updated.record_progress(3, 3, 0);
        store.save(&updated).unwrap();

        assert_eq!(store.load(&first.session_id).unwrap().collected_count, 15);
        assert_eq!(store.load(&second.session_id).unwrap().collected_count, 0);
    }

    #[test]
    fn delete_is_idempotent() {
        let (_tmp, store) = temp_store();
        let state = sample_state();
        store.save(&state).unwrap();

        store.delete(&state.session_id).unwrap();
        store.delete(&state.session_id).unwrap();
        assert!(matches!(
            store.load(&state.session_id),
            Err(CheckpointError::NotFound(_))
        ));
    }

    #[test]
    fn list_sessions_skips_garbage_files() {
        let (tmp, store) = temp_store();
        store.save(&sample_state()).unwrap();
        fs::write(tmp.path().join("session_bogus.json"), b"not json").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"ignore me").unwrap();

        let sessions = store.list_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn sweep_removes_old_records() {
        let (_tmp, store) = temp_store();
        store.save(&sample_state()).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        // A zero-day horizon makes everything "old".
        let removed = store.sweep_older_than(0).unwrap();
        assert_eq!(removed, 1);
        assert!(store.list_sessions().unwrap().is_empty());
    }

    #[test]
    fn concurrent_saves_never_interleave() {
        let (_tmp, store) = temp_store();
        let store = Arc::new(store);
        let state = sample_state();

        let mut handles = Vec::new();
        for i in 0..8u64 {
            let store = store.clone();
            let mut state = state.clone();
            handles.push(std::thread::spawn(move || {
                state.record_progress(i, i, 0);
                store.save(&state).unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Whichever save won, the record must verify cleanly.
        assert!(store.load(&state.session_id).is_ok());
    }
}
