pub mod checkpoint;
pub mod state;

pub use checkpoint::{CheckpointError, CheckpointStore};
pub use state::{SessionState, SessionStatus, derive_session_id};
