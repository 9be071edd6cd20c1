//! Session bookkeeping for the Neurocalm agent.
//!
//! Counts what each streaming session has processed so the CLI can
//! report on it when the session ends.

pub mod log;

// Re-export commonly used types
pub use log::{create_shared_log, SessionInfo, SessionLog, SessionStats, SharedSessionLog};
