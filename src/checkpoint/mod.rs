//! Checkpointing for resumable stage runs.
//!
//! Provides:
//! - `Fingerprint`: identity key schemes for records
//! - `DurableLog` / `MarkerFile` / `CheckpointStore`: append-only progress record
//! - `ResumeIndex`: keys already handled by an earlier run
//! - `SnapshotWriter`: atomic output snapshots joined from input and log

mod fingerprint;
mod log;
mod resume;
mod snapshot;

pub use fingerprint::*;
pub use log::*;
pub use resume::*;
pub use snapshot::*;
