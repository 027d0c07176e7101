//! siftline - Checkpointed, resumable pipeline turning harvested posts into scored leads.
//!
//! ## Architecture
//!
//! Every record-level stage runs on the same engine:
//! - **Fingerprint**: stable identity key per record (content hash, position or key column)
//! - **Durable Log**: append-only JSONL of outcomes, plus a marker file of handled keys
//! - **Resume Index**: keys handled by earlier runs, skipped before any external call
//! - **Call Executor**: per-call timeout, failure isolation and random pacing
//! - **Snapshot Writer**: input joined with the latest outcome per key, written atomically
//!
//! ## Stages
//!
//! - **capture**: normalize harvested posts, key them by content
//! - **clean**: strip noise from post text, drop job offers and duplicates
//! - **enrich**: infer company, search the web, synthesize a company profile and theme
//! - **score**: analyze the project and rank the lead
//! - **export**: JSON array of the scored leads
//!
//! Interrupting a stage at any point and starting it again yields the same
//! output as an uninterrupted run.

pub mod checkpoint;
pub mod client;
pub mod models;
pub mod pipeline;

// Re-exports for convenience
pub use checkpoint::{CheckpointStore, DurableLog, Fingerprint, ResumeIndex, SnapshotWriter};
pub use client::{CallExecutor, DuckDuckGoSearch, LLMClient, LanguageModel, RateLimiter, WebSearch};
pub use models::{CallError, Config, Outcome, Record, Result, SiftError, StageReport};
pub use pipeline::{Pipeline, StageDriver, StageOptions, StagePlugin};
