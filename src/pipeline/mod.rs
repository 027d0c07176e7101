//! Pipeline stages and the record-processing engine they share.
//!
//! - `driver`: the checkpointed per-record loop and the `StagePlugin` interface
//! - `capture`, `enrich`, `score`: plug-ins run by the driver
//! - `clean`, `export`: deterministic whole-file stages
//! - `runner`: config-driven wiring and the run-all sequence

mod capture;
mod clean;
mod dataset;
mod driver;
mod enrich;
mod export;
mod parse;
mod runner;
mod score;

pub use capture::*;
pub use clean::*;
pub use dataset::*;
pub use driver::*;
pub use enrich::*;
pub use export::*;
pub use parse::*;
pub use runner::*;
pub use score::*;
