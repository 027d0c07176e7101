//! Core data models for siftline.

mod config;
mod error;
mod record;
mod schema;

pub use config::*;
pub use error::*;
pub use record::*;
pub use schema::*;
