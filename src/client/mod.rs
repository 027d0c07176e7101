//! External collaborators: language model, web search, and the call machinery.

mod executor;
mod llm_client;
mod pacing;
mod rate_limiter;
mod search;

pub use executor::*;
pub use llm_client::*;
pub use pacing::*;
pub use rate_limiter::*;
pub use search::*;
