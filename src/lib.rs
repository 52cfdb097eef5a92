//! Resumable harvesting of per-user RFM records into CSV.
//!
//! Identifiers waiting to be fetched live in a plain-text pending file; each
//! successful fetch appends one row to the result CSV and then drops the
//! identifier from the pending file. Rerunning after an interruption picks up
//! exactly what is still pending.

pub mod api;
pub mod config;
pub mod error;
pub mod limiter;
pub mod pipeline;
pub mod retry;
pub mod sink;
pub mod store;
pub mod types;
pub mod verify;
pub mod worker;

pub use config::{Config, RetryConfig};
pub use error::{Error, FetchError, Result};
pub use pipeline::{Phase, Pipeline, RunReport};
pub use types::{Identifier, Record};
pub use verify::{VerifyReport, verify};
