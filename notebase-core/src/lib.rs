#![warn(warnings)]
#![deny(clippy::all)]

pub mod base;
pub mod config;
pub mod error;
pub mod filter;
pub mod formula;
pub mod query;
pub mod resolver;
pub mod schema;
pub mod similarity;
pub mod snapshot;
pub mod storage;
pub mod upsert;
pub mod value;
pub mod vault;

#[cfg(feature = "python")]
pub mod logging;
#[cfg(feature = "python")]
mod python;

pub use error::{EngineError, EngineResult, ErrorBody};
pub use filter::{evaluate_filter, evaluate_statement, FilterNode, FilterOutcome};
pub use query::{query, QueryRequest, QueryResponse, QueryRow};
pub use schema::{extract_schema, Schema};
pub use snapshot::{Snapshot, SnapshotCache};
