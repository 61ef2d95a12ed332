//! Composable action execution engine: validation, lifecycle hooks,
//! timeouts, retries with exponential backoff, cancellation, asynchronous
//! supervision, chained data flow, DAG orchestration and error
//! compensation.
//!
//! The core is the Executor (`executor`): it takes an `Action` + params +
//! context + options and produces a result under a contract covering
//! concurrency, timeouts, retries, compensation and result-shape
//! normalization. The Chain Runner (`chain`) and Plan/DAG (`plan`) build
//! multi-step orchestration on top of it; the Async API (`async_api`)
//! exposes it as start/await/cancel.

pub mod action;
pub mod async_api;
pub mod chain;
pub mod compensation;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod plan;
pub mod retry;
pub mod schema;
pub mod supervisor;
pub mod telemetry;
pub mod tool;

pub use action::{Action, ActionMetadata, CompensationConfig};
pub use context::{Context, Params};
pub use error::{ErrorKind, ExecutionError, RunOutcome};
pub use executor::{ExecuteOptions, Executor};
