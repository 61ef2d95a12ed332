//! Action Contract (C1): the capability every executable unit implements.
//!
//! Actions are long-lived, stateless definitions — not instances. A given
//! `Action` is invoked many times concurrently with different params and
//! context; it must not carry per-call mutable state.

use async_trait::async_trait;
use serde::Serialize;

use crate::context::{Context, Params};
use crate::error::{ExecutionError, RunOutcome};
use crate::schema::SchemaValidator;
use crate::tool::ToolDescriptor;

/// Metadata for introspection and AI/tool exposure (§3).
#[derive(Debug, Clone, Serialize)]
pub struct ActionMetadata {
    pub name: String,
    pub description: String,
    pub version: String,
    pub category: String,
    pub tags: Vec<String>,
}

impl ActionMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: "0.1.0".into(),
            category: "general".into(),
            tags: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// `{enabled, timeout_ms, max_retries}` from §3.
#[derive(Debug, Clone, Copy)]
pub struct CompensationConfig {
    pub enabled: bool,
    pub timeout_ms: Option<u64>,
    pub max_retries: u32,
}

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: None,
            max_retries: 0,
        }
    }
}

impl CompensationConfig {
    pub fn enabled(timeout_ms: Option<u64>, max_retries: u32) -> Self {
        Self {
            enabled: true,
            timeout_ms,
            max_retries,
        }
    }
}

/// A stateless, reusable unit with declared schemas, hooks and a `run`.
///
/// Every hook other than `run` defaults to identity (pass-through on
/// success) or, for `on_error`, to "compensation not implemented". §4.1's
/// fixed hook order lives in `crate::executor`, not here: this trait only
/// declares the capability, the pipeline composes it.
#[async_trait]
pub trait Action: Send + Sync {
    fn metadata(&self) -> ActionMetadata;

    fn input_schema(&self) -> &dyn SchemaValidator;

    fn output_schema(&self) -> Option<&dyn SchemaValidator> {
        None
    }

    fn compensation_config(&self) -> CompensationConfig {
        CompensationConfig::default()
    }

    fn validate_input(&self, params: &Params) -> Result<Params, ExecutionError> {
        self.input_schema().validate(params)
    }

    fn validate_output(&self, output: &Params) -> Result<Params, ExecutionError> {
        match self.output_schema() {
            Some(schema) => schema.validate(output),
            None => Ok(output.clone()),
        }
    }

    async fn before_validate_input(&self, params: Params) -> Result<Params, ExecutionError> {
        Ok(params)
    }

    async fn after_validate_input(&self, params: Params) -> Result<Params, ExecutionError> {
        Ok(params)
    }

    /// The only required hook. Must be re-entrant: the Executor may invoke
    /// it more than once across retry attempts (I1: at most once *per
    /// attempt*, not per invocation).
    async fn run(&self, params: Params, context: Context) -> RunOutcome;

    /// Pass-through by default (§9 Q2): receives and returns the same
    /// `RunOutcome` shape, and cannot rewrite an `Err` into an `Ok`.
    async fn after_run(&self, outcome: RunOutcome) -> RunOutcome {
        outcome
    }

    async fn before_validate_output(&self, output: Params) -> Result<Params, ExecutionError> {
        Ok(output)
    }

    async fn after_validate_output(&self, output: Params) -> Result<Params, ExecutionError> {
        Ok(output)
    }

    /// Compensation callback; only invoked when `compensation_config().enabled`
    /// and an attempt terminates in error (§4.5). The default is never
    /// reached by the Executor when compensation is disabled.
    async fn on_error(
        &self,
        _failed_params: Params,
        _err: ExecutionError,
        _context: Context,
    ) -> RunOutcome {
        RunOutcome::err(ExecutionError::internal(
            "on_error not implemented for this action",
        ))
    }

    /// Exposes this action as a self-describing capability for external
    /// collaborators (§6).
    fn to_tool(&self) -> ToolDescriptor
    where
        Self: Sized + 'static,
    {
        ToolDescriptor::from_action(self)
    }
}
