//! Executor (C6): validate → hook → run → validate-output → retry/compensate.
//!
//! Grounded on the teacher's `execute_step_with_retry` attempt loop and
//! `execute_plan`'s phase ordering, generalized from one step-with-a-known
//! -action to the full Action pipeline (§4.6).

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use serde_json::Value;

use crate::action::Action;
use crate::compensation::{self, resolve_timeout_ms};
use crate::context::{Context, Params};
use crate::error::{ErrorKind, ExecutionError, RunOutcome};
use crate::retry;
use crate::supervisor::{spawn_monitored, timeout_cleanup};
use crate::telemetry::sanitize;

/// Per-call override layer over the process-wide `EngineConfig` (§6).
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub backoff_initial_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub compensation_timeout_ms: Option<u64>,
    pub instance_handle: Option<crate::supervisor::InstanceHandle>,
    pub telemetry_enabled: Option<bool>,
}

/// Resolved knobs after merging `ExecuteOptions` over `EngineConfig`
/// defaults, so the pipeline only ever has to read one flat struct.
struct ResolvedOptions {
    timeout_ms: u64,
    max_retries: u32,
    backoff_initial_ms: u64,
    max_backoff_ms: u64,
    compensation_timeout_ms: Option<u64>,
    telemetry_enabled: bool,
}

impl ResolvedOptions {
    fn resolve(opts: &ExecuteOptions, config: &crate::config::EngineConfig) -> Self {
        Self {
            timeout_ms: opts.timeout_ms.unwrap_or(config.default_timeout_ms),
            max_retries: opts.max_retries.unwrap_or(config.default_max_retries),
            backoff_initial_ms: opts
                .backoff_initial_ms
                .unwrap_or(config.default_backoff_ms),
            max_backoff_ms: opts.max_backoff_ms.unwrap_or(config.max_backoff_ms),
            compensation_timeout_ms: opts.compensation_timeout_ms,
            telemetry_enabled: opts.telemetry_enabled.unwrap_or(config.telemetry_enabled),
        }
    }
}

/// Redacted `{action, params, context}` triple attached to every telemetry
/// event (§6): params via `sanitize::redact_params`, context variables via
/// `sanitize::redact_value` over the same defaults.
fn telemetry_fields(action: &dyn Action, params: &Params, context: &Context) -> (String, Value, Value) {
    let name = action.metadata().name;
    let params = sanitize::redact_params(params);
    let context_value = Value::Object(
        context
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );
    let context = sanitize::redact_value(&context_value, 50, 4);
    (name, params, context)
}

pub struct Executor;

impl Executor {
    /// Runs the full pipeline for one invocation, including retries and
    /// compensation, against the default process-wide `EngineConfig`.
    pub async fn execute(
        action: Arc<dyn Action>,
        params: Params,
        context: Context,
        opts: ExecuteOptions,
    ) -> RunOutcome {
        Self::execute_with_config(action, params, context, opts, &crate::config::EngineConfig::default())
            .await
    }

    #[instrument(skip(action, params, context, opts, config), fields(action = %action.metadata().name))]
    pub async fn execute_with_config(
        action: Arc<dyn Action>,
        params: Params,
        context: Context,
        opts: ExecuteOptions,
        config: &crate::config::EngineConfig,
    ) -> RunOutcome {
        let resolved = ResolvedOptions::resolve(&opts, config);

        if let Some(handle) = &opts.instance_handle {
            if let Err(e) = config.instance_registry.resolve(handle).await {
                return RunOutcome::err(e);
            }
        }

        if resolved.telemetry_enabled {
            let (name, params_v, context_v) = telemetry_fields(&*action, &params, &context);
            tracing::event!(tracing::Level::INFO, action = %name, params = %params_v, context = %context_v, "action.start");
        }

        let mut attempt = 0;
        loop {
            let outcome = Self::run_attempt(
                action.clone(),
                params.clone(),
                context.clone(),
                resolved.timeout_ms,
                config,
            )
            .await;

            match outcome {
                RunOutcome::Ok { .. } => {
                    if resolved.telemetry_enabled {
                        let (name, params_v, context_v) =
                            telemetry_fields(&*action, &params, &context);
                        tracing::event!(tracing::Level::INFO, action = %name, params = %params_v, context = %context_v, "action.stop");
                    }
                    return outcome;
                }
                RunOutcome::Err { error, directive } => {
                    if retry::should_retry(&error, attempt, resolved.max_retries) {
                        if resolved.telemetry_enabled {
                            let (name, params_v, context_v) =
                                telemetry_fields(&*action, &params, &context);
                            tracing::event!(tracing::Level::INFO, action = %name, attempt, params = %params_v, context = %context_v, "action.retry");
                        }
                        retry::sleep_backoff(
                            attempt,
                            resolved.backoff_initial_ms,
                            resolved.max_backoff_ms,
                        )
                        .await;
                        attempt += 1;
                        continue;
                    }

                    let compensation_config = action.compensation_config();
                    if compensation_config.enabled {
                        let timeout_ms = resolve_timeout_ms(
                            resolved.compensation_timeout_ms,
                            config.compensation_timeout_ms,
                            Some(resolved.timeout_ms),
                            5_000,
                        );
                        let final_error = compensation::run_compensation(
                            action.clone(),
                            params.clone(),
                            error.clone(),
                            context.clone(),
                            timeout_ms,
                            compensation_config.max_retries,
                            Duration::from_millis(config.compensation_down_grace_ms),
                        )
                        .await;
                        if resolved.telemetry_enabled {
                            let (name, params_v, context_v) =
                                telemetry_fields(&*action, &params, &context);
                            tracing::event!(tracing::Level::ERROR, action = %name, error = %final_error, params = %params_v, context = %context_v, "action.exception");
                        }
                        return RunOutcome::Err {
                            error: final_error,
                            directive,
                        };
                    }

                    if resolved.telemetry_enabled {
                        let (name, params_v, context_v) =
                            telemetry_fields(&*action, &params, &context);
                        tracing::event!(tracing::Level::ERROR, action = %name, error = %error, params = %params_v, context = %context_v, "action.exception");
                    }
                    return RunOutcome::Err { error, directive };
                }
            }
        }
    }

    /// One full pass through `before_validate_input -> validate_input ->
    /// after_validate_input -> run -> after_run ->
    /// (before_validate_output -> validate_output -> after_validate_output,
    /// if output_schema present)`, wrapped in a supervised task with a
    /// deadline when `timeout_ms > 0`. With `timeout_ms == 0` the pipeline
    /// runs in-caller, with no task and no timer (§4.6 point 1).
    async fn run_attempt(
        action: Arc<dyn Action>,
        params: Params,
        mut context: Context,
        timeout_ms: u64,
        config: &crate::config::EngineConfig,
    ) -> RunOutcome {
        if timeout_ms == 0 {
            return Self::pipeline(action, params, context).await;
        }

        let now = now_monotonic_ms();
        context.deadline_monotonic_ms = Some(now + timeout_ms);

        let action_for_task = action.clone();
        let mut async_ref = spawn_monitored(async move {
            Self::pipeline(action_for_task, params, context).await
        });

        match tokio::time::timeout(Duration::from_millis(timeout_ms), async_ref.handle_mut())
            .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => RunOutcome::err(ExecutionError::from_join_error(join_err)),
            Err(_) => {
                let _ = timeout_cleanup(
                    &mut async_ref,
                    Duration::from_millis(config.async_shutdown_grace_ms),
                    Duration::from_millis(config.async_down_grace_ms),
                )
                .await;
                RunOutcome::err(ExecutionError::timeout(
                    "action timed out",
                    timeout_ms,
                ))
            }
        }
    }

    async fn pipeline(action: Arc<dyn Action>, params: Params, context: Context) -> RunOutcome {
        let params = match action.before_validate_input(params).await {
            Ok(p) => p,
            Err(e) => return RunOutcome::err(e),
        };

        let params = match action.validate_input(&params) {
            Ok(p) => p,
            Err(e) => return RunOutcome::err(e),
        };

        let params = match action.after_validate_input(params).await {
            Ok(p) => p,
            Err(e) => return RunOutcome::err(e),
        };

        let outcome = action.run(params, context).await;
        let outcome = action.after_run(outcome).await;

        let outcome = match outcome {
            RunOutcome::Ok { data, directive } if action.output_schema().is_some() => {
                match Self::validate_output_pipeline(&*action, data).await {
                    Ok(validated) => RunOutcome::Ok {
                        data: validated,
                        directive,
                    },
                    Err(e) => RunOutcome::Err { error: e, directive },
                }
            }
            other => other,
        };

        outcome
    }

    async fn validate_output_pipeline(
        action: &dyn Action,
        data: Params,
    ) -> Result<Params, ExecutionError> {
        let data = action.before_validate_output(data).await?;
        let data = action.validate_output(&data)?;
        action.after_validate_output(data).await
    }
}

/// Monotonic milliseconds since an arbitrary engine epoch (process start),
/// used for deadline arithmetic. Never wall-clock: deadlines must be immune
/// to system clock adjustments.
fn now_monotonic_ms() -> u64 {
    use std::sync::OnceLock;
    static EPOCH: OnceLock<std::time::Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(std::time::Instant::now);
    epoch.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionMetadata;
    use crate::schema::FlatSchema;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration as StdDuration;

    struct FlakyThenOk {
        schema: FlatSchema,
        failures_left: AtomicU32,
        runs: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Action for FlakyThenOk {
        fn metadata(&self) -> ActionMetadata {
            ActionMetadata::new("flaky", "fails N times then succeeds")
        }

        fn input_schema(&self) -> &dyn crate::schema::SchemaValidator {
            &self.schema
        }

        async fn run(&self, _params: Params, _context: Context) -> RunOutcome {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 {
                    Some(n - 1)
                } else {
                    None
                }
            }).is_ok()
            {
                RunOutcome::err(ExecutionError::execution_failure("not yet"))
            } else {
                let mut data = Params::new();
                data.insert("result".into(), serde_json::json!("ok on attempt 3"));
                RunOutcome::ok(data)
            }
        }
    }

    struct SleepyAction {
        schema: FlatSchema,
        sleep_ms: u64,
    }

    #[async_trait]
    impl Action for SleepyAction {
        fn metadata(&self) -> ActionMetadata {
            ActionMetadata::new("sleepy", "sleeps past its timeout")
        }

        fn input_schema(&self) -> &dyn crate::schema::SchemaValidator {
            &self.schema
        }

        async fn run(&self, _params: Params, _context: Context) -> RunOutcome {
            tokio::time::sleep(StdDuration::from_millis(self.sleep_ms)).await;
            RunOutcome::ok(Params::new())
        }
    }

    #[tokio::test]
    async fn retry_then_succeed() {
        let runs = Arc::new(AtomicU32::new(0));
        let action: Arc<dyn Action> = Arc::new(FlakyThenOk {
            schema: FlatSchema::new(),
            failures_left: AtomicU32::new(2),
            runs: runs.clone(),
        });

        let opts = ExecuteOptions {
            max_retries: Some(3),
            backoff_initial_ms: Some(1),
            ..Default::default()
        };

        let outcome = Executor::execute(action, Params::new(), Context::new(), opts).await;
        match outcome {
            RunOutcome::Ok { data, .. } => {
                assert_eq!(data.get("result").unwrap(), "ok on attempt 3")
            }
            RunOutcome::Err { error, .. } => panic!("expected success, got {error:?}"),
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalid_input_never_retries() {
        struct AlwaysInvalid {
            runs: Arc<AtomicU32>,
        }

        #[async_trait]
        impl Action for AlwaysInvalid {
            fn metadata(&self) -> ActionMetadata {
                ActionMetadata::new("always_invalid", "")
            }

            fn input_schema(&self) -> &dyn crate::schema::SchemaValidator {
                static SCHEMA: once_cell::sync::Lazy<FlatSchema> =
                    once_cell::sync::Lazy::new(|| {
                        FlatSchema::new().field("required_field", true, crate::schema::TypeTag::Any)
                    });
                &*SCHEMA
            }

            async fn run(&self, _params: Params, _context: Context) -> RunOutcome {
                self.runs.fetch_add(1, Ordering::SeqCst);
                RunOutcome::ok(Params::new())
            }
        }

        let runs = Arc::new(AtomicU32::new(0));
        let action: Arc<dyn Action> = Arc::new(AlwaysInvalid { runs: runs.clone() });
        let opts = ExecuteOptions {
            max_retries: Some(5),
            ..Default::default()
        };

        let outcome = Executor::execute(action, Params::new(), Context::new(), opts).await;
        assert!(!outcome.is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timeout_kills_a_stuck_action() {
        let action: Arc<dyn Action> = Arc::new(SleepyAction {
            schema: FlatSchema::new(),
            sleep_ms: 1_000,
        });
        let opts = ExecuteOptions {
            timeout_ms: Some(50),
            max_retries: Some(0),
            ..Default::default()
        };

        let start = std::time::Instant::now();
        let outcome = Executor::execute(action, Params::new(), Context::new(), opts).await;
        let elapsed = start.elapsed();

        match outcome {
            RunOutcome::Err { error, .. } => assert_eq!(error.kind, ErrorKind::Timeout),
            RunOutcome::Ok { .. } => panic!("expected timeout"),
        }
        assert!(elapsed < StdDuration::from_millis(1_500));
    }
}
