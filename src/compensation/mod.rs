//! Compensation (C5): invokes an action's `on_error` under its own
//! timeout/retry budget when an attempt terminates in error and
//! compensation is enabled.

use std::sync::Arc;
use std::time::Duration;

use crate::action::Action;
use crate::context::{Context, Params};
use crate::error::{ErrorKind, ExecutionError, RunOutcome};
use crate::supervisor::{spawn_monitored, timeout_cleanup};

/// Resolves the compensation timeout precedence: `opts.compensation_timeout
/// ?? config.compensation_timeout ?? opts.timeout ?? default` (§4.5).
pub fn resolve_timeout_ms(
    opts_compensation_timeout_ms: Option<u64>,
    config_compensation_timeout_ms: Option<u64>,
    opts_timeout_ms: Option<u64>,
    default_ms: u64,
) -> u64 {
    opts_compensation_timeout_ms
        .or(config_compensation_timeout_ms)
        .or(opts_timeout_ms)
        .unwrap_or(default_ms)
}

/// Runs compensation and folds its outcome into the final error's
/// `details`, per the table in §4.5. The returned error is always
/// `ExecutionFailure` with `details.original_error` pointing at `original`.
pub async fn run_compensation(
    action: Arc<dyn Action>,
    failed_params: Params,
    original: ExecutionError,
    context: Context,
    timeout_ms: u64,
    max_retries: u32,
    down_grace: Duration,
) -> ExecutionError {
    let mut attempt = 0;
    let outcome = loop {
        let params = failed_params.clone();
        let err = original.clone();
        let ctx = context.clone();
        let action = action.clone();

        let fut = async move { action.on_error(params, err, ctx).await };
        let mut async_ref = spawn_monitored(fut);
        let result = timeout_cleanup(
            &mut async_ref,
            Duration::from_millis(timeout_ms),
            down_grace,
        )
        .await;

        match result {
            Ok(outcome) => break CompensationAttempt::Finished(outcome),
            // Any `Err` surfaced by `timeout_cleanup` means the compensation
            // task itself timed out, crashed or was cancelled — never a
            // plain `Err` returned by `on_error`, which comes back as
            // `Ok(RunOutcome::Err { .. })` above. Both cases count against
            // `max_retries`.
            Err(e) => {
                if attempt >= max_retries {
                    break CompensationAttempt::Exhausted(e);
                }
                attempt += 1;
                continue;
            }
        }
    };

    match outcome {
        CompensationAttempt::Finished(RunOutcome::Ok { data, .. }) => {
            ExecutionError::execution_failure(original.message.clone())
                .with_detail("compensated", true)
                .with_detail(
                    "compensation_result",
                    serde_json::Value::Object(data),
                )
                .with_detail(
                    "original_error",
                    serde_json::to_value(&original).unwrap_or(serde_json::Value::Null),
                )
                .with_detail("compensation_attempts", attempt)
        }
        CompensationAttempt::Finished(RunOutcome::Err { error, .. }) => {
            finalize(original, attempt, "compensation_error", &error)
        }
        CompensationAttempt::Exhausted(e) if e.kind == ErrorKind::Timeout => {
            finalize(original, attempt, "compensation_error", &e)
        }
        CompensationAttempt::Exhausted(e) => {
            ExecutionError::execution_failure(original.message.clone())
                .with_detail("compensated", false)
                .with_detail("exit_reason", e.message.clone())
                .with_detail(
                    "original_error",
                    serde_json::to_value(&original).unwrap_or(serde_json::Value::Null),
                )
                .with_detail("compensation_attempts", attempt)
        }
    }
}

enum CompensationAttempt {
    Finished(RunOutcome),
    Exhausted(ExecutionError),
}

fn finalize(
    original: ExecutionError,
    attempts: u32,
    error_key: &str,
    error: &ExecutionError,
) -> ExecutionError {
    ExecutionError::execution_failure(original.message.clone())
        .with_detail("compensated", false)
        .with_detail(
            error_key,
            serde_json::to_value(error).unwrap_or(serde_json::Value::Null),
        )
        .with_detail(
            "original_error",
            serde_json::to_value(&original).unwrap_or(serde_json::Value::Null),
        )
        .with_detail("compensation_attempts", attempts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionMetadata, CompensationConfig};
    use crate::schema::FlatSchema;
    use async_trait::async_trait;
    use serde_json::json;

    struct Reversible {
        schema: FlatSchema,
    }

    #[async_trait]
    impl Action for Reversible {
        fn metadata(&self) -> ActionMetadata {
            ActionMetadata::new("reversible", "fails then compensates")
        }

        fn input_schema(&self) -> &dyn crate::schema::SchemaValidator {
            &self.schema
        }

        fn compensation_config(&self) -> CompensationConfig {
            CompensationConfig::enabled(Some(200), 0)
        }

        async fn run(&self, _params: Params, _context: Context) -> RunOutcome {
            RunOutcome::err(ExecutionError::execution_failure("boom"))
        }

        async fn on_error(
            &self,
            _failed_params: Params,
            _err: ExecutionError,
            _context: Context,
        ) -> RunOutcome {
            let mut data = Params::new();
            data.insert("compensated".into(), json!(true));
            data.insert("reversed".into(), json!(true));
            RunOutcome::ok(data)
        }
    }

    #[tokio::test]
    async fn compensation_fires_on_execution_error() {
        let action: Arc<dyn Action> = Arc::new(Reversible {
            schema: FlatSchema::new(),
        });
        let original = ExecutionError::execution_failure("boom");
        let final_error = run_compensation(
            action,
            Params::new(),
            original.clone(),
            Context::new(),
            200,
            0,
            Duration::from_millis(50),
        )
        .await;

        assert_eq!(final_error.details.get("compensated").unwrap(), true);
        assert_eq!(
            final_error.details["compensation_result"]["reversed"],
            true
        );
        assert_eq!(
            final_error.details["original_error"]["message"],
            "boom"
        );
    }

    struct StuckOnError {
        schema: FlatSchema,
    }

    #[async_trait]
    impl Action for StuckOnError {
        fn metadata(&self) -> ActionMetadata {
            ActionMetadata::new("stuck_on_error", "on_error never returns")
        }

        fn input_schema(&self) -> &dyn crate::schema::SchemaValidator {
            &self.schema
        }

        fn compensation_config(&self) -> CompensationConfig {
            CompensationConfig::enabled(Some(20), 0)
        }

        async fn run(&self, _params: Params, _context: Context) -> RunOutcome {
            RunOutcome::err(ExecutionError::execution_failure("boom"))
        }

        async fn on_error(
            &self,
            _failed_params: Params,
            _err: ExecutionError,
            _context: Context,
        ) -> RunOutcome {
            tokio::time::sleep(Duration::from_secs(10)).await;
            RunOutcome::ok(Params::new())
        }
    }

    #[tokio::test]
    async fn compensation_timeout_exhaustion_reports_timeout_kind() {
        let action: Arc<dyn Action> = Arc::new(StuckOnError {
            schema: FlatSchema::new(),
        });
        let original = ExecutionError::execution_failure("boom");
        let final_error = run_compensation(
            action,
            Params::new(),
            original,
            Context::new(),
            20,
            0,
            Duration::from_millis(20),
        )
        .await;

        assert_eq!(final_error.details.get("compensated").unwrap(), false);
        assert_eq!(
            final_error.details["compensation_error"]["kind"],
            "Timeout"
        );
    }

    #[test]
    fn timeout_precedence_resolves_in_order() {
        assert_eq!(resolve_timeout_ms(Some(1), Some(2), Some(3), 4), 1);
        assert_eq!(resolve_timeout_ms(None, Some(2), Some(3), 4), 2);
        assert_eq!(resolve_timeout_ms(None, None, Some(3), 4), 3);
        assert_eq!(resolve_timeout_ms(None, None, None, 4), 4);
    }
}
