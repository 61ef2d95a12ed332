//! Async API (C7): `start`/`await_result`/`cancel` facade over the
//! Supervisor (C3) and Executor (C6).

use std::sync::Arc;
use std::time::Duration;

use crate::action::Action;
use crate::config::EngineConfig;
use crate::context::{Context, Params};
use crate::error::{ErrorKind, ExecutionError, RunOutcome};
use crate::executor::{ExecuteOptions, Executor};
use crate::supervisor::{spawn_monitored, timeout_cleanup, AsyncRef};

/// Spawns a supervised task that runs the full Executor pipeline for the
/// call. Owner is the caller: the returned `AsyncRef` is not shared.
pub fn start(
    action: Arc<dyn Action>,
    params: Params,
    context: Context,
    opts: ExecuteOptions,
) -> AsyncRef<RunOutcome> {
    spawn_monitored(async move { Executor::execute(action, params, context, opts).await })
}

/// Waits for the task's outcome or its await deadline, whichever comes
/// first (§4.7). On deadline, runs `timeout_cleanup` and surfaces
/// `Timeout`; on the task having crashed or aborted, surfaces
/// `ExecutionFailure`.
pub async fn await_result(
    async_ref: &mut AsyncRef<RunOutcome>,
    timeout: Duration,
    config: &EngineConfig,
) -> RunOutcome {
    match tokio::time::timeout(timeout, async_ref.handle_mut()).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_err)) => RunOutcome::err(ExecutionError::from_join_error(join_err)),
        Err(_) => {
            let result = timeout_cleanup(
                async_ref,
                Duration::from_millis(config.async_shutdown_grace_ms),
                Duration::from_millis(config.async_down_grace_ms),
            )
            .await;
            match result {
                Ok(outcome) => outcome,
                Err(_) => RunOutcome::err(ExecutionError::timeout(
                    "await deadline reached",
                    timeout.as_millis() as u64,
                )),
            }
        }
    }
}

/// Graceful `shutdown` then kill after grace (§4.7). Idempotent:
/// `AsyncRef::cancel` on an already-cancelled or already-finished task is a
/// no-op.
pub async fn cancel(async_ref: &AsyncRef<RunOutcome>) -> Result<(), ExecutionError> {
    async_ref.cancel();
    Ok(())
}

/// Cancels, then waits up to `shutdown_grace + down_grace` for the task to
/// actually stop, surfacing whatever outcome it produced (or an
/// `ExecutionFailure` if it never reported one). Used where a caller wants
/// `cancel` to be synchronous with teardown rather than fire-and-forget.
pub async fn cancel_and_await(
    async_ref: &mut AsyncRef<RunOutcome>,
    config: &EngineConfig,
) -> RunOutcome {
    match timeout_cleanup(
        async_ref,
        Duration::from_millis(config.async_shutdown_grace_ms),
        Duration::from_millis(config.async_down_grace_ms),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => RunOutcome::err(ExecutionError::execution_failure(
            "async task exited: cancelled",
        )),
    }
}

#[allow(dead_code)]
fn is_timeout(err: &ExecutionError) -> bool {
    err.kind == ErrorKind::Timeout
}
