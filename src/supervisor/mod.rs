//! Task Supervisor (C3): spawns and monitors child tasks with deterministic
//! teardown.
//!
//! Rust's structured concurrency gives a more direct implementation than
//! the spec's Erlang-flavored mailbox/monitor model (§9 explicitly invites
//! this re-architecture). A `tokio::JoinHandle` already delivers its
//! outcome to exactly one owner exactly once and reports panics/aborts via
//! `JoinError` — this *is* the monitor. There is no separate mailbox to
//! drain: the "ordering guarantee" and "mailbox flush" clauses of §4.3
//! collapse to "await the handle once."

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ExecutionError;

/// Opaque handle to an asynchronous invocation (§3). Exclusively owned by
/// the invoker; there is no back-reference the spawned task can use to
/// reach into the owner.
pub struct AsyncRef<T> {
    pub id: uuid::Uuid,
    handle: JoinHandle<T>,
    cancel_token: CancellationToken,
    _owner_guard: Option<OwnerGuard>,
}

impl<T> AsyncRef<T> {
    /// Cooperative cancellation: flips the token the child is expected to
    /// observe. Idempotent, matching `CancellationToken::cancel`.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Hard kill: aborts the underlying task. A no-op if it already
    /// finished (I4: cancellation never turns into a late success).
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Direct access to the underlying `JoinHandle`, for callers that need
    /// to race it against their own timeout (e.g. the Executor's per-call
    /// deadline) instead of going through `timeout_cleanup`.
    pub fn handle_mut(&mut self) -> &mut JoinHandle<T> {
        &mut self.handle
    }
}

/// Spawns `fut` as a supervised child. The returned `CancellationToken` is
/// a child of the engine-wide root and should be checked cooperatively by
/// `fut` where it can; `timeout_cleanup` escalates to `abort()` if it
/// doesn't stop in time.
pub fn spawn_monitored<F, T>(fut: F) -> AsyncRef<T>
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let cancel_token = CancellationToken::new();
    let handle = tokio::spawn(fut);
    AsyncRef {
        id: uuid::Uuid::new_v4(),
        handle,
        cancel_token,
        _owner_guard: None,
    }
}

/// Same as `spawn_monitored`, but `fut` receives a clone of the child
/// token so it can observe cancellation cooperatively (e.g. checking it at
/// await points inside a loop).
pub fn spawn_monitored_cancellable<F, Fut, T>(make_fut: F) -> AsyncRef<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let cancel_token = CancellationToken::new();
    let handle = tokio::spawn(make_fut(cancel_token.clone()));
    AsyncRef {
        id: uuid::Uuid::new_v4(),
        handle,
        cancel_token,
        _owner_guard: None,
    }
}

/// (1) request graceful termination; (2) wait up to `shutdown_grace` for
/// completion; (3) if still alive, force-kill and wait up to `down_grace`;
/// (4) any task still unresolved after both graces is reported as a crash
/// outcome, never left running (I3).
pub async fn timeout_cleanup<T>(
    async_ref: &mut AsyncRef<T>,
    shutdown_grace: std::time::Duration,
    down_grace: std::time::Duration,
) -> Result<T, ExecutionError> {
    async_ref.cancel_token.cancel();

    if let Ok(result) = tokio::time::timeout(shutdown_grace, &mut async_ref.handle).await {
        return result.map_err(ExecutionError::from_join_error);
    }

    async_ref.handle.abort();

    match tokio::time::timeout(down_grace, &mut async_ref.handle).await {
        Ok(result) => result.map_err(ExecutionError::from_join_error),
        Err(_) => Err(ExecutionError::timeout(
            "supervised task did not terminate within shutdown and kill graces",
            (shutdown_grace + down_grace).as_millis() as u64,
        )),
    }
}

/// Drops its `Sender` half when the owning invocation is dropped, closing
/// the paired `Receiver` in `OwnerWatchdog`. The Rust-idiomatic analogue of
/// §4.3's "owner watchdog": when the owner goes away (panics, is dropped,
/// the runtime shuts the call down), the watchdog notices the channel
/// closing and tears the child down.
pub struct OwnerGuard {
    _sender: oneshot::Sender<()>,
}

/// Watches an `OwnerGuard` and cancels+aborts the supervised child if the
/// owner disappears before the child finishes on its own.
pub struct OwnerWatchdog {
    watch_handle: JoinHandle<()>,
}

impl OwnerWatchdog {
    pub fn spawn<T>(owner_ref: &mut AsyncRef<T>) -> (Self, OwnerGuard)
    where
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let cancel_token = owner_ref.cancel_token.clone();
        let watch_handle = tokio::spawn(async move {
            // Resolves as soon as the owner drops its guard, regardless of
            // why (normal completion races the drop, but cancelling twice
            // is harmless).
            let _ = rx.await;
            cancel_token.cancel();
        });
        (Self { watch_handle }, OwnerGuard { _sender: tx })
    }

    pub fn abort(&self) {
        self.watch_handle.abort();
    }
}

/// Opaque token selecting an instance-scoped supervisor (§4.3 "cleanup
/// scope"). Names are never built by concatenation; a handle either
/// resolves against the registry or the call fails `Configuration`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceHandle(pub Arc<str>);

impl InstanceHandle {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }
}

/// Registry of known instance handles. The default (global) supervisor
/// needs no entry here — it is just `tokio::spawn` on the ambient runtime.
#[derive(Default)]
pub struct InstanceRegistry {
    known: Mutex<HashMap<InstanceHandle, ()>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, handle: InstanceHandle) {
        self.known.lock().await.insert(handle, ());
    }

    /// Resolves a handle; `Configuration` if it was never registered.
    pub async fn resolve(&self, handle: &InstanceHandle) -> Result<(), ExecutionError> {
        if self.known.lock().await.contains_key(handle) {
            Ok(())
        } else {
            Err(ExecutionError::configuration(format!(
                "unknown instance handle: {}",
                handle.0
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn spawn_monitored_delivers_result_once() {
        let async_ref = spawn_monitored(async { 42 });
        let result = async_ref.handle.await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn timeout_cleanup_returns_result_when_task_finishes_in_grace() {
        let mut async_ref = spawn_monitored(async { 7 });
        let result = timeout_cleanup(
            &mut async_ref,
            Duration::from_millis(100),
            Duration::from_millis(100),
        )
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn timeout_cleanup_aborts_stuck_task() {
        let mut async_ref = spawn_monitored_cancellable(|_token| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            1
        });
        let result = timeout_cleanup(
            &mut async_ref,
            Duration::from_millis(10),
            Duration::from_millis(50),
        )
        .await;
        assert!(result.is_err());
        assert!(async_ref.is_finished());
    }

    #[tokio::test]
    async fn instance_registry_rejects_unknown_handle() {
        let registry = InstanceRegistry::new();
        let handle = InstanceHandle::new("workers");
        let err = registry.resolve(&handle).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn instance_registry_resolves_registered_handle() {
        let registry = InstanceRegistry::new();
        let handle = InstanceHandle::new("workers");
        registry.register(handle.clone()).await;
        assert!(registry.resolve(&handle).await.is_ok());
    }
}
