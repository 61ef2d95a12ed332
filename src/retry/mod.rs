//! Retry/Backoff (C4): retry eligibility and delay computation.
//!
//! Generalized from three recovery-strategy strings to a single
//! `ExecutionError`-kind-driven policy: `InvalidInput` and `Configuration`
//! never retry, `Timeout` defaults to non-retryable, and `ExecutionFailure`/
//! `Internal` retry by default — all overridable via `details.retry`.

use std::time::Duration;

use crate::error::{ErrorKind, ExecutionError};

/// Default cap on the exponential backoff delay (§6 `max_backoff_ms`).
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

/// `is_retryable(err)` from §4.4. `InvalidInput` and `Configuration` never
/// retry (malformed input or a bad setup won't fix itself); `Timeout` also
/// defaults to non-retryable (a stuck action is presumed stuck again), unless
/// `details.retry` overrides either way.
pub fn is_retryable(err: &ExecutionError) -> bool {
    if let Some(retry) = err.retry_override() {
        return retry;
    }
    matches!(err.kind, ErrorKind::ExecutionFailure | ErrorKind::Internal)
}

/// `should_retry?(err, attempt, max_retries)` from §4.4. `attempt` is
/// 0-indexed: the first retry happens when `attempt == 0` and `max_retries
/// >= 1`.
pub fn should_retry(err: &ExecutionError, attempt: u32, max_retries: u32) -> bool {
    attempt < max_retries && is_retryable(err)
}

/// `backoff(attempt, initial) = min(max_backoff_cap, initial * 2^attempt)`.
pub fn backoff_delay(attempt: u32, initial_ms: u64, max_backoff_ms: u64) -> Duration {
    let doubled = initial_ms.saturating_mul(2u64.saturating_pow(attempt.min(63)));
    Duration::from_millis(doubled.min(max_backoff_ms))
}

pub async fn sleep_backoff(attempt: u32, initial_ms: u64, max_backoff_ms: u64) {
    tokio::time::sleep(backoff_delay(attempt, initial_ms, max_backoff_ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_never_retries() {
        let err = ExecutionError::invalid_input("bad");
        assert!(!is_retryable(&err));
    }

    #[test]
    fn configuration_never_retries() {
        let err = ExecutionError::configuration("bad handle");
        assert!(!is_retryable(&err));
    }

    #[test]
    fn execution_failure_retries_by_default() {
        let err = ExecutionError::execution_failure("boom");
        assert!(is_retryable(&err));
    }

    #[test]
    fn timeout_does_not_retry_by_default() {
        let err = ExecutionError::timeout("slow", 50);
        assert!(!is_retryable(&err));
    }

    #[test]
    fn internal_retries_by_default() {
        let err = ExecutionError::internal("unexpected state");
        assert!(is_retryable(&err));
    }

    #[test]
    fn explicit_retry_true_overrides_timeout() {
        let err = ExecutionError::timeout("slow", 50).set_retry(true);
        assert!(is_retryable(&err));
    }

    #[test]
    fn explicit_retry_false_overrides_default() {
        let err = ExecutionError::execution_failure("boom").set_retry(false);
        assert!(!is_retryable(&err));
    }

    #[test]
    fn explicit_retry_true_overrides_invalid_input() {
        let err = ExecutionError::invalid_input("bad").set_retry(true);
        assert!(is_retryable(&err));
    }

    #[test]
    fn should_retry_respects_budget() {
        let err = ExecutionError::execution_failure("boom");
        assert!(should_retry(&err, 0, 1));
        assert!(!should_retry(&err, 1, 1));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0, 100, 30_000), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, 100, 30_000), Duration::from_millis(200));
        assert_eq!(backoff_delay(2, 100, 30_000), Duration::from_millis(400));
        assert_eq!(backoff_delay(20, 100, 30_000), Duration::from_millis(30_000));
    }
}
