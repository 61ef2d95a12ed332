//! Process-wide configuration (§6), read at call time and overridden
//! per-call by `ExecuteOptions`. Grounded on the teacher's
//! `ExecutionLimits::from_env`/`strict`/`relaxed` and
//! `TelemetryConfig::from_env`.

use crate::supervisor::InstanceRegistry;

#[derive(Debug)]
pub struct EngineConfig {
    pub default_timeout_ms: u64,
    pub default_max_retries: u32,
    pub default_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub await_timeout_ms: u64,
    pub async_shutdown_grace_ms: u64,
    pub async_down_grace_ms: u64,
    pub mailbox_flush_timeout_ms: u64,
    pub mailbox_flush_max_messages: u32,
    pub compensation_timeout_ms: Option<u64>,
    pub compensation_max_retries: u32,
    pub compensation_down_grace_ms: u64,
    pub telemetry_enabled: bool,
    pub instance_registry: InstanceRegistry,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            default_max_retries: 1,
            default_backoff_ms: 250,
            max_backoff_ms: 30_000,
            await_timeout_ms: 30_000,
            async_shutdown_grace_ms: 1_000,
            async_down_grace_ms: 100,
            mailbox_flush_timeout_ms: 0,
            mailbox_flush_max_messages: 10,
            compensation_timeout_ms: None,
            compensation_max_retries: 0,
            compensation_down_grace_ms: 100,
            telemetry_enabled: true,
            instance_registry: InstanceRegistry::new(),
        }
    }
}

impl EngineConfig {
    /// Reads `ACTION_ENGINE_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_u64("ACTION_ENGINE_DEFAULT_TIMEOUT_MS") {
            config.default_timeout_ms = v;
        }
        if let Some(v) = env_u32("ACTION_ENGINE_DEFAULT_MAX_RETRIES") {
            config.default_max_retries = v;
        }
        if let Some(v) = env_u64("ACTION_ENGINE_DEFAULT_BACKOFF_MS") {
            config.default_backoff_ms = v;
        }
        if let Some(v) = env_u64("ACTION_ENGINE_MAX_BACKOFF_MS") {
            config.max_backoff_ms = v;
        }
        if let Some(v) = env_u64("ACTION_ENGINE_AWAIT_TIMEOUT_MS") {
            config.await_timeout_ms = v;
        }
        if let Some(v) = env_u64("ACTION_ENGINE_ASYNC_SHUTDOWN_GRACE_MS") {
            config.async_shutdown_grace_ms = v;
        }
        if let Some(v) = env_u64("ACTION_ENGINE_ASYNC_DOWN_GRACE_MS") {
            config.async_down_grace_ms = v;
        }
        if let Some(v) = env_u64("ACTION_ENGINE_MAILBOX_FLUSH_TIMEOUT_MS") {
            config.mailbox_flush_timeout_ms = v;
        }
        if let Some(v) = env_u32("ACTION_ENGINE_MAILBOX_FLUSH_MAX_MESSAGES") {
            config.mailbox_flush_max_messages = v;
        }
        if let Some(v) = env_u64("ACTION_ENGINE_COMPENSATION_TIMEOUT_MS") {
            config.compensation_timeout_ms = Some(v);
        }
        if let Some(v) = env_u32("ACTION_ENGINE_COMPENSATION_MAX_RETRIES") {
            config.compensation_max_retries = v;
        }
        if let Some(v) = env_u64("ACTION_ENGINE_COMPENSATION_DOWN_GRACE_MS") {
            config.compensation_down_grace_ms = v;
        }
        if let Ok(v) = std::env::var("ACTION_ENGINE_TELEMETRY_ENABLED") {
            config.telemetry_enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Tight budgets, for tests that need fast failure.
    pub fn strict() -> Self {
        Self {
            default_timeout_ms: 2_000,
            default_max_retries: 1,
            default_backoff_ms: 10,
            max_backoff_ms: 1_000,
            await_timeout_ms: 2_000,
            async_shutdown_grace_ms: 50,
            async_down_grace_ms: 20,
            ..Self::default()
        }
    }

    /// Generous budgets, for long-running or exploratory workloads.
    pub fn relaxed() -> Self {
        Self {
            default_timeout_ms: 300_000,
            default_max_retries: 5,
            default_backoff_ms: 500,
            max_backoff_ms: 60_000,
            await_timeout_ms: 300_000,
            async_shutdown_grace_ms: 5_000,
            async_down_grace_ms: 1_000,
            ..Self::default()
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
