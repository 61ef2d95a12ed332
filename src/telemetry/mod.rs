//! Telemetry: `tracing`-based structured logging plus optional OTLP export,
//! kept close to the teacher's `init_telemetry`/`TelemetryConfig` since it
//! is pure ambient stack. Redaction lives in `sanitize`.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::runtime::Tokio;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use tracing::Level;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// OTLP collector endpoint, e.g. `http://localhost:4317`. `None` means
    /// console-only logging.
    pub otlp_endpoint: Option<String>,
    pub sampling_ratio: f64,
    pub enable_console_logging: bool,
    pub log_level: Level,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "action-execution-engine".to_string(),
            otlp_endpoint: None,
            sampling_ratio: 1.0,
            enable_console_logging: true,
            log_level: Level::INFO,
        }
    }
}

impl TelemetryConfig {
    /// `OTEL_SERVICE_NAME`, `OTEL_EXPORTER_OTLP_ENDPOINT`,
    /// `OTEL_TRACES_SAMPLER_ARG`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("OTEL_SERVICE_NAME") {
            config.service_name = name;
        }
        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            config.otlp_endpoint = Some(endpoint);
        }
        if let Ok(ratio) = std::env::var("OTEL_TRACES_SAMPLER_ARG") {
            if let Ok(r) = ratio.parse::<f64>() {
                config.sampling_ratio = r.clamp(0.0, 1.0);
            }
        }

        config
    }
}

/// Installs the global `tracing` subscriber. Returns the `Tracer` handle
/// when OTLP export is configured, so the caller can flush it at shutdown.
pub fn init_telemetry(config: TelemetryConfig) -> anyhow::Result<Option<Tracer>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(endpoint) = &config.otlp_endpoint {
        let tracer = init_otlp_tracer(&config.service_name, endpoint, config.sampling_ratio)?;
        let telemetry_layer = OpenTelemetryLayer::new(tracer.clone());

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(telemetry_layer);

        if config.enable_console_logging {
            subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
        } else {
            subscriber.init();
        }

        tracing::info!(
            service_name = %config.service_name,
            endpoint = %endpoint,
            sampling_ratio = config.sampling_ratio,
            "telemetry initialized with OTLP export"
        );

        Ok(Some(tracer))
    } else {
        let subscriber = tracing_subscriber::registry().with(env_filter);

        if config.enable_console_logging {
            subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
        } else {
            subscriber.init();
        }

        tracing::info!("telemetry initialized (console only, no OTLP)");
        Ok(None)
    }
}

fn init_otlp_tracer(
    service_name: &str,
    endpoint: &str,
    sampling_ratio: f64,
) -> anyhow::Result<Tracer> {
    let sampler = if sampling_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if sampling_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(sampling_ratio)
    };

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .build_span_exporter()?,
            Tokio,
        )
        .with_config(
            sdktrace::Config::default()
                .with_sampler(sampler)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    service_name.to_string(),
                )])),
        )
        .build();

    let tracer = tracer_provider.tracer(service_name.to_string());
    global::set_tracer_provider(tracer_provider);
    Ok(tracer)
}

/// Flushes any pending OTLP batches. Must be called before process exit or
/// spans accumulated in the batch exporter are lost.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
    tracing::info!("telemetry shut down");
}

/// Redaction of logged params/context (§6). Keys in the denylist are
/// replaced with a `"[REDACTED]"` marker; binaries (base64-looking long
/// strings are out of scope to detect, so this only bounds size) over 1
/// KiB are truncated; nesting past `max_depth` is collapsed; maps/arrays
/// longer than `max_items` are truncated with a count marker.
pub mod sanitize {
    use once_cell::sync::Lazy;
    use serde_json::{Map, Value};
    use std::collections::HashSet;

    const REDACTED: &str = "[REDACTED]";
    const MAX_BINARY_BYTES: usize = 1024;

    static DENYLIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
        [
            "password",
            "token",
            "secret",
            "authorization",
            "cookie",
            "api_key",
            "client_secret",
            "private_key",
        ]
        .into_iter()
        .collect()
    });

    fn is_sensitive_key(key: &str) -> bool {
        let lower = key.to_ascii_lowercase();
        DENYLIST.iter().any(|d| lower.contains(d))
    }

    /// Recursively sanitizes a `serde_json::Value` for safe logging.
    pub fn redact_value(value: &Value, max_items: usize, max_depth: u32) -> Value {
        redact_at_depth(value, max_items, max_depth, 0)
    }

    fn redact_at_depth(value: &Value, max_items: usize, max_depth: u32, depth: u32) -> Value {
        if depth >= max_depth {
            return Value::String("[TRUNCATED: max depth reached]".into());
        }

        match value {
            Value::Object(map) => {
                let mut out = Map::new();
                for (i, (k, v)) in map.iter().enumerate() {
                    if i >= max_items {
                        out.insert(
                            "__truncated__".into(),
                            Value::String(format!("{} more keys omitted", map.len() - max_items)),
                        );
                        break;
                    }
                    let sanitized = if is_sensitive_key(k) {
                        Value::String(REDACTED.into())
                    } else {
                        redact_at_depth(v, max_items, max_depth, depth + 1)
                    };
                    out.insert(k.clone(), sanitized);
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                let truncated: Vec<Value> = items
                    .iter()
                    .take(max_items)
                    .map(|v| redact_at_depth(v, max_items, max_depth, depth + 1))
                    .collect();
                Value::Array(truncated)
            }
            Value::String(s) if s.len() > MAX_BINARY_BYTES => {
                Value::String(format!("[TRUNCATED: {} bytes]", s.len()))
            }
            other => other.clone(),
        }
    }

    /// Convenience for `Params`/`Context` maps using the defaults implied
    /// by §6 (`max_metadata_items` defaults to 50, nesting depth 4).
    pub fn redact_params(params: &serde_json::Map<String, Value>) -> Value {
        redact_value(&Value::Object(params.clone()), 50, 4)
    }
}

#[cfg(test)]
mod tests {
    use super::sanitize::*;
    use serde_json::json;

    #[test]
    fn redacts_sensitive_keys() {
        let params = json!({"password": "hunter2", "username": "alice"})
            .as_object()
            .unwrap()
            .clone();
        let redacted = redact_params(&params);
        assert_eq!(redacted["password"], "[REDACTED]");
        assert_eq!(redacted["username"], "alice");
    }

    #[test]
    fn truncates_long_strings() {
        let long = "x".repeat(2000);
        let params = json!({"blob": long}).as_object().unwrap().clone();
        let redacted = redact_params(&params);
        assert!(redacted["blob"].as_str().unwrap().starts_with("[TRUNCATED"));
    }

    #[test]
    fn caps_nesting_depth() {
        let nested = json!({"a": {"b": {"c": {"d": {"e": 1}}}}});
        let redacted = redact_value(&nested, 50, 4);
        let d = &redacted["a"]["b"]["c"]["d"];
        assert!(d.as_str().unwrap().starts_with("[TRUNCATED"));
    }
}
