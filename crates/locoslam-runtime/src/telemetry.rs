//! Tracing initialisation for the mapping service.
//!
//! Call [`init_tracing`] once at process startup, before the Tokio runtime
//! is built.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). When set, spans such as `refresh` and `remote_call` are exported over OTLP/HTTP. |
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `LOCOSLAM_LOG_FORMAT=json` | Newline-delimited JSON logs (see [`LogFormat::from_env`]). |
//!
//! # Example
//!
//! ```rust,no_run
//! use locoslam_runtime::telemetry::{LogFormat, init_tracing};
//!
//! // Hold the guard for the entire lifetime of the process.
//! let _guard = init_tracing("locoslam", LogFormat::from_env());
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Console log layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// [`LogFormat::Json`] when `LOCOSLAM_LOG_FORMAT` is `json`, compact
    /// otherwise.
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOCOSLAM_LOG_FORMAT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Compact,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Install the global `tracing` subscriber: env filter, console layer in
/// `format`, and an OTLP span exporter when `OTEL_EXPORTER_OTLP_ENDPOINT` is
/// set.
///
/// Keep the returned [`TracerProviderGuard`] alive until exit; dropping it
/// flushes pending spans.
pub fn init_tracing(service_name: &str, format: LogFormat) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let provider = build_provider(service_name);
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("locoslam")));

    let registry = tracing_subscriber::registry().with(env_filter).with(otel_layer);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Compact => registry.with(tracing_subscriber::fmt::layer().compact()).init(),
    }

    TracerProviderGuard(provider)
}

// ─────────────────────────────────────────────────────────────────────────────
// RAII guard
// ─────────────────────────────────────────────────────────────────────────────

/// Shuts down the OTel [`SdkTracerProvider`] on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[locoslam] OpenTelemetry provider shutdown error: {e}");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[locoslam] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple exporter: init runs before the Tokio runtime exists, and the
    // batch exporter would need one.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_provider_returns_none_without_endpoint() {
        // SAFETY: no other test in this crate reads this variable.
        unsafe { std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT") };
        assert!(build_provider("locoslam-test").is_none());
    }

    #[test]
    fn guard_without_provider_drops_quietly() {
        drop(TracerProviderGuard(None));
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::parse(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("pretty")), LogFormat::Compact);
        assert_eq!(LogFormat::parse(None), LogFormat::Compact);
    }
}
