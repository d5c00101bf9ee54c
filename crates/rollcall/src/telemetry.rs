//! Logging and OpenTelemetry setup.
//!
//! Always installs a `tracing` fmt layer. When an OTLP endpoint is configured,
//! traces, logs and metrics are also exported over gRPC.

use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use rollconf::TelemetryConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Bounds how long an unreachable collector can stall an export.
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_FILTER: &str = "info,rollcall=debug";

/// Owns the exporter pipelines; flush them with [`TelemetryGuard::shutdown`].
#[derive(Default)]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    logger_provider: Option<SdkLoggerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl TelemetryGuard {
    pub fn shutdown(self) {
        if let Some(provider) = self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to flush traces: {e}");
            }
        }
        if let Some(provider) = self.logger_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to flush logs: {e}");
            }
        }
        if let Some(provider) = self.meter_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to flush metrics: {e}");
            }
        }
    }
}

fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    if config.log_level.trim().is_empty() {
        return EnvFilter::new(DEFAULT_FILTER);
    }
    EnvFilter::try_new(&config.log_level).unwrap_or_else(|e| {
        eprintln!("Invalid log filter {:?} ({e}), using {DEFAULT_FILTER}", config.log_level);
        EnvFilter::new(DEFAULT_FILTER)
    })
}

pub fn init(config: &TelemetryConfig) -> Result<TelemetryGuard> {
    let filter = env_filter(config);

    if config.otlp_endpoint.trim().is_empty() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .context("Failed to install tracing subscriber")?;
        tracing::info!("Logging to stderr only (no OTLP endpoint configured)");
        return Ok(TelemetryGuard::default());
    }

    let resource = Resource::builder_empty()
        .with_service_name("rollcall")
        .with_attributes(vec![KeyValue::new("service.version", env!("CARGO_PKG_VERSION"))])
        .build();

    let endpoint = if config.otlp_endpoint.contains("://") {
        config.otlp_endpoint.clone()
    } else {
        format!("http://{}", config.otlp_endpoint)
    };

    let span_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP span exporter")?;

    let span_processor =
        opentelemetry_sdk::trace::BatchSpanProcessor::builder(span_exporter).build();

    let tracer_provider = SdkTracerProvider::builder()
        .with_span_processor(span_processor)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();
    let tracer = tracer_provider.tracer("rollcall");
    global::set_tracer_provider(tracer_provider.clone());

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP log exporter")?;

    let log_processor = opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build();

    let logger_provider = SdkLoggerProvider::builder()
        .with_log_processor(log_processor)
        .with_resource(resource.clone())
        .build();

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP metric exporter")?;

    let meter_provider = SdkMeterProvider::builder()
        .with_reader(opentelemetry_sdk::metrics::PeriodicReader::builder(metric_exporter).build())
        .with_resource(resource)
        .build();
    global::set_meter_provider(meter_provider.clone());

    let log_bridge =
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(log_bridge)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(endpoint = %config.otlp_endpoint, "OpenTelemetry export enabled (traces, logs, metrics)");

    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
        logger_provider: Some(logger_provider),
        meter_provider: Some(meter_provider),
    })
}

/// Remote parent from a W3C `traceparent` header:
/// `00-{32 hex trace id}-{16 hex span id}-{2 hex flags}`.
pub fn parse_traceparent(traceparent: Option<&str>) -> Option<opentelemetry::Context> {
    use opentelemetry::trace::{
        SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    };

    let header = traceparent?.trim();
    let mut fields = header.split('-');
    let (Some(version), Some(trace_hex), Some(span_hex), Some(flags_hex), None) = (
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
    ) else {
        tracing::debug!(traceparent = header, "Ignoring malformed traceparent");
        return None;
    };

    if version != "00" {
        tracing::debug!(traceparent = header, "Ignoring unsupported traceparent version");
        return None;
    }

    let trace_id = TraceId::from_bytes(hex_array::<16>(trace_hex)?);
    let span_id = SpanId::from_bytes(hex_array::<8>(span_hex)?);
    let flags = hex_array::<1>(flags_hex).map_or(0, |[b]| b);

    let parent = SpanContext::new(
        trace_id,
        span_id,
        TraceFlags::new(flags),
        true,
        TraceState::default(),
    );
    if !parent.is_valid() {
        return None;
    }
    Some(opentelemetry::Context::current().with_remote_span_context(parent))
}

/// `info_span!` whose parent is the remote context in a traceparent header.
#[macro_export]
macro_rules! span_with_parent {
    ($traceparent:expr, $name:expr) => {{
        use tracing_opentelemetry::OpenTelemetrySpanExt;

        let span = tracing::info_span!($name);
        if let Some(parent) = $crate::telemetry::parse_traceparent($traceparent) {
            span.set_parent(parent);
        }
        span
    }};
    ($traceparent:expr, $name:expr, $($field:tt)*) => {{
        use tracing_opentelemetry::OpenTelemetrySpanExt;

        let span = tracing::info_span!($name, $($field)*);
        if let Some(parent) = $crate::telemetry::parse_traceparent($traceparent) {
            span.set_parent(parent);
        }
        span
    }};
}

fn hex_array<const N: usize>(hex: &str) -> Option<[u8; N]> {
    if hex.len() != N * 2 || !hex.is_ascii() {
        return None;
    }
    let mut out = [0u8; N];
    for (byte, pair) in out.iter_mut().zip(hex.as_bytes().chunks(2)) {
        let pair = std::str::from_utf8(pair).ok()?;
        *byte = u8::from_str_radix(pair, 16).ok()?;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::TraceContextExt;

    const VALID: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    #[test]
    fn test_hex_array() {
        assert_eq!(hex_array::<4>("deadbeef"), Some([0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(hex_array::<4>("short"), None);
        assert_eq!(hex_array::<4>("not_hex!"), None);
    }

    #[test]
    fn test_valid_traceparent_is_remote_parent() {
        let ctx = parse_traceparent(Some(VALID)).unwrap();
        let span = ctx.span();
        let parent = span.span_context();
        assert!(parent.is_remote());
        assert_eq!(parent.trace_id().to_string(), "0af7651916cd43dd8448eb211c80319c");
        assert!(parent.is_sampled());
    }

    #[test]
    fn test_rejected_traceparents() {
        assert!(parse_traceparent(None).is_none());
        assert!(parse_traceparent(Some("not-a-valid-traceparent")).is_none());
        assert!(parse_traceparent(Some(&VALID.replacen("00", "01", 1))).is_none());
        assert!(parse_traceparent(Some("00-short-b7ad6b7169203331-01")).is_none());
        assert!(parse_traceparent(Some(&format!("{VALID}-extra"))).is_none());
        let zero_trace = "00-00000000000000000000000000000000-b7ad6b7169203331-01";
        assert!(parse_traceparent(Some(zero_trace)).is_none());
    }

    #[test]
    fn test_env_filter_falls_back() {
        let config = TelemetryConfig {
            otlp_endpoint: String::new(),
            log_level: "[[[".to_string(),
        };
        // Falls back instead of failing startup
        let _ = env_filter(&config);
    }
}
