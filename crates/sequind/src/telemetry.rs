//! Telemetry initialization for the Sequin daemon.
//!
//! Console tracing is always on. When the `telemetry` cargo feature is
//! compiled in *and* an OTLP endpoint is configured, spans and logs are
//! additionally exported via OTLP, tagged with the sequencer's map and log
//! tree IDs so that traces from several directories can share one
//! collector. Without the feature (or without an endpoint) only the
//! console `fmt` layer is installed.

use tracing_subscriber::EnvFilter;

/// Telemetry settings assembled from TOML config and environment.
#[derive(Debug, Clone, Default)]
#[allow(dead_code)]
pub struct TelemetryConfig {
    /// Log level filter (e.g. `"info"`, `"debug"`).
    pub level: String,
    /// OTLP collector endpoint. `None` keeps export disabled even when
    /// the feature is compiled in.
    pub otlp_endpoint: Option<String>,
    /// Custom OTLP headers in `key=value,key2=value2` format (for auth).
    pub otlp_headers: String,
    /// Service name reported in OTel resource attributes.
    pub service_name: String,
    /// Map tree this sequencer writes, attached as `sequin.map_id`.
    pub map_id: i64,
    /// Log tree this sequencer anchors into, attached as `sequin.log_id`.
    pub log_id: i64,
}

impl TelemetryConfig {
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// Initialize the telemetry subscriber.
///
/// Call this once at startup, before any `tracing` events are emitted.
pub fn init(config: &TelemetryConfig) {
    #[cfg(feature = "telemetry")]
    if let Some(endpoint) = config.otlp_endpoint.as_deref() {
        match init_otel(config, endpoint) {
            Ok(()) => return,
            Err(e) => eprintln!("Failed to init OpenTelemetry: {e}, falling back to console"),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .init();
}

/// OTLP export on top of console tracing: spans and logs with the
/// sequencer's tree identity in the resource attributes.
#[cfg(feature = "telemetry")]
fn init_otel(config: &TelemetryConfig, endpoint: &str) -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry::trace::TracerProvider;
    use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
    use opentelemetry_otlp::{LogExporter, SpanExporter, WithExportConfig, WithTonicConfig};
    use opentelemetry_sdk::Resource;
    use opentelemetry_sdk::logs::SdkLoggerProvider;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let service_name = if config.service_name.is_empty() {
        "sequind".to_string()
    } else {
        config.service_name.clone()
    };

    // One sequencer instance is identified by the tree pair it drives;
    // a collector shared by several directories separates them on these.
    let resource = Resource::builder()
        .with_attribute(KeyValue::new("service.name", service_name))
        .with_attribute(KeyValue::new("sequin.map_id", config.map_id))
        .with_attribute(KeyValue::new("sequin.log_id", config.log_id))
        .build();

    let metadata = parse_otlp_headers(&config.otlp_headers);

    // Span pipeline.
    let mut span_builder = SpanExporter::builder().with_tonic().with_endpoint(endpoint);
    if let Some(ref md) = metadata {
        span_builder = span_builder.with_metadata(md.clone());
    }
    let tracer_provider = SdkTracerProvider::builder()
        .with_resource(resource.clone())
        .with_batch_exporter(span_builder.build()?)
        .build();
    opentelemetry::global::set_tracer_provider(tracer_provider.clone());

    // Log pipeline, correlated with span context.
    let mut log_builder = LogExporter::builder().with_tonic().with_endpoint(endpoint);
    if let Some(ref md) = metadata {
        log_builder = log_builder.with_metadata(md.clone());
    }
    let logger_provider = SdkLoggerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(log_builder.build()?)
        .build();

    tracing_subscriber::registry()
        .with(config.filter())
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer("sequind")))
        .with(OpenTelemetryTracingBridge::new(&logger_provider))
        .init();

    tracing::info!(
        endpoint,
        map_id = config.map_id,
        log_id = config.log_id,
        "OpenTelemetry export initialized"
    );

    Ok(())
}

/// Parse `key=value,key2=value2` OTLP headers into tonic metadata.
/// Malformed pairs are dropped.
#[cfg(feature = "telemetry")]
fn parse_otlp_headers(raw: &str) -> Option<tonic::metadata::MetadataMap> {
    if raw.is_empty() {
        return None;
    }

    let mut map = tonic::metadata::MetadataMap::new();
    for pair in raw.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let parsed = (
            key.trim()
                .parse::<tonic::metadata::MetadataKey<tonic::metadata::Ascii>>(),
            value
                .trim()
                .parse::<tonic::metadata::MetadataValue<tonic::metadata::Ascii>>(),
        );
        if let (Ok(key), Ok(value)) = parsed {
            map.insert(key, value);
        }
    }

    Some(map)
}
