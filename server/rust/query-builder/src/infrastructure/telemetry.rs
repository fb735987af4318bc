use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use tracing_subscriber::{
    fmt, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::infrastructure::config::{AppConfig, TelemetryConfig};

/// tracing-subscriber を初期化する。
/// trace_endpoint が指定されている場合、OTLP gRPC エクスポータを設定する。
pub fn init_telemetry(app: &AppConfig, cfg: &TelemetryConfig) -> anyhow::Result<()> {
    let tracer = if let Some(ref endpoint) = cfg.trace_endpoint {
        let exporter = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?;
        let provider = sdktrace::TracerProvider::builder()
            .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
            .with_sampler(sdktrace::Sampler::TraceIdRatioBased(cfg.sample_rate))
            .with_resource(Resource::new(vec![
                KeyValue::new("service.name", app.name.clone()),
                KeyValue::new("service.version", app.version.clone()),
                KeyValue::new("tier", "system"),
                KeyValue::new("environment", app.environment.clone()),
            ]))
            .build();
        let tracer = provider.tracer("k1s0");
        global::set_tracer_provider(provider);
        Some(tracer)
    } else {
        None
    };

    // RUST_LOG が設定されていればそちらを優先する
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cfg.log_format == "text" {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);
        let subscriber = registry.with(fmt_layer);
        if let Some(t) = tracer {
            subscriber
                .with(tracing_opentelemetry::layer().with_tracer(t))
                .try_init()?;
        } else {
            subscriber.try_init()?;
        }
    } else {
        let fmt_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);
        let subscriber = registry.with(fmt_layer);
        if let Some(t) = tracer {
            subscriber
                .with(tracing_opentelemetry::layer().with_tracer(t))
                .try_init()?;
        } else {
            subscriber.try_init()?;
        }
    }

    Ok(())
}

/// OpenTelemetry TracerProvider をシャットダウンする。
pub fn shutdown() {
    global::shutdown_tracer_provider();
}
