//! Tracing bootstrap shared by the server binary and its CLI commands.

use anyhow::{Result, anyhow};
use once_cell::sync::OnceCell;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{Protocol, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_FILTER: &str = "info,tower_http=warn";

static INIT: OnceCell<()> = OnceCell::new();

/// Where log lines and spans go. Built by the caller from its own settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObsConfig {
    pub service_name: &'static str,
    pub env_filter: String,
    pub otlp_endpoint: Option<String>,
}

impl ObsConfig {
    pub fn new(service_name: &'static str) -> Self {
        Self {
            service_name,
            env_filter: DEFAULT_FILTER.to_string(),
            otlp_endpoint: None,
        }
    }

    pub fn env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = filter.into();
        self
    }

    pub fn otlp_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.otlp_endpoint = endpoint;
        self
    }
}

/// Keeps the span exporter alive. Call [`shutdown`](Self::shutdown) before
/// exiting so batched spans are flushed; dropping the guard does the same on
/// a best-effort basis.
#[must_use = "dropping the guard shuts down span export"]
#[derive(Debug, Default)]
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl TracingGuard {
    pub fn exports_spans(&self) -> bool {
        self.provider.is_some()
    }

    pub fn shutdown(&mut self) -> Result<()> {
        match self.provider.take() {
            Some(provider) => provider
                .shutdown()
                .map_err(|err| anyhow!("span exporter shutdown failed: {err}")),
            None => Ok(()),
        }
    }
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            eprintln!("{err}");
        }
    }
}

/// Install the fmt subscriber, plus an OTLP span exporter when the config
/// names an endpoint. A second call returns an inert guard.
pub fn init_tracing(config: ObsConfig) -> Result<TracingGuard> {
    if INIT.get().is_some() {
        return Ok(TracingGuard::default());
    }

    let env_filter = EnvFilter::try_new(&config.env_filter)?;
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    let guard = match config.otlp_endpoint {
        Some(endpoint) => {
            let exporter = SpanExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpBinary)
                .with_endpoint(endpoint)
                .build()?;
            let provider = SdkTracerProvider::builder()
                .with_resource(Resource::builder().with_service_name(config.service_name).build())
                .with_batch_exporter(exporter)
                .build();
            let tracer = provider.tracer(config.service_name);
            registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()?;
            TracingGuard {
                provider: Some(provider),
            }
        }
        None => {
            registry.try_init()?;
            TracingGuard::default()
        }
    };

    INIT.set(())
        .map_err(|_| anyhow!("tracing already initialized"))?;
    Ok(guard)
}
