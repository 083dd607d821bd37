use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

/// Process-wide logging setup.
///
/// Installs a `fmt` subscriber filtered by `RUST_LOG`, and hands out the HTTP
/// trace layer so request spans end up in the same output.
pub struct Telemetry {
    service: &'static str,
}

impl Telemetry {
    /// Installs the global subscriber. Call once, before anything logs.
    pub fn new(service: &'static str) -> Self {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        tracing::info!(service, version = env!("CARGO_PKG_VERSION"), "Logging initialized");
        Self { service }
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    /// Request/response spans for the axum router.
    pub fn http_tracing(&self) -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO))
    }
}
