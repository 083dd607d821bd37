//! Server assembly and startup.

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;

use crate::config::Config;
use crate::handlers::{self, AppState};
use crate::notification::{NetworkFailurePolicy, NotificationVerifier};
use crate::order::{LoggingOrderSink, OrderStatusSink};
use crate::origin::{AnyOrigin, DnsOriginCheck, OriginCheck};
use crate::payment::PaymentRequestBuilder;
use crate::util::{SigDown, Telemetry};
use crate::validator::GatewayValidator;

/// Wires the configured collaborators into handler state.
///
/// Orders are handed to `orders`; pass [`LoggingOrderSink`] when the merchant
/// has nothing else to plug in.
pub fn app_state(config: &Config, orders: Arc<dyn OrderStatusSink>) -> AppState {
    let gateway = config.gateway();
    let environment = gateway.environment();

    let origin: Arc<dyn OriginCheck> = if config.trust_any_origin() {
        tracing::warn!("Origin check disabled for sandbox");
        Arc::new(AnyOrigin)
    } else {
        Arc::new(DnsOriginCheck::gateway().with_timeout(config.dns_timeout()))
    };
    let validator = GatewayValidator::new(gateway.validate_url().clone())
        .with_timeout(config.validation_timeout());
    let verifier = NotificationVerifier::new(origin, Arc::new(validator))
        .with_passphrase(config.passphrase())
        .with_network_failure_policy(NetworkFailurePolicy::for_environment(environment));

    let payments = PaymentRequestBuilder::new(
        config.merchant(),
        config.callback_urls(),
        gateway.process_url().clone(),
    )
    .with_fallback_email(config.fallback_email());

    AppState {
        environment,
        payments,
        verifier,
        orders,
        order_timeout: config.order_timeout(),
        trust_forwarded_for: config.trust_forwarded_for(),
    }
}

/// Routes plus the CORS layer, without request tracing.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new().merge(handlers::routes().with_state(state)).layer(
        cors::CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(cors::Any),
    )
}

/// Initializes and runs the PayFast server until SIGINT/SIGTERM.
///
/// - Loads `.env` variables.
/// - Installs the logging subscriber.
/// - Loads and validates the configuration.
/// - Serves the HTTP endpoints with graceful shutdown.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let telemetry = Telemetry::new(env!("CARGO_PKG_NAME"));

    let config = Config::load()?;
    let state = Arc::new(app_state(&config, Arc::new(LoggingOrderSink)));
    tracing::info!(
        environment = %state.environment,
        merchant_id = %config.merchant().id,
        passphrase = config.passphrase().is_some(),
        network_failure_policy = ?state.verifier.network_failure_policy(),
        "Configuration loaded"
    );

    let http_endpoints = router(state).layer(telemetry.http_tracing());

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let sig_down = SigDown::try_new()?;
    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(
        listener,
        http_endpoints.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(axum_graceful_shutdown)
    .await?;

    tracing::info!(service = telemetry.service(), "Server stopped");
    Ok(())
}
