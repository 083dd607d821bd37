//! HTTP endpoints of the PayFast server.
//!
//! - `POST /api/create-payment`: sign a payment request for the browser to submit.
//! - `POST /api/payfast/notify`: receive and verify ITN callbacks from the gateway.
//! - `GET /health`, `GET /`: liveness and service description.
//!
//! The notify endpoint never tells the caller which verification gate failed.

use axum::extract::rejection::FormRejection;
use axum::extract::{ConnectInfo, FromRequest, FromRequestParts, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde_json::json;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::fields::FieldMap;
use crate::gateway::Environment;
use crate::notification::{NotificationResult, NotificationVerifier, RejectReason};
use crate::order::OrderStatusSink;
use crate::payment::{BuildError, CheckoutRequest, PaymentRequestBuilder};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Shared, immutable state behind every handler.
pub struct AppState {
    pub environment: Environment,
    pub payments: PaymentRequestBuilder,
    pub verifier: NotificationVerifier,
    pub orders: Arc<dyn OrderStatusSink>,
    pub order_timeout: Duration,
    pub trust_forwarded_for: bool,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health))
        .route("/api/create-payment", post(post_create_payment))
        .route("/api/payfast/notify", post(post_notify))
}

/// `GET /`: service name, version and endpoint list.
#[instrument(skip_all)]
pub async fn get_root() -> impl IntoResponse {
    Json(json!({
        "message": "PayFast Payment Server",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "createPayment": "POST /api/create-payment",
            "notify": "POST /api/payfast/notify",
            "health": "GET /health"
        }
    }))
}

/// `GET /health`
#[instrument(skip_all)]
pub async fn get_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "OK",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "environment": state.environment.to_string(),
    }))
}

/// `POST /api/create-payment`: returns the signed fields and the gateway URL.
#[instrument(skip_all)]
pub async fn post_create_payment(
    State(state): State<Arc<AppState>>,
    CheckoutBody(checkout): CheckoutBody,
) -> Response {
    match state.payments.build(&checkout) {
        Ok(payment) => Json(json!({
            "success": true,
            "data": payment.fields(),
            "payfastUrl": payment.process_url().as_str(),
        }))
        .into_response(),
        Err(error) => {
            tracing::warn!(error = %error, "Payment request rejected");
            error.into_response()
        }
    }
}

/// `POST /api/payfast/notify`: verifies an ITN and forwards it to the order sink.
#[instrument(skip_all)]
pub async fn post_notify(
    State(state): State<Arc<AppState>>,
    caller: CallerOrigin,
    body: Result<Form<BTreeMap<String, String>>, FormRejection>,
) -> Response {
    let origin = caller.resolve(state.trust_forwarded_for);
    let Form(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!(origin = ?origin, error = %rejection, "Unreadable notification body");
            return RejectReason::InvalidInput.into_response();
        }
    };
    let fields = FieldMap::from(body);
    tracing::info!(
        origin = ?origin,
        m_payment_id = ?fields.text("m_payment_id"),
        payment_status = ?fields.text("payment_status"),
        "Notification received"
    );

    let notification = match state.verifier.verify(origin, fields).await {
        NotificationResult::Verified(notification) => notification,
        NotificationResult::Rejected(reason) => return reason.into_response(),
    };

    match tokio::time::timeout(state.order_timeout, state.orders.apply(&notification)).await {
        Ok(Ok(())) => (StatusCode::OK, "OK").into_response(),
        Ok(Err(error)) => {
            tracing::error!(
                m_payment_id = %notification.merchant_order_id,
                error = %error,
                "Order sink failed"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
        Err(_) => {
            tracing::error!(
                m_payment_id = %notification.merchant_order_id,
                timeout = ?state.order_timeout,
                "Order sink timed out"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

impl IntoResponse for BuildError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}

impl IntoResponse for RejectReason {
    fn into_response(self) -> Response {
        match self {
            RejectReason::UpstreamUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "Temporarily unavailable").into_response()
            }
            _ => (StatusCode::BAD_REQUEST, "Invalid notification").into_response(),
        }
    }
}

/// Network address of the caller, as seen by the socket and by proxies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerOrigin {
    pub peer: Option<IpAddr>,
    pub forwarded_for: Option<IpAddr>,
}

impl CallerOrigin {
    /// The address to run the origin check against.
    ///
    /// The forwarded address is only used when the deployment sits behind a
    /// trusted proxy; otherwise the header is caller-controlled.
    pub fn resolve(&self, trust_forwarded_for: bool) -> Option<IpAddr> {
        if trust_forwarded_for {
            self.forwarded_for.or(self.peer)
        } else {
            self.peer
        }
    }
}

fn first_forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

impl<S> FromRequestParts<S> for CallerOrigin
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(CallerOrigin {
            peer,
            forwarded_for: first_forwarded_for(&parts.headers),
        })
    }
}

/// Checkout details from a JSON or url-encoded form body.
pub struct CheckoutBody(pub CheckoutRequest);

impl<S> FromRequest<S> for CheckoutBody
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));

        let checkout = if is_form {
            Form::<BTreeMap<String, String>>::from_request(req, state)
                .await
                .map(|Form(form)| CheckoutRequest::from_form(form))
                .map_err(|rejection| bad_body(rejection.body_text()))?
        } else {
            Json::<CheckoutRequest>::from_request(req, state)
                .await
                .map(|Json(checkout)| checkout)
                .map_err(|rejection| bad_body(rejection.body_text()))?
        };
        Ok(CheckoutBody(checkout))
    }
}

fn bad_body(reason: String) -> Response {
    tracing::warn!(%reason, "Unreadable checkout body");
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": "Invalid request body" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::net::Ipv4Addr;

    #[test]
    fn test_forwarded_for_takes_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR,
            HeaderValue::from_static("197.97.145.144, 10.0.0.1"),
        );
        assert_eq!(
            first_forwarded_for(&headers),
            Some(Ipv4Addr::new(197, 97, 145, 144).into())
        );

        headers.insert(FORWARDED_FOR, HeaderValue::from_static("garbage"));
        assert_eq!(first_forwarded_for(&headers), None);
    }

    #[test]
    fn test_forwarded_for_only_when_trusted() {
        let caller = CallerOrigin {
            peer: Some(Ipv4Addr::new(10, 0, 0, 1).into()),
            forwarded_for: Some(Ipv4Addr::new(197, 97, 145, 144).into()),
        };
        assert_eq!(caller.resolve(false), caller.peer);
        assert_eq!(caller.resolve(true), caller.forwarded_for);

        let direct = CallerOrigin {
            peer: caller.peer,
            forwarded_for: None,
        };
        assert_eq!(direct.resolve(true), caller.peer);
    }

    #[test]
    fn test_reject_reason_status_codes() {
        assert_eq!(
            RejectReason::BadSignature.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RejectReason::UntrustedOrigin.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RejectReason::UpstreamUnavailable.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
