use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode, header};
use payfast_rs::config::Config;
use payfast_rs::fields::{FieldMap, SIGNATURE_FIELD};
use payfast_rs::gateway::Environment;
use payfast_rs::handlers::AppState;
use payfast_rs::notification::{NetworkFailurePolicy, NotificationVerifier, VerifiedNotification};
use payfast_rs::order::{LoggingOrderSink, OrderSinkError, OrderStatusSink};
use payfast_rs::origin::AnyOrigin;
use payfast_rs::run::{app_state, router};
use payfast_rs::signature::{self, Passphrase};
use payfast_rs::validator::GatewayValidator;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PASSPHRASE: &str = "jt7NOE43FZPn";

#[derive(Default)]
struct RecordingSink {
    applied: Mutex<Vec<VerifiedNotification>>,
    fail: bool,
}

#[async_trait]
impl OrderStatusSink for RecordingSink {
    async fn apply(&self, notification: &VerifiedNotification) -> Result<(), OrderSinkError> {
        self.applied.lock().unwrap().push(notification.clone());
        if self.fail {
            Err(OrderSinkError("database offline".to_string()))
        } else {
            Ok(())
        }
    }
}

fn config(validate_url: &str, sandbox: bool) -> Config {
    Config::from_json(
        &json!({
            "sandbox": sandbox,
            "trust_any_origin_in_sandbox": true,
            "dns_timeout_ms": 200,
            "validation_timeout_ms": 200,
            "merchant": { "id": "10000100", "key": "46f0cd694581a", "passphrase": PASSPHRASE },
            "urls": {
                "return": "https://shop.example/return",
                "cancel": "https://shop.example/cancel",
                "notify": "https://shop.example/api/payfast/notify"
            },
            "fallback_email": "noreply@shop.example",
            "gateway": { "validate_url": validate_url }
        })
        .to_string(),
    )
    .unwrap()
}

async fn gateway(body: &str, delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/eng/query/validate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

fn validate_url(server: &MockServer) -> String {
    format!("{}/eng/query/validate", server.uri())
}

fn app(config: &Config, sink: Arc<RecordingSink>) -> Router {
    router(Arc::new(app_state(config, sink)))
}

fn caller() -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::from(([197, 97, 145, 144], 443)))
}

fn signed_notification(passphrase: &str) -> FieldMap {
    let fields = FieldMap::new()
        .with("m_payment_id", "ORDER_1700000000000")
        .with("pf_payment_id", "1089250")
        .with("payment_status", "COMPLETE")
        .with("item_name", "Blue Widget")
        .with("amount_gross", "10.00")
        .with("amount_fee", "-2.30")
        .with("amount_net", "7.70")
        .with("name_first", "Thandi")
        .with("email_address", "thandi+shop@example.com")
        .with("merchant_id", "10000100");
    let signature = signature::sign(&fields, Some(&Passphrase::new(passphrase)));
    fields.with(SIGNATURE_FIELD, signature.into_string())
}

fn form_body(fields: &FieldMap) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields.form_pairs())
        .finish()
}

fn notify_request(fields: &FieldMap) -> Request<Body> {
    let mut request = Request::post("/api/payfast/notify")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form_body(fields)))
        .unwrap();
    request.extensions_mut().insert(caller());
    request
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

#[tokio::test]
async fn test_health_reports_environment() {
    let app = app(&config("http://127.0.0.1:1/", true), Arc::default());
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "OK");
    assert_eq!(body["environment"], "sandbox");
    assert!(body["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn test_root_lists_endpoints() {
    let app = app(&config("http://127.0.0.1:1/", false), Arc::default());
    let response = app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["endpoints"]["notify"], "POST /api/payfast/notify");
}

#[tokio::test]
async fn test_create_payment_from_json() {
    let app = app(&config("http://127.0.0.1:1/", true), Arc::default());
    let request = Request::post("/api/create-payment")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "amount": "R 1,250.5",
                "itemName": "Blue Widget",
                "customerName": "Thandi van der Merwe"
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["payfastUrl"], "https://sandbox.payfast.co.za/eng/process");
    let data = &body["data"];
    assert_eq!(data["amount"], "1250.50");
    assert_eq!(data["name_last"], "van der Merwe");
    assert_eq!(data["email_address"], "noreply@shop.example");
    assert!(data["m_payment_id"].as_str().unwrap().starts_with("ORDER_"));

    let fields: FieldMap = serde_json::from_value(data.clone()).unwrap();
    let received = fields.text(SIGNATURE_FIELD).unwrap();
    assert!(signature::verify(
        &fields,
        Some(&Passphrase::new(PASSPHRASE)),
        &received
    ));
}

#[tokio::test]
async fn test_create_payment_from_form() {
    let app = app(&config("http://127.0.0.1:1/", false), Arc::default());
    let request = Request::post("/api/create-payment")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("amount=99.5&itemName=Gift+Card&customerPhone=0821234567"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["payfastUrl"], "https://www.payfast.co.za/eng/process");
    assert_eq!(body["data"]["amount"], "99.50");
    assert_eq!(body["data"]["item_name"], "Gift Card");
    assert_eq!(body["data"]["custom_str2"], "0821234567");
}

#[tokio::test]
async fn test_create_payment_rejects_missing_fields() {
    let app = app(&config("http://127.0.0.1:1/", true), Arc::default());
    let request = Request::post("/api/create-payment")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "itemName": "Widget" }).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({ "success": false, "error": "Amount and item name are required" })
    );
}

#[tokio::test]
async fn test_create_payment_rejects_malformed_json() {
    let app = app(&config("http://127.0.0.1:1/", true), Arc::default());
    let request = Request::post("/api/create-payment")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["success"], false);
}

#[tokio::test]
async fn test_notify_accepts_verified_notification() {
    let server = gateway("VALID", Duration::ZERO).await;
    let sink = Arc::new(RecordingSink::default());
    let app = app(&config(&validate_url(&server), true), sink.clone());

    let response = app
        .oneshot(notify_request(&signed_notification(PASSPHRASE)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "OK");

    let applied = sink.applied.lock().unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].merchant_order_id, "ORDER_1700000000000");
    assert_eq!(applied[0].gross_amount, "10.00");
}

#[tokio::test]
async fn test_notify_rejects_forged_signature() {
    let server = gateway("VALID", Duration::ZERO).await;
    let sink = Arc::new(RecordingSink::default());
    let app = app(&config(&validate_url(&server), true), sink.clone());

    let response = app
        .oneshot(notify_request(&signed_notification("guessed-passphrase")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "Invalid notification");
    assert!(sink.applied.lock().unwrap().is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_notify_rejects_untrusted_origin_in_production() {
    let server = gateway("VALID", Duration::ZERO).await;
    let sink = Arc::new(RecordingSink::default());
    let app = app(&config(&validate_url(&server), false), sink.clone());

    let mut request = notify_request(&signed_notification(PASSPHRASE));
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 9], 40000))));
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "Invalid notification");
    assert!(sink.applied.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_notify_tolerates_slow_gateway_in_sandbox() {
    let server = gateway("VALID", Duration::from_secs(2)).await;
    let sink = Arc::new(RecordingSink::default());
    let app = app(&config(&validate_url(&server), true), sink.clone());

    let response = app
        .oneshot(notify_request(&signed_notification(PASSPHRASE)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(sink.applied.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_notify_asks_for_redelivery_when_gateway_unreachable_in_production() {
    let server = gateway("VALID", Duration::from_secs(2)).await;
    let sink = Arc::new(RecordingSink::default());
    let validator = GatewayValidator::new(Url::parse(&validate_url(&server)).unwrap())
        .with_timeout(Duration::from_millis(100));
    let verifier = NotificationVerifier::new(Arc::new(AnyOrigin), Arc::new(validator))
        .with_passphrase(Some(Passphrase::new(PASSPHRASE)))
        .with_network_failure_policy(NetworkFailurePolicy::for_environment(
            Environment::Production,
        ));
    let mut state = app_state(&config(&validate_url(&server), false), sink.clone());
    state.verifier = verifier;

    let response = router(Arc::new(state))
        .oneshot(notify_request(&signed_notification(PASSPHRASE)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(sink.applied.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_notify_rejects_invalid_verdict_even_in_sandbox() {
    let server = gateway("INVALID", Duration::ZERO).await;
    let sink = Arc::new(RecordingSink::default());
    let app = app(&config(&validate_url(&server), true), sink.clone());

    let response = app
        .oneshot(notify_request(&signed_notification(PASSPHRASE)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(sink.applied.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_notify_reports_order_sink_failure() {
    let server = gateway("VALID", Duration::ZERO).await;
    let sink = Arc::new(RecordingSink {
        fail: true,
        ..RecordingSink::default()
    });
    let app = app(&config(&validate_url(&server), true), sink.clone());

    let response = app
        .oneshot(notify_request(&signed_notification(PASSPHRASE)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "Internal error");
}

#[tokio::test]
async fn test_logging_sink_answers_ok() {
    let server = gateway("VALID", Duration::ZERO).await;
    let state = app_state(
        &config(&validate_url(&server), true),
        Arc::new(LoggingOrderSink),
    );
    let response = router(Arc::new(state))
        .oneshot(notify_request(&signed_notification(PASSPHRASE)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[test]
fn test_app_state_picks_failure_policy_per_environment() {
    let sink = Arc::new(RecordingSink::default());
    let sandbox = app_state(
        &config("https://sandbox.payfast.co.za/eng/query/validate", true),
        sink.clone(),
    );
    assert_eq!(sandbox.environment, Environment::Sandbox);
    assert_eq!(
        sandbox.verifier.network_failure_policy(),
        NetworkFailurePolicy::SoftPass
    );

    let production = app_state(
        &config("https://www.payfast.co.za/eng/query/validate", false),
        sink,
    );
    assert_eq!(production.environment, Environment::Production);
    assert_eq!(
        production.verifier.network_failure_policy(),
        NetworkFailurePolicy::Reject
    );
}
