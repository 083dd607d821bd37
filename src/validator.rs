//! Echo-validation of ITN notifications against the gateway.
//!
//! After the signature checks out, the notification is posted back, form-encoded
//! and without its `signature` field, to the gateway's validate endpoint. The
//! gateway answers with a plain-text verdict: `VALID` or anything else.
//!
//! [`GatewayValidator`] performs that round-trip with `reqwest`, always under a
//! bounded timeout. Transport failures (including timeouts and non-2xx statuses)
//! surface as [`ValidatorError`] and are kept distinct from an explicit negative
//! [`Verdict`], since only the former may ever be tolerated.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::instrument;
use url::Url;

use crate::fields::FieldMap;

/// The gateway's answer to an echo-validation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    /// Any answer other than `VALID`, with the body as received.
    Invalid(String),
}

/// Errors that prevent a verdict from being obtained at all.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorError {
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl ValidatorError {
    pub fn is_timeout(&self) -> bool {
        match self {
            ValidatorError::Http { source, .. } | ValidatorError::ResponseBodyRead { source, .. } => {
                source.is_timeout()
            }
            ValidatorError::HttpStatus { .. } => false,
        }
    }
}

#[async_trait]
pub trait EchoValidator: Send + Sync {
    /// Submits the signature-stripped notification fields for confirmation.
    async fn validate(&self, fields: &FieldMap) -> Result<Verdict, ValidatorError>;
}

/// [`EchoValidator`] talking to the real gateway endpoint.
#[derive(Clone, Debug)]
pub struct GatewayValidator {
    validate_url: Url,
    client: Client,
    timeout: Duration,
}

impl GatewayValidator {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(validate_url: Url) -> Self {
        Self {
            validate_url,
            client: Client::new(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Sets the timeout applied to every validation request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate_url(&self) -> &Url {
        &self.validate_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn post_form(&self, fields: &FieldMap) -> Result<Verdict, ValidatorError> {
        let context = "POST /eng/query/validate";
        let response = self
            .client
            .post(self.validate_url.clone())
            .form(&fields.form_pairs())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ValidatorError::Http { context, source: e })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ValidatorError::ResponseBodyRead { context, source: e })?;
        if !status.is_success() {
            return Err(ValidatorError::HttpStatus {
                context,
                status,
                body,
            });
        }

        let body = body.trim();
        if body == "VALID" {
            Ok(Verdict::Valid)
        } else {
            Ok(Verdict::Invalid(body.to_string()))
        }
    }
}

#[async_trait]
impl EchoValidator for GatewayValidator {
    #[instrument(name = "payfast.validator.validate", skip_all, err)]
    async fn validate(&self, fields: &FieldMap) -> Result<Verdict, ValidatorError> {
        self.post_form(fields).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notification() -> FieldMap {
        FieldMap::new()
            .with("m_payment_id", "ORDER_1")
            .with("payment_status", "COMPLETE")
            .with("amount_gross", "10.00")
            .with("item_name", "Blue Widget")
    }

    async fn validator_for(server: &MockServer) -> GatewayValidator {
        let url = Url::parse(&format!("{}/eng/query/validate", server.uri())).unwrap();
        GatewayValidator::new(url)
    }

    #[tokio::test]
    async fn test_valid_verdict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/eng/query/validate"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("m_payment_id=ORDER_1"))
            .and(body_string_contains("item_name=Blue+Widget"))
            .respond_with(ResponseTemplate::new(200).set_body_string("VALID"))
            .expect(1)
            .mount(&server)
            .await;

        let validator = validator_for(&server).await;
        assert_eq!(validator.validate(&notification()).await.unwrap(), Verdict::Valid);
    }

    #[tokio::test]
    async fn test_invalid_verdict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/eng/query/validate"))
            .respond_with(ResponseTemplate::new(200).set_body_string("INVALID"))
            .mount(&server)
            .await;

        let validator = validator_for(&server).await;
        assert_eq!(
            validator.validate(&notification()).await.unwrap(),
            Verdict::Invalid("INVALID".to_string())
        );
    }

    #[tokio::test]
    async fn test_error_status_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/eng/query/validate"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let validator = validator_for(&server).await;
        let error = validator.validate(&notification()).await.unwrap_err();
        assert!(matches!(
            error,
            ValidatorError::HttpStatus { status, .. } if status == StatusCode::BAD_GATEWAY
        ));
    }

    #[tokio::test]
    async fn test_slow_gateway_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/eng/query/validate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("VALID")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let validator = validator_for(&server)
            .await
            .with_timeout(Duration::from_millis(100));
        let error = validator.validate(&notification()).await.unwrap_err();
        assert!(error.is_timeout());
    }
}
