//! Verification of inbound ITN notifications.
//!
//! A notification passes four gates in order, and the first failing gate decides
//! the outcome:
//!
//! 1. **Origin**: the caller must be one of the gateway's hosts ([`OriginCheck`]).
//! 2. **Signature**: the `signature` field is removed and recomputed from the
//!    remaining fields with the merchant passphrase.
//! 3. **Echo-validation**: the signature-stripped fields are posted back to the
//!    gateway, which must answer `VALID` ([`EchoValidator`]).
//! 4. **Extraction**: `payment_status`, `m_payment_id` and `amount_gross` are read
//!    into a [`VerifiedNotification`].
//!
//! The verifier never deduplicates: the gateway may deliver the same notification
//! several times, and whoever consumes [`NotificationResult::Verified`] must be
//! idempotent on the merchant order id.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use crate::fields::{FieldMap, SIGNATURE_FIELD};
use crate::gateway::Environment;
use crate::origin::OriginCheck;
use crate::signature::{MerchantSignature, Passphrase, SignatureCheck};
use crate::validator::{EchoValidator, Verdict};

/// What to do when the echo-validation round-trip cannot complete.
///
/// An explicit negative verdict from the gateway is always a rejection; this
/// policy only covers transport failures and timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailurePolicy {
    /// Reject the notification.
    Reject,
    /// Log the failure and carry on as if the gateway had answered `VALID`.
    SoftPass,
}

impl NetworkFailurePolicy {
    /// `SoftPass` for sandbox deployments, `Reject` everywhere else.
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Sandbox => NetworkFailurePolicy::SoftPass,
            Environment::Production => NetworkFailurePolicy::Reject,
        }
    }
}

/// Why a notification was rejected.
///
/// Meant for the operator's log. Callers on the network only ever see a generic
/// response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("required notification field missing")]
    InvalidInput,
    #[error("caller is not a trusted gateway host")]
    UntrustedOrigin,
    #[error("signature missing or mismatched")]
    BadSignature,
    #[error("gateway did not confirm the notification")]
    ValidationFailed,
    #[error("gateway validation endpoint unavailable")]
    UpstreamUnavailable,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InvalidInput => "invalid-input",
            RejectReason::UntrustedOrigin => "untrusted-origin",
            RejectReason::BadSignature => "bad-signature",
            RejectReason::ValidationFailed => "validation-failed",
            RejectReason::UpstreamUnavailable => "upstream-unavailable",
        }
    }
}

/// Business status reported by the gateway in `payment_status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Complete,
    Failed,
    Pending,
    Cancelled,
    Other(String),
}

impl PaymentStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "COMPLETE" => PaymentStatus::Complete,
            "FAILED" => PaymentStatus::Failed,
            "PENDING" => PaymentStatus::Pending,
            "CANCELLED" => PaymentStatus::Cancelled,
            _ => PaymentStatus::Other(value.trim().to_string()),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, PaymentStatus::Complete)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Complete => f.write_str("COMPLETE"),
            PaymentStatus::Failed => f.write_str("FAILED"),
            PaymentStatus::Pending => f.write_str("PENDING"),
            PaymentStatus::Cancelled => f.write_str("CANCELLED"),
            PaymentStatus::Other(status) => f.write_str(status),
        }
    }
}

/// A notification that passed every gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedNotification {
    pub merchant_order_id: String,
    pub status: PaymentStatus,
    /// Gross amount exactly as reported by the gateway.
    pub gross_amount: String,
    /// The gateway's own transaction id, when present.
    pub gateway_payment_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationResult {
    Verified(VerifiedNotification),
    Rejected(RejectReason),
}

impl NotificationResult {
    pub fn is_verified(&self) -> bool {
        matches!(self, NotificationResult::Verified(_))
    }
}

/// Runs inbound notifications through the four verification gates.
#[derive(Clone)]
pub struct NotificationVerifier {
    origin: Arc<dyn OriginCheck>,
    validator: Arc<dyn EchoValidator>,
    signature: Arc<dyn SignatureCheck>,
    network_failure_policy: NetworkFailurePolicy,
}

impl NotificationVerifier {
    /// Creates a verifier without passphrase that rejects on network failure.
    pub fn new(origin: Arc<dyn OriginCheck>, validator: Arc<dyn EchoValidator>) -> Self {
        Self {
            origin,
            validator,
            signature: Arc::new(MerchantSignature::default()),
            network_failure_policy: NetworkFailurePolicy::Reject,
        }
    }

    pub fn with_passphrase(self, passphrase: Option<Passphrase>) -> Self {
        self.with_signature_check(Arc::new(MerchantSignature::new(passphrase)))
    }

    pub fn with_signature_check(mut self, signature: Arc<dyn SignatureCheck>) -> Self {
        self.signature = signature;
        self
    }

    pub fn with_network_failure_policy(mut self, policy: NetworkFailurePolicy) -> Self {
        self.network_failure_policy = policy;
        self
    }

    pub fn network_failure_policy(&self) -> NetworkFailurePolicy {
        self.network_failure_policy
    }

    /// Verifies a notification posted by `caller`.
    pub async fn verify(&self, caller: Option<IpAddr>, mut fields: FieldMap) -> NotificationResult {
        let payment_id = fields.text("m_payment_id");

        if !self.origin.is_trusted(caller).await {
            return reject(RejectReason::UntrustedOrigin, caller, &payment_id);
        }

        let received = fields
            .remove(SIGNATURE_FIELD)
            .and_then(|value| value.to_text().map(|text| text.into_owned()));
        let Some(received) = received else {
            return reject(RejectReason::BadSignature, caller, &payment_id);
        };
        if !self.signature.verify(&fields, &received) {
            return reject(RejectReason::BadSignature, caller, &payment_id);
        }

        match self.validator.validate(&fields).await {
            Ok(Verdict::Valid) => {}
            Ok(Verdict::Invalid(verdict)) => {
                tracing::warn!(%verdict, "Gateway refused to confirm notification");
                return reject(RejectReason::ValidationFailed, caller, &payment_id);
            }
            Err(error) => match self.network_failure_policy {
                NetworkFailurePolicy::SoftPass => {
                    tracing::warn!(
                        error = %error,
                        timeout = error.is_timeout(),
                        m_payment_id = ?payment_id,
                        "Gateway validation unavailable, accepting under sandbox policy"
                    );
                }
                NetworkFailurePolicy::Reject => {
                    tracing::warn!(
                        error = %error,
                        timeout = error.is_timeout(),
                        "Gateway validation unavailable"
                    );
                    return reject(RejectReason::UpstreamUnavailable, caller, &payment_id);
                }
            },
        }

        let (Some(status), Some(merchant_order_id), Some(gross_amount)) = (
            fields.text("payment_status"),
            fields.text("m_payment_id"),
            fields.text("amount_gross"),
        ) else {
            return reject(RejectReason::InvalidInput, caller, &payment_id);
        };

        let verified = VerifiedNotification {
            merchant_order_id,
            status: PaymentStatus::parse(&status),
            gross_amount,
            gateway_payment_id: fields.text("pf_payment_id"),
        };
        tracing::info!(
            m_payment_id = %verified.merchant_order_id,
            payment_status = %verified.status,
            amount_gross = %verified.gross_amount,
            "Notification verified"
        );
        NotificationResult::Verified(verified)
    }
}

fn reject(
    reason: RejectReason,
    caller: Option<IpAddr>,
    payment_id: &Option<String>,
) -> NotificationResult {
    tracing::warn!(
        reason = reason.as_str(),
        origin = ?caller,
        m_payment_id = ?payment_id,
        "Notification rejected"
    );
    NotificationResult::Rejected(reason)
}
