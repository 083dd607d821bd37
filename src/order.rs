//! Hand-off of verified notifications to the merchant's order state.

use async_trait::async_trait;

use crate::notification::VerifiedNotification;

#[derive(Debug, thiserror::Error)]
#[error("Order update failed: {0}")]
pub struct OrderSinkError(pub String);

/// Receives every verified notification.
///
/// The gateway redelivers notifications, so implementations must be idempotent
/// on [`VerifiedNotification::merchant_order_id`].
#[async_trait]
pub trait OrderStatusSink: Send + Sync {
    async fn apply(&self, notification: &VerifiedNotification) -> Result<(), OrderSinkError>;
}

/// Sink that only records the outcome in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingOrderSink;

#[async_trait]
impl OrderStatusSink for LoggingOrderSink {
    async fn apply(&self, notification: &VerifiedNotification) -> Result<(), OrderSinkError> {
        if notification.status.is_complete() {
            tracing::info!(
                m_payment_id = %notification.merchant_order_id,
                amount_gross = %notification.gross_amount,
                pf_payment_id = ?notification.gateway_payment_id,
                "Payment completed"
            );
        } else {
            tracing::info!(
                m_payment_id = %notification.merchant_order_id,
                payment_status = %notification.status,
                "Payment not completed"
            );
        }
        Ok(())
    }
}
