//! Construction of signed payment requests.
//!
//! A [`PaymentRequestBuilder`] holds the merchant's static settings and turns a
//! buyer's [`CheckoutRequest`] into a [`PaymentRequest`]: the full set of gateway
//! fields, signed, plus the URL the browser must submit them to. Building never
//! touches the network.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

use crate::fields::{FieldMap, SIGNATURE_FIELD};
use crate::money::{MoneyAmount, MoneyAmountParseError};
use crate::signature::{self, Passphrase, Signature};

const DEFAULT_FIRST_NAME: &str = "Customer";
const DEFAULT_LAST_NAME: &str = "Name";
const MISSING_REQUIRED: &str = "Amount and item name are required";

/// Amount as sent by the client: a JSON number or a string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Number(serde_json::Number),
    Text(String),
}

/// Buyer-supplied checkout details.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub amount: Option<AmountInput>,
    #[serde(default)]
    pub item_name: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
}

impl CheckoutRequest {
    /// Reads a checkout from url-encoded form fields, using the JSON field names.
    pub fn from_form(mut form: BTreeMap<String, String>) -> Self {
        Self {
            amount: form.remove("amount").map(AmountInput::Text),
            item_name: form.remove("itemName"),
            customer_name: form.remove("customerName"),
            customer_email: form.remove("customerEmail"),
            customer_phone: form.remove("customerPhone"),
        }
    }
}

/// Rejected checkout input.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("{0}")]
    InvalidInput(String),
}

impl BuildError {
    fn missing_required() -> Self {
        BuildError::InvalidInput(MISSING_REQUIRED.to_string())
    }
}

impl From<MoneyAmountParseError> for BuildError {
    fn from(error: MoneyAmountParseError) -> Self {
        BuildError::InvalidInput(format!("Invalid amount: {error}"))
    }
}

/// Merchant account identity at the gateway.
#[derive(Clone)]
pub struct Merchant {
    pub id: String,
    pub key: String,
    pub passphrase: Option<Passphrase>,
}

/// Where the gateway sends the buyer and the notification afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackUrls {
    pub return_url: Url,
    pub cancel_url: Url,
    pub notify_url: Url,
}

/// Issues `ORDER_<millis>` ids that strictly increase within the process.
#[derive(Debug, Default)]
pub struct OrderIdGenerator {
    last: AtomicU64,
}

impl OrderIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        self.next_at(now_millis())
    }

    fn next_at(&self, now: u64) -> String {
        let issued = match self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            }) {
            Ok(last) | Err(last) => now.max(last + 1),
        };
        format!("ORDER_{issued}")
    }
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

/// A signed payment request ready for browser submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    fields: FieldMap,
    process_url: Url,
}

impl PaymentRequest {
    /// All gateway fields, including `signature`.
    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn process_url(&self) -> &Url {
        &self.process_url
    }

    pub fn merchant_order_id(&self) -> Option<String> {
        self.fields.text("m_payment_id")
    }

    pub fn signature(&self) -> Option<String> {
        self.fields.text(SIGNATURE_FIELD)
    }
}

pub struct PaymentRequestBuilder {
    merchant: Merchant,
    urls: CallbackUrls,
    process_url: Url,
    fallback_email: Option<String>,
    order_ids: OrderIdGenerator,
}

impl PaymentRequestBuilder {
    pub fn new(merchant: Merchant, urls: CallbackUrls, process_url: Url) -> Self {
        Self {
            merchant,
            urls,
            process_url,
            fallback_email: None,
            order_ids: OrderIdGenerator::new(),
        }
    }

    /// Email address sent when the buyer did not provide one.
    pub fn with_fallback_email(mut self, email: Option<String>) -> Self {
        self.fallback_email = email;
        self
    }

    pub fn build(&self, request: &CheckoutRequest) -> Result<PaymentRequest, BuildError> {
        let amount = match &request.amount {
            None => return Err(BuildError::missing_required()),
            Some(AmountInput::Text(text)) if text.trim().is_empty() => {
                return Err(BuildError::missing_required());
            }
            Some(AmountInput::Text(text)) => MoneyAmount::parse(text)?,
            Some(AmountInput::Number(number)) => MoneyAmount::parse(&number.to_string())?,
        };
        let item_name = non_blank(request.item_name.as_deref())
            .ok_or_else(BuildError::missing_required)?;

        let (name_first, name_last) = split_name(request.customer_name.as_deref());
        let email = non_blank(request.customer_email.as_deref());
        let phone = non_blank(request.customer_phone.as_deref());

        let fields = FieldMap::new()
            .with("merchant_id", &self.merchant.id)
            .with("merchant_key", &self.merchant.key)
            .with("return_url", self.urls.return_url.as_str())
            .with("cancel_url", self.urls.cancel_url.as_str())
            .with("notify_url", self.urls.notify_url.as_str())
            .with("name_first", name_first)
            .with("name_last", name_last)
            .with(
                "email_address",
                email
                    .clone()
                    .or_else(|| self.fallback_email.clone())
                    .unwrap_or_default(),
            )
            .with("cell_number", phone.clone().unwrap_or_default())
            .with("m_payment_id", self.order_ids.next_id())
            .with("amount", amount.to_gateway_string())
            .with("item_name", item_name.as_str())
            .with("item_description", format!("Payment for {item_name}"))
            .with("custom_str1", email.unwrap_or_default())
            .with("custom_str2", phone.unwrap_or_default());

        let signature: Signature = signature::sign(&fields, self.merchant.passphrase.as_ref());
        let fields = fields.with(SIGNATURE_FIELD, signature.into_string());

        let payment = PaymentRequest {
            fields,
            process_url: self.process_url.clone(),
        };
        tracing::info!(
            m_payment_id = ?payment.merchant_order_id(),
            amount = %amount,
            item_name = %item_name,
            "Payment created"
        );
        Ok(payment)
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn split_name(full_name: Option<&str>) -> (String, String) {
    let mut tokens = full_name.unwrap_or_default().split_whitespace();
    let first = tokens.next().unwrap_or(DEFAULT_FIRST_NAME).to_string();
    let rest = tokens.collect::<Vec<_>>().join(" ");
    let last = if rest.is_empty() {
        DEFAULT_LAST_NAME.to_string()
    } else {
        rest
    };
    (first, last)
}
