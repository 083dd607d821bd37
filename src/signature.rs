//! PayFast request signing.
//!
//! The gateway recomputes the signature of every payment request and we recompute
//! the signature of every ITN notification, so the canonical string built here has
//! to match the gateway's byte for byte:
//!
//! 1. Skip fields whose value is empty or null, and the `signature` field itself.
//! 2. Walk the remaining fields in byte order of their keys.
//! 3. Emit `key=value` pairs joined by `&`, where the value is trimmed,
//!    percent-encoded like ECMAScript `encodeURIComponent`, and `%20` is rewritten
//!    to `+`.
//! 4. With a passphrase, append `&passphrase=` followed by the passphrase under the
//!    same transform.
//!
//! The signature is the lowercase hex MD5 digest of that string.
//!
//! ```rust
//! use payfast_rs::fields::FieldMap;
//! use payfast_rs::signature::{Passphrase, canonical_string};
//!
//! let fields = FieldMap::new()
//!     .with("merchant_id", "100")
//!     .with("amount", "10.00");
//! let passphrase = Passphrase::new("secret");
//! assert_eq!(
//!     canonical_string(&fields, Some(&passphrase)),
//!     "amount=10.00&merchant_id=100&passphrase=secret"
//! );
//! ```

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::fmt;
use subtle::ConstantTimeEq;

use crate::fields::{FieldMap, SIGNATURE_FIELD};

/// Characters `encodeURIComponent` leaves untouched, besides ASCII alphanumerics.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Shared secret appended to the canonical string.
///
/// Absent in legacy merchant setups, in which case nothing is appended.
#[derive(Clone, PartialEq, Eq)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns `None` for a blank passphrase.
    pub fn non_blank(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

/// Lowercase hex MD5 digest of a canonical string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ECMAScript `WhiteSpace` and `LineTerminator`: Unicode whitespace minus NEL, plus BOM.
fn is_js_whitespace(c: char) -> bool {
    (c.is_whitespace() && c != '\u{85}') || c == '\u{feff}'
}

fn trim(value: &str) -> &str {
    value.trim_matches(is_js_whitespace)
}

/// Percent-encodes a trimmed value the way the gateway does.
pub fn encode_value(value: &str) -> String {
    utf8_percent_encode(trim(value), URI_COMPONENT)
        .to_string()
        .replace("%20", "+")
}

/// Builds the string that gets hashed into a [`Signature`].
pub fn canonical_string(fields: &FieldMap, passphrase: Option<&Passphrase>) -> String {
    let mut canonical = fields
        .iter()
        .filter(|(key, _)| key.as_str() != SIGNATURE_FIELD)
        .filter_map(|(key, value)| {
            value
                .signable()
                .map(|text| format!("{}={}", key, encode_value(&text)))
        })
        .collect::<Vec<_>>()
        .join("&");
    if let Some(passphrase) = passphrase {
        canonical.push_str("&passphrase=");
        canonical.push_str(&encode_value(passphrase.expose()));
    }
    canonical
}

/// Signs a field map. Any `signature` field already present is ignored.
pub fn sign(fields: &FieldMap, passphrase: Option<&Passphrase>) -> Signature {
    let canonical = canonical_string(fields, passphrase);
    Signature(format!("{:x}", md5::compute(canonical.as_bytes())))
}

/// Checks a received signature against the one recomputed from `fields`.
///
/// The comparison runs in constant time and ignores surrounding whitespace and
/// hex letter case of the received value.
pub fn verify(fields: &FieldMap, passphrase: Option<&Passphrase>, received: &str) -> bool {
    let expected = sign(fields, passphrase);
    let received = received.trim().to_ascii_lowercase();
    expected.as_str().as_bytes().ct_eq(received.as_bytes()).into()
}

/// Checks the signature of an inbound notification.
pub trait SignatureCheck: Send + Sync {
    /// `fields` no longer contains the `signature` field; `received` is its value.
    fn verify(&self, fields: &FieldMap, received: &str) -> bool;
}

/// [`SignatureCheck`] with the merchant's own passphrase.
#[derive(Clone, Debug, Default)]
pub struct MerchantSignature {
    passphrase: Option<Passphrase>,
}

impl MerchantSignature {
    pub fn new(passphrase: Option<Passphrase>) -> Self {
        Self { passphrase }
    }
}

impl SignatureCheck for MerchantSignature {
    fn verify(&self, fields: &FieldMap, received: &str) -> bool {
        verify(fields, self.passphrase.as_ref(), received)
    }
}
