//! Configuration values that may come from the environment.
//!
//! ```json
//! {
//!   "sandbox": true,
//!   "merchant": { "id": "$PAYFAST_MERCHANT_ID", "key": "${PAYFAST_MERCHANT_KEY}" }
//! }
//! ```

use serde::Deserialize;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

/// A value given literally or as a `$VAR` / `${VAR}` reference, resolved while
/// deserializing.
///
/// Non-string JSON scalars (`true`, `3001`) are accepted as literals.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn inner(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Returns the variable name of a `$VAR` or `${VAR}` reference.
fn env_reference(value: &str) -> Option<&str> {
    if let Some(braced) = value.strip_prefix("${") {
        return braced.strip_suffix('}').filter(|name| !name.is_empty());
    }
    value
        .strip_prefix('$')
        .filter(|name| !name.is_empty())
        .filter(|name| name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
}

fn resolve(raw: String) -> Result<String, String> {
    match env_reference(&raw) {
        Some(name) => std::env::var(name)
            .map_err(|_| format!("Environment variable '{name}' not found (referenced as '{raw}')")),
        None => Ok(raw),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Text(String),
    Bool(bool),
    Number(serde_json::Number),
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = match RawScalar::deserialize(deserializer)? {
            RawScalar::Text(text) => resolve(text).map_err(serde::de::Error::custom)?,
            RawScalar::Bool(flag) => flag.to_string(),
            RawScalar::Number(number) => number.to_string(),
        };
        raw.trim()
            .parse::<T>()
            .map(LiteralOrEnv)
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value '{raw}': {e}")))
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for LiteralOrEnv<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
