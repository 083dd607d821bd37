//! Configuration for the PayFast server.
//!
//! Loaded once at startup from a JSON file (path from `--config` or `$CONFIG`,
//! default `config.json`). Merchant secrets and deploy-specific values may be
//! given literally or as `$VAR` references, see [`LiteralOrEnv`].
//!
//! ```json
//! {
//!   "port": 3001,
//!   "sandbox": "$PAYFAST_SANDBOX",
//!   "merchant": {
//!     "id": "$PAYFAST_MERCHANT_ID",
//!     "key": "$PAYFAST_MERCHANT_KEY",
//!     "passphrase": "$PAYFAST_PASSPHRASE"
//!   },
//!   "urls": {
//!     "return": "https://shop.example/payment/success",
//!     "cancel": "https://shop.example/payment/cancel",
//!     "notify": "https://api.shop.example/api/payfast/notify"
//!   }
//! }
//! ```

use clap::Parser;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::gateway::{Environment, Gateway};
use crate::payment::{CallbackUrls, Merchant};
use crate::signature::Passphrase;
use crate::util::LiteralOrEnv;

/// CLI arguments for the PayFast server.
#[derive(Parser, Debug)]
#[command(name = "payfast-rs")]
#[command(about = "PayFast payment and ITN HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// A configuration string that is never printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl FromStr for Secret {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Secret(s.to_string()))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Server configuration.
///
/// Fields use serde defaults that fall back to environment variables,
/// then to hardcoded defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    #[serde(default)]
    sandbox: LiteralOrEnv<bool>,
    merchant: MerchantConfig,
    urls: UrlsConfig,
    #[serde(default)]
    fallback_email: Option<LiteralOrEnv<String>>,
    #[serde(default = "config_defaults::default_validation_timeout_ms")]
    validation_timeout_ms: u64,
    #[serde(default = "config_defaults::default_dns_timeout_ms")]
    dns_timeout_ms: u64,
    #[serde(default = "config_defaults::default_order_timeout_ms")]
    order_timeout_ms: u64,
    #[serde(default)]
    trust_forwarded_for: bool,
    #[serde(default)]
    trust_any_origin_in_sandbox: bool,
    #[serde(default)]
    gateway: GatewayOverrides,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MerchantConfig {
    id: LiteralOrEnv<String>,
    key: LiteralOrEnv<Secret>,
    #[serde(default)]
    passphrase: Option<LiteralOrEnv<Secret>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlsConfig {
    #[serde(rename = "return")]
    return_url: LiteralOrEnv<Url>,
    #[serde(rename = "cancel")]
    cancel_url: LiteralOrEnv<Url>,
    #[serde(rename = "notify")]
    notify_url: LiteralOrEnv<Url>,
}

/// Replacements for the environment-selected gateway endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayOverrides {
    #[serde(default)]
    process_url: Option<LiteralOrEnv<Url>>,
    #[serde(default)]
    validate_url: Option<LiteralOrEnv<Url>>,
}

pub mod config_defaults {
    use std::env;
    use std::net::{IpAddr, Ipv4Addr};

    pub const DEFAULT_PORT: u16 = 3001;
    pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

    /// Returns the default port value with fallback: $PORT env var -> 3001
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Returns the default host value with fallback: $HOST env var -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HOST)
    }

    pub fn default_validation_timeout_ms() -> u64 {
        10_000
    }

    pub fn default_dns_timeout_ms() -> u64 {
        3_000
    }

    pub fn default_order_timeout_ms() -> u64 {
        5_000
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn environment(&self) -> Environment {
        Environment::from_sandbox_flag(*self.sandbox)
    }

    /// Gateway endpoints for the configured environment, with overrides applied.
    pub fn gateway(&self) -> Gateway {
        let mut gateway = Gateway::new(self.environment());
        if let Some(url) = &self.gateway.process_url {
            gateway = gateway.with_process_url(url.inner().clone());
        }
        if let Some(url) = &self.gateway.validate_url {
            gateway = gateway.with_validate_url(url.inner().clone());
        }
        gateway
    }

    /// Merchant credentials. A blank passphrase counts as no passphrase.
    pub fn merchant(&self) -> Merchant {
        Merchant {
            id: self.merchant.id.trim().to_string(),
            key: self.merchant.key.expose().trim().to_string(),
            passphrase: self.passphrase(),
        }
    }

    pub fn passphrase(&self) -> Option<Passphrase> {
        self.merchant
            .passphrase
            .as_ref()
            .and_then(|secret| Passphrase::non_blank(secret.expose()))
    }

    pub fn callback_urls(&self) -> CallbackUrls {
        CallbackUrls {
            return_url: self.urls.return_url.inner().clone(),
            cancel_url: self.urls.cancel_url.inner().clone(),
            notify_url: self.urls.notify_url.inner().clone(),
        }
    }

    pub fn fallback_email(&self) -> Option<String> {
        self.fallback_email
            .as_ref()
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty())
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }

    /// Upper bound for handing a verified notification to the order sink.
    pub fn order_timeout(&self) -> Duration {
        Duration::from_millis(self.order_timeout_ms)
    }

    /// Take the caller address from the first `X-Forwarded-For` entry.
    pub fn trust_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }

    /// Skip the origin check. Never honoured outside sandbox.
    pub fn trust_any_origin(&self) -> bool {
        self.trust_any_origin_in_sandbox && self.environment().is_sandbox()
    }

    /// Load configuration from CLI arguments and JSON file.
    ///
    /// The config file path is determined by:
    /// 1. `--config <path>` CLI argument
    /// 2. `$CONFIG` environment variable
    /// 3. `./config.json`
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        Self::from_json(&content)
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.merchant.id.trim().is_empty() {
            return Err(ConfigError::Invalid("merchant.id must not be empty"));
        }
        if self.merchant.key.expose().trim().is_empty() {
            return Err(ConfigError::Invalid("merchant.key must not be empty"));
        }
        if self.validation_timeout_ms == 0
            || self.dns_timeout_ms == 0
            || self.order_timeout_ms == 0
        {
            return Err(ConfigError::Invalid("timeouts must be greater than zero"));
        }
        Ok(())
    }
}
