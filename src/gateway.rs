//! PayFast endpoints and hosts, selected by environment.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Hostnames PayFast sends ITN callbacks from.
pub const TRUSTED_HOSTS: [&str; 4] = [
    "www.payfast.co.za",
    "sandbox.payfast.co.za",
    "w1w.payfast.co.za",
    "w2w.payfast.co.za",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    pub fn from_sandbox_flag(sandbox: bool) -> Self {
        if sandbox {
            Environment::Sandbox
        } else {
            Environment::Production
        }
    }

    pub fn is_sandbox(&self) -> bool {
        matches!(self, Environment::Sandbox)
    }

    fn host(&self) -> &'static str {
        match self {
            Environment::Sandbox => "sandbox.payfast.co.za",
            Environment::Production => "www.payfast.co.za",
        }
    }

    /// Browser redirect target for signed payment requests.
    pub fn default_process_url(&self) -> Url {
        Url::parse(&format!("https://{}/eng/process", self.host()))
            .expect("static gateway url is valid")
    }

    /// Server-to-server echo-validation endpoint.
    pub fn default_validate_url(&self) -> Url {
        Url::parse(&format!("https://{}/eng/query/validate", self.host()))
            .expect("static gateway url is valid")
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Sandbox => f.write_str("sandbox"),
            Environment::Production => f.write_str("production"),
        }
    }
}

/// Resolved gateway endpoints for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
    environment: Environment,
    process_url: Url,
    validate_url: Url,
}

impl Gateway {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            process_url: environment.default_process_url(),
            validate_url: environment.default_validate_url(),
        }
    }

    pub fn with_process_url(mut self, url: Url) -> Self {
        self.process_url = url;
        self
    }

    pub fn with_validate_url(mut self, url: Url) -> Self {
        self.validate_url = url;
        self
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn process_url(&self) -> &Url {
        &self.process_url
    }

    pub fn validate_url(&self) -> &Url {
        &self.validate_url
    }
}
