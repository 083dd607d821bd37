//! Provenance check for inbound ITN callbacks.
//!
//! A notification is only worth looking at if it comes from one of the gateway's
//! published hosts. [`DnsOriginCheck`] resolves those hostnames at request time and
//! compares the caller address against the result. [`AnyOrigin`] accepts every
//! caller and is only wired in for sandbox deployments that explicitly ask for it.

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::task::JoinSet;

use crate::gateway::TRUSTED_HOSTS;

#[async_trait]
pub trait OriginCheck: Send + Sync {
    /// Returns `true` if `caller` is allowed to deliver notifications.
    ///
    /// `None` means the caller address could not be determined.
    async fn is_trusted(&self, caller: Option<IpAddr>) -> bool;
}

/// Accepts every caller, including unknown ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyOrigin;

#[async_trait]
impl OriginCheck for AnyOrigin {
    async fn is_trusted(&self, _caller: Option<IpAddr>) -> bool {
        true
    }
}

/// Resolves the trusted hostnames and matches the caller against their addresses.
#[derive(Debug, Clone)]
pub struct DnsOriginCheck {
    hosts: Vec<String>,
    timeout: Duration,
}

impl DnsOriginCheck {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

    /// Checks against the gateway's published hosts.
    pub fn gateway() -> Self {
        Self::new(TRUSTED_HOSTS.iter().map(|host| host.to_string()).collect())
    }

    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Bounds each hostname lookup.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }
}

async fn resolve(host: String, timeout: Duration) -> Vec<IpAddr> {
    match tokio::time::timeout(timeout, lookup_host((host.as_str(), 0))).await {
        Ok(Ok(addrs)) => addrs.map(|addr| addr.ip().to_canonical()).collect(),
        Ok(Err(error)) => {
            tracing::warn!(host, error = %error, "Failed to resolve gateway host");
            Vec::new()
        }
        Err(_) => {
            tracing::warn!(host, timeout = ?timeout, "Timed out resolving gateway host");
            Vec::new()
        }
    }
}

#[async_trait]
impl OriginCheck for DnsOriginCheck {
    /// Resolves all hosts concurrently, so the check takes at most one timeout.
    async fn is_trusted(&self, caller: Option<IpAddr>) -> bool {
        let Some(caller) = caller.map(|ip| ip.to_canonical()) else {
            return false;
        };
        let mut lookups = JoinSet::new();
        for host in &self.hosts {
            lookups.spawn(resolve(host.clone(), self.timeout));
        }
        while let Some(resolved) = lookups.join_next().await {
            match resolved {
                Ok(addrs) if addrs.contains(&caller) => return true,
                Ok(_) => {}
                Err(error) => tracing::warn!(error = %error, "Gateway host lookup task failed"),
            }
        }
        false
    }
}
