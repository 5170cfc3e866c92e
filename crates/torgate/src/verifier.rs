//! Network Verifier
//!
//! End-to-end check that the proxy actually carries traffic into Tor:
//! open a SOCKS5 CONNECT to well-known Tor Project hosts. Any single
//! success is enough.
//!
//! One pass over the target list, no retries. Retry policy belongs to
//! whoever calls [`crate::RoutingPolicy::ensure_allowed`] next.

use crate::endpoint::ProxyEndpoint;
use crate::error::RoutingError;
use crate::socks;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default per-target timeout
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum number of targets, so one flaky host cannot fail verification
pub const MIN_TARGETS: usize = 2;

/// A destination reached through the proxy to prove it works
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationTarget {
    pub host: String,
    pub port: u16,
}

impl VerificationTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Tor Project hosts, checked in order
    pub fn tor_project() -> Vec<Self> {
        vec![
            Self::new("check.torproject.org", 443),
            Self::new("www.torproject.org", 443),
        ]
    }
}

impl std::fmt::Display for VerificationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Verification result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Reached this target through the proxy
    Verified(VerificationTarget),
    /// Every target failed; carries the last failure
    Unverified(String),
}

impl VerifyOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerifyOutcome::Verified(_))
    }
}

/// Bounded-time end-to-end check through the proxy
#[async_trait]
pub trait NetworkVerifier: Send + Sync {
    /// `timeout` applies to each target separately
    async fn verify(&self, endpoint: &ProxyEndpoint, timeout: Duration) -> VerifyOutcome;
}

/// SOCKS5 CONNECT against an ordered target list
#[derive(Debug, Clone)]
pub struct SocksNetworkVerifier {
    targets: Vec<VerificationTarget>,
}

impl SocksNetworkVerifier {
    /// Create a verifier, requiring at least [`MIN_TARGETS`] targets
    pub fn new(targets: Vec<VerificationTarget>) -> Result<Self, RoutingError> {
        if targets.len() < MIN_TARGETS {
            return Err(RoutingError::invalid(format!(
                "At least {} verification targets are required, got {}",
                MIN_TARGETS,
                targets.len()
            )));
        }
        if let Some(bad) = targets.iter().find(|t| t.host.trim().is_empty() || t.port == 0) {
            return Err(RoutingError::invalid(format!(
                "Invalid verification target '{}'",
                bad
            )));
        }
        Ok(Self { targets })
    }

    /// Verifier against the Tor Project hosts
    pub fn tor_project() -> Self {
        Self {
            targets: VerificationTarget::tor_project(),
        }
    }

    pub fn targets(&self) -> &[VerificationTarget] {
        &self.targets
    }
}

impl Default for SocksNetworkVerifier {
    fn default() -> Self {
        Self::tor_project()
    }
}

#[async_trait]
impl NetworkVerifier for SocksNetworkVerifier {
    async fn verify(&self, endpoint: &ProxyEndpoint, timeout: Duration) -> VerifyOutcome {
        let mut last_failure = String::from("no verification targets configured");

        for target in &self.targets {
            debug!("Verifying Tor via {} -> {}", endpoint, target);

            let attempt = tokio::time::timeout(
                timeout,
                socks::connect(endpoint, &target.host, target.port),
            )
            .await;

            match attempt {
                Ok(Ok(_stream)) => {
                    info!("Tor network verified via {} ({})", endpoint, target);
                    return VerifyOutcome::Verified(target.clone());
                }
                Ok(Err(e)) => {
                    debug!("Verification target {} failed: {}", target, e);
                    last_failure = format!("{}: {}", target, e);
                }
                Err(_) => {
                    debug!("Verification target {} timed out after {:?}", target, timeout);
                    last_failure = format!("{}: timed out after {:?}", target, timeout);
                }
            }
        }

        warn!("Tor network not verified via {}: {}", endpoint, last_failure);
        VerifyOutcome::Unverified(last_failure)
    }
}
