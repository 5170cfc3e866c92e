//! Verification state and routing decisions
//!
//! `VerificationState` is the trust ladder the policy climbs for one
//! configuration. `RoutingDecision` is what callers get back before
//! opening a connection: computed fresh on every call, never stored.
//!
//! # Fail-closed
//!
//! When the decision says `permitted == false` the caller must abort the
//! operation. Falling back to a direct connection defeats the point.
//!
//! ```rust,ignore
//! let decision = policy.ensure_allowed().await;
//! let proxy = decision.require()?; // Err(kind) when blocked
//! engine.scan(url, proxy.map(str::to_owned));
//! ```

use crate::endpoint::ProxyEndpoint;
use crate::error::ErrorKind;
use serde::Serialize;
use std::collections::HashMap;

/// Trust established for the current configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationState {
    /// Nothing checked since the last configuration change
    Unverified,
    /// The proxy port accepts connections
    ProxyReachable,
    /// Traffic reached the Tor network through the proxy
    NetworkVerified,
    /// The last check failed
    Failed(ErrorKind),
}

impl VerificationState {
    /// Liveness already established (reachable or better)
    pub fn is_reachable(&self) -> bool {
        matches!(
            self,
            VerificationState::ProxyReachable
                | VerificationState::NetworkVerified
                | VerificationState::Failed(ErrorKind::NetworkUnreachable)
        )
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationState::NetworkVerified)
    }

    /// Failure reason, if the last check failed
    pub fn failure(&self) -> Option<ErrorKind> {
        match self {
            VerificationState::Failed(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// Externally visible routing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingState {
    /// Routing policy does not apply; connections go direct
    Disabled,
    /// Enabled (or being enabled), nothing verified yet
    Enabling,
    /// Enabled, but the proxy did not answer
    ProxyUnreachable,
    /// Enabled, proxy answers, Tor not (yet) verified
    ProxyReachable,
    /// Enabled and verified end to end
    NetworkVerified,
}

impl RoutingState {
    pub(crate) fn derive(enabled: bool, verification: &VerificationState) -> Self {
        if !enabled {
            return RoutingState::Disabled;
        }
        match verification {
            VerificationState::Unverified => RoutingState::Enabling,
            VerificationState::Failed(ErrorKind::ProxyNotRunning) => RoutingState::ProxyUnreachable,
            VerificationState::NetworkVerified => RoutingState::NetworkVerified,
            _ => RoutingState::ProxyReachable,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, RoutingState::Disabled)
    }
}

impl std::fmt::Display for RoutingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            RoutingState::Disabled => "Disabled",
            RoutingState::Enabling => "Enabled (not verified)",
            RoutingState::ProxyUnreachable => "Orbot not running",
            RoutingState::ProxyReachable => "Orbot running, Tor not verified",
            RoutingState::NetworkVerified => "Connected to Tor",
        };
        f.write_str(text)
    }
}

/// Answer to "may I open a connection, and how?"
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    /// Whether a connection may be opened at all
    pub permitted: bool,
    /// Proxy the connection must go through, if any
    pub proxy_url: Option<String>,
    /// Why it was blocked, or (best-effort mode) what is wrong
    pub reason: Option<ErrorKind>,
    /// Tor verified end to end for the current configuration
    pub verified: bool,
    /// Made under fail-closed: `proxy_url` must not be swapped for another
    pub enforced: bool,
}

impl RoutingDecision {
    /// Policy off: direct connections are fine
    pub fn direct() -> Self {
        Self {
            permitted: true,
            proxy_url: None,
            reason: None,
            verified: false,
            enforced: false,
        }
    }

    /// Connect through `endpoint`
    pub fn proxied(endpoint: &ProxyEndpoint, verified: bool, reason: Option<ErrorKind>) -> Self {
        Self {
            permitted: true,
            proxy_url: Some(endpoint.proxy_url()),
            reason,
            verified,
            enforced: false,
        }
    }

    /// Mark as made under fail-closed
    pub fn enforcing(mut self) -> Self {
        self.enforced = true;
        self
    }

    /// Do not connect
    pub fn blocked(reason: Option<ErrorKind>) -> Self {
        Self {
            permitted: false,
            proxy_url: None,
            reason,
            verified: false,
            enforced: true,
        }
    }

    /// The proxy to use, or the reason the operation must abort
    pub fn require(&self) -> Result<Option<&str>, ErrorKind> {
        if self.permitted {
            Ok(self.proxy_url.as_deref())
        } else {
            Err(self.reason.unwrap_or(ErrorKind::ProxyNotRunning))
        }
    }

    /// Scheme → proxy map for HTTP client libraries
    ///
    /// Empty when no proxy applies.
    pub fn proxy_map(&self) -> HashMap<&'static str, String> {
        let mut map = HashMap::new();
        if let (true, Some(url)) = (self.permitted, &self.proxy_url) {
            map.insert("http", url.clone());
            map.insert("https", url.clone());
        }
        map
    }
}

/// Snapshot for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingStatus {
    pub enabled: bool,
    pub fail_closed: bool,
    pub proxy_reachable: bool,
    pub network_verified: bool,
    pub host: String,
    pub port: u16,
    pub state: RoutingState,
    pub generation: u64,
}

/// Outcome of an interactive connection test
///
/// Purely informational: producing one never changes routing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConnectionReport {
    /// Nothing listening on the proxy port
    ProxyUnreachable { endpoint: ProxyEndpoint, cause: String },
    /// Proxy answers but no verification target was reachable through it
    NetworkUnverified { endpoint: ProxyEndpoint, cause: String },
    /// Reached `target` through the proxy
    Verified { endpoint: ProxyEndpoint, target: String },
}

impl ConnectionReport {
    pub fn is_verified(&self) -> bool {
        matches!(self, ConnectionReport::Verified { .. })
    }

    pub fn proxy_reachable(&self) -> bool {
        !matches!(self, ConnectionReport::ProxyUnreachable { .. })
    }

    /// Short status line
    pub fn status_text(&self) -> &'static str {
        match self {
            ConnectionReport::ProxyUnreachable { .. } => "Orbot not running",
            ConnectionReport::NetworkUnverified { .. } => "Orbot running, Tor not verified",
            ConnectionReport::Verified { .. } => "Connected to Tor!",
        }
    }

    /// Detailed lines for a results log
    pub fn messages(&self) -> Vec<String> {
        match self {
            ConnectionReport::ProxyUnreachable { endpoint, cause } => vec![
                format!("Error: Cannot connect to Orbot at {} ({})", endpoint, cause),
                "Please ensure Orbot is installed and running.".to_string(),
            ],
            ConnectionReport::NetworkUnverified { endpoint, cause } => vec![
                format!("Orbot SOCKS5 proxy is accessible at {}", endpoint),
                format!("Warning: Orbot accessible but Tor network not verified ({})", cause),
            ],
            ConnectionReport::Verified { endpoint, target } => vec![
                format!("Orbot SOCKS5 proxy is accessible at {}", endpoint),
                format!("Successfully verified Tor network connection (reached {})", target),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_derivation() {
        assert_eq!(
            RoutingState::derive(false, &VerificationState::NetworkVerified),
            RoutingState::Disabled
        );
        assert_eq!(
            RoutingState::derive(true, &VerificationState::Unverified),
            RoutingState::Enabling
        );
        assert_eq!(
            RoutingState::derive(true, &VerificationState::Failed(ErrorKind::ProxyNotRunning)),
            RoutingState::ProxyUnreachable
        );
        assert_eq!(
            RoutingState::derive(true, &VerificationState::Failed(ErrorKind::NetworkUnreachable)),
            RoutingState::ProxyReachable
        );
        assert_eq!(
            RoutingState::derive(true, &VerificationState::NetworkVerified),
            RoutingState::NetworkVerified
        );
    }

    #[test]
    fn test_reachable_or_better() {
        assert!(!VerificationState::Unverified.is_reachable());
        assert!(!VerificationState::Failed(ErrorKind::ProxyNotRunning).is_reachable());
        assert!(VerificationState::ProxyReachable.is_reachable());
        assert!(VerificationState::NetworkVerified.is_reachable());
    }

    #[test]
    fn test_blocked_decision_requires_abort() {
        let decision = RoutingDecision::blocked(Some(ErrorKind::NetworkUnreachable));
        assert_eq!(decision.require(), Err(ErrorKind::NetworkUnreachable));
        assert!(decision.proxy_map().is_empty());
    }

    #[test]
    fn test_report_texts_are_distinct() {
        let endpoint = ProxyEndpoint::default();
        let reports = [
            ConnectionReport::ProxyUnreachable { endpoint: endpoint.clone(), cause: "connection refused".into() },
            ConnectionReport::NetworkUnverified { endpoint: endpoint.clone(), cause: "timed out".into() },
            ConnectionReport::Verified { endpoint, target: "check.torproject.org:443".into() },
        ];

        assert!(!reports[0].proxy_reachable());
        assert!(reports[1].proxy_reachable() && !reports[1].is_verified());
        assert!(reports[2].is_verified());
        assert_ne!(reports[0].status_text(), reports[1].status_text());
        assert!(reports[0].messages()[0].contains("127.0.0.1:9050"));
    }

    #[test]
    fn test_proxy_map() {
        let decision = RoutingDecision::proxied(&ProxyEndpoint::default(), true, None);
        let map = decision.proxy_map();
        assert_eq!(map.get("http").map(String::as_str), Some("socks5h://127.0.0.1:9050"));
        assert_eq!(map.get("https"), map.get("http"));

        assert!(RoutingDecision::direct().proxy_map().is_empty());
        assert_eq!(RoutingDecision::direct().require(), Ok(None));
    }
}
