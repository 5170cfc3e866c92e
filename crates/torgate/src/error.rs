//! Routing errors
//!
//! The public taxonomy callers act on. Each variant carries enough
//! detail for a log line, while [`ErrorKind`] is the coarse tag stored
//! in decisions and compared in tests.

use serde::Serialize;

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed host or port, rejected before reaching the policy
    InvalidConfiguration,
    /// The proxy is not accepting TCP connections
    ProxyNotRunning,
    /// The proxy is up but no verification target was reachable through it
    NetworkUnreachable,
}

impl ErrorKind {
    /// What the user should do about it
    pub fn remediation(&self) -> &'static str {
        match self {
            ErrorKind::InvalidConfiguration => "Check the proxy host and port settings.",
            ErrorKind::ProxyNotRunning => "Start Orbot (or the Tor service) and try again.",
            ErrorKind::NetworkUnreachable => {
                "Orbot is running but cannot reach the Tor network; check its connection status."
            }
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidConfiguration => "invalid configuration",
            ErrorKind::ProxyNotRunning => "proxy not running",
            ErrorKind::NetworkUnreachable => "anonymizing network unreachable",
        };
        f.write_str(name)
    }
}

/// Routing policy errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(
        "Tor proxy not accessible at {endpoint}: {cause}. \
         Network access blocked due to fail-closed mode."
    )]
    ProxyNotRunning { endpoint: String, cause: String },

    #[error(
        "Tor proxy at {endpoint} is running but the Tor network could not be verified: {cause}. \
         Network access blocked due to fail-closed mode."
    )]
    NetworkUnreachable { endpoint: String, cause: String },
}

impl RoutingError {
    /// Shorthand for a rejected host/port
    pub fn invalid(msg: impl Into<String>) -> Self {
        RoutingError::InvalidConfiguration(msg.into())
    }

    /// Coarse classification
    pub fn kind(&self) -> ErrorKind {
        match self {
            RoutingError::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            RoutingError::ProxyNotRunning { .. } => ErrorKind::ProxyNotRunning,
            RoutingError::NetworkUnreachable { .. } => ErrorKind::NetworkUnreachable,
        }
    }
}
