//! Proxy Endpoint
//!
//! Validated description of the SOCKS5 proxy that anonymized traffic
//! is routed through (Orbot / Tor listen on 127.0.0.1:9050 by default).

use crate::error::RoutingError;
use serde::Serialize;
use std::net::Ipv6Addr;
use std::str::FromStr;

/// Default proxy host (loopback, where Orbot listens)
pub const DEFAULT_PROXY_HOST: &str = "127.0.0.1";

/// Tor's conventional SOCKS port
pub const DEFAULT_PROXY_PORT: u16 = 9050;

/// Scheme handed to HTTP clients. The `h` suffix means host names are
/// resolved by the proxy, so DNS never leaks outside Tor.
pub const PROXY_SCHEME: &str = "socks5h";

/// Proxy endpoint (host + port)
///
/// Fields are private: every value in circulation went through
/// validation, and there are no setters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProxyEndpoint {
    host: String,
    port: u16,
}

impl ProxyEndpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, RoutingError> {
        let host = host.into();
        let host = host.trim();
        validate_host(host)?;
        if port == 0 {
            return Err(port_error(&port.to_string()));
        }
        Ok(Self {
            host: strip_brackets(host).to_string(),
            port,
        })
    }

    /// Create from a port given as an arbitrary integer
    pub fn from_port_number(host: impl Into<String>, port: i64) -> Result<Self, RoutingError> {
        let port = u16::try_from(port).map_err(|_| port_error(&port.to_string()))?;
        Self::new(host, port)
    }

    /// Parse from raw text fields, as typed into a settings form
    ///
    /// Empty fields fall back to the defaults.
    pub fn parse(host: &str, port: &str) -> Result<Self, RoutingError> {
        let host = match host.trim() {
            "" => DEFAULT_PROXY_HOST,
            h => h,
        };
        let port = match port.trim() {
            "" => DEFAULT_PROXY_PORT as i64,
            p => p.parse::<i64>().map_err(|_| port_error(p))?,
        };
        Self::from_port_number(host, port)
    }

    /// Parse a proxy URL (`socks5h://host:port` or `socks5://host:port`)
    pub fn from_url(raw: &str) -> Result<Self, RoutingError> {
        let url = url::Url::parse(raw)
            .map_err(|e| RoutingError::invalid(format!("Invalid proxy URL '{}': {}", raw, e)))?;

        if url.scheme() != PROXY_SCHEME && url.scheme() != "socks5" {
            return Err(RoutingError::invalid(format!(
                "Unsupported proxy scheme '{}' (expected socks5h or socks5)",
                url.scheme()
            )));
        }

        let host = match url.host() {
            Some(url::Host::Domain(d)) => d.to_string(),
            Some(url::Host::Ipv4(ip)) => ip.to_string(),
            Some(url::Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(RoutingError::invalid(format!("Proxy URL '{}' has no host", raw))),
        };
        let port = url.port().unwrap_or(DEFAULT_PROXY_PORT);

        Self::new(host, port)
    }

    /// Proxy host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Proxy port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `(host, port)` pair for raw socket probes
    pub fn socket_target(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    /// Canonical proxy URL for HTTP-layer clients
    pub fn proxy_url(&self) -> String {
        format!("{}://{}", PROXY_SCHEME, self)
    }

    fn is_ipv6(&self) -> bool {
        self.host.parse::<Ipv6Addr>().is_ok()
    }
}

impl Default for ProxyEndpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_PROXY_HOST.to_string(),
            port: DEFAULT_PROXY_PORT,
        }
    }
}

impl std::fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_ipv6() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ProxyEndpoint {
    type Err = RoutingError;

    /// Parse `host:port`, with IPv6 hosts in brackets
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| RoutingError::invalid(format!("Expected host:port, got '{}'", s)))?;
        if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
            return Err(RoutingError::invalid(format!(
                "IPv6 proxy host must be bracketed: '{}'",
                s
            )));
        }
        Self::parse(host, port)
    }
}

fn validate_host(host: &str) -> Result<(), RoutingError> {
    if host.is_empty() {
        return Err(RoutingError::invalid("Proxy host must not be empty"));
    }
    if host.chars().any(|c| c.is_whitespace() || c == '/' || c == '@') {
        return Err(RoutingError::invalid(format!("Invalid proxy host '{}'", host)));
    }
    let bare = strip_brackets(host);
    if bare.contains(':') && bare.parse::<Ipv6Addr>().is_err() {
        return Err(RoutingError::invalid(format!("Invalid proxy host '{}'", host)));
    }
    Ok(())
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

fn port_error(port: &str) -> RoutingError {
    RoutingError::invalid(format!(
        "Invalid port '{}'. Port must be between 1-65535.",
        port
    ))
}
