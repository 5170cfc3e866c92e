//! Transport Override
//!
//! The connection factory handed to the scan engine. While an override
//! is applied every connection goes through the proxy as a SOCKS5
//! CONNECT; otherwise it is a plain TCP connect.
//!
//! This replaces patching a process-wide socket constructor: whoever
//! needs outbound connections holds an `Arc<TransportOverride>`, and the
//! routing policy is the only code that calls `apply`/`revert`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let dialer = policy.transport();
//! let stream = dialer.connect("target.example", 443).await?;
//! ```

use crate::endpoint::ProxyEndpoint;
use crate::socks::{self, SocksError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Default connect timeout for dialed connections
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Dialer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection to {target} via proxy {proxy} failed: {source}")]
    Proxy {
        target: String,
        proxy: String,
        #[source]
        source: SocksError,
    },

    #[error("Direct connection to {target} failed: {source}")]
    Direct {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to {0} timed out")]
    Timeout(String),
}

/// Swappable connection factory
#[derive(Debug)]
pub struct TransportOverride {
    /// Proxy currently in force, if any
    active: RwLock<Option<ProxyEndpoint>>,
    /// Connect timeout
    timeout: Duration,
}

impl TransportOverride {
    /// Create a dialer with no override applied
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            active: RwLock::new(None),
            timeout,
        }
    }

    /// Route new connections through `endpoint`
    ///
    /// Returns `false` when that exact endpoint was already applied.
    pub async fn apply(&self, endpoint: &ProxyEndpoint) -> bool {
        let mut active = self.active.write().await;
        if active.as_ref() == Some(endpoint) {
            return false;
        }
        info!("Transport override applied: {}", endpoint.proxy_url());
        *active = Some(endpoint.clone());
        true
    }

    /// Restore direct connections. No-op when nothing is applied.
    pub async fn revert(&self) -> bool {
        let mut active = self.active.write().await;
        match active.take() {
            Some(previous) => {
                info!("Transport override reverted (was {})", previous);
                true
            }
            None => false,
        }
    }

    pub async fn is_applied(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Proxy in force, if any
    pub async fn current(&self) -> Option<ProxyEndpoint> {
        self.active.read().await.clone()
    }

    /// Open a connection to `host:port`, through the proxy when applied
    pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, TransportError> {
        let target = format!("{}:{}", host, port);
        let proxy = self.current().await;

        let attempt = async {
            match &proxy {
                Some(proxy) => {
                    debug!("Dialing {} via {}", target, proxy);
                    socks::connect(proxy, host, port)
                        .await
                        .map_err(|source| TransportError::Proxy {
                            target: target.clone(),
                            proxy: proxy.to_string(),
                            source,
                        })
                }
                None => {
                    debug!("Dialing {} directly", target);
                    TcpStream::connect((host, port))
                        .await
                        .map_err(|source| TransportError::Direct {
                            target: target.clone(),
                            source,
                        })
                }
            }
        };

        tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| TransportError::Timeout(target.clone()))?
    }
}

impl Default for TransportOverride {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socks::tests::{spawn_stub_proxy, StubBehavior};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_apply_idempotent() {
        let transport = TransportOverride::new();
        let ep = ProxyEndpoint::default();

        assert!(!transport.is_applied().await);
        assert!(transport.apply(&ep).await);
        assert!(!transport.apply(&ep).await);
        assert_eq!(transport.current().await, Some(ep));
    }

    #[tokio::test]
    async fn test_revert_when_not_applied() {
        let transport = TransportOverride::new();
        assert!(!transport.revert().await);

        transport.apply(&ProxyEndpoint::default()).await;
        assert!(transport.revert().await);
        assert!(!transport.revert().await);
        assert!(!transport.is_applied().await);
    }

    #[tokio::test]
    async fn test_connect_direct() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let transport = TransportOverride::new();
        assert!(transport.connect("127.0.0.1", port).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_through_proxy() {
        let proxy = spawn_stub_proxy(vec![("target.example", StubBehavior::Accept)]).await;
        let transport = TransportOverride::new();
        transport.apply(&proxy).await;

        assert!(transport.connect("target.example", 80).await.is_ok());

        // Names the proxy does not know are refused, never dialed directly
        let err = transport.connect("other.example", 80).await.unwrap_err();
        assert!(matches!(err, TransportError::Proxy { .. }));
    }
}
