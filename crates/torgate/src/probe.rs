//! Liveness Probe
//!
//! Checks that something is listening on the proxy port. This says
//! nothing about whether the proxy actually reaches Tor; that is the
//! verifier's job.

use crate::endpoint::ProxyEndpoint;
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Default liveness timeout
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Why the proxy was considered unreachable
///
/// All variants lead to the same policy decision; they are kept apart
/// for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnreachableCause {
    #[error("connection refused")]
    Refused,

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("could not resolve host: {0}")]
    Resolve(String),

    #[error("host unreachable: {0}")]
    Io(String),
}

/// Probe result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable,
    Unreachable(UnreachableCause),
}

impl ProbeOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable)
    }
}

/// Bounded-time reachability check
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self, endpoint: &ProxyEndpoint, timeout: Duration) -> ProbeOutcome;
}

/// Plain TCP connect probe
///
/// Opens a connection and drops it immediately. Never sends a byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpLivenessProbe;

#[async_trait]
impl LivenessProbe for TcpLivenessProbe {
    async fn probe(&self, endpoint: &ProxyEndpoint, timeout: Duration) -> ProbeOutcome {
        let outcome = match tokio::time::timeout(timeout, connect_any(endpoint)).await {
            Ok(Ok(_stream)) => ProbeOutcome::Reachable,
            Ok(Err(cause)) => ProbeOutcome::Unreachable(cause),
            Err(_) => ProbeOutcome::Unreachable(UnreachableCause::TimedOut(timeout)),
        };

        debug!("Liveness probe {} -> {:?}", endpoint, outcome);
        outcome
    }
}

/// Resolve, then try each address in turn
async fn connect_any(endpoint: &ProxyEndpoint) -> Result<TcpStream, UnreachableCause> {
    let addrs: Vec<_> = tokio::net::lookup_host(endpoint.socket_target())
        .await
        .map_err(|e| UnreachableCause::Resolve(e.to_string()))?
        .collect();

    if addrs.is_empty() {
        return Err(UnreachableCause::Resolve(format!(
            "no addresses for {}",
            endpoint.host()
        )));
    }

    let mut last = UnreachableCause::Refused;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last = classify(&e),
        }
    }
    Err(last)
}

fn classify(err: &io::Error) -> UnreachableCause {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => UnreachableCause::Refused,
        io::ErrorKind::TimedOut => UnreachableCause::TimedOut(Duration::ZERO),
        _ => UnreachableCause::Io(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let ep = ProxyEndpoint::new("127.0.0.1", port).unwrap();

        let outcome = TcpLivenessProbe.probe(&ep, Duration::from_secs(2)).await;
        assert!(outcome.is_reachable());
    }

    #[tokio::test]
    async fn test_probe_refused() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let ep = ProxyEndpoint::new("127.0.0.1", port).unwrap();

        let outcome = TcpLivenessProbe.probe(&ep, Duration::from_secs(2)).await;
        assert_eq!(outcome, ProbeOutcome::Unreachable(UnreachableCause::Refused));
    }

    #[tokio::test]
    async fn test_probe_unresolvable() {
        let ep = ProxyEndpoint::new("orbot.invalid", 9050).unwrap();

        let outcome = TcpLivenessProbe.probe(&ep, Duration::from_secs(5)).await;
        assert!(!outcome.is_reachable());
    }
}
