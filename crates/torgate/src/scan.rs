//! Scan gate
//!
//! Every scan goes through [`ScanGate::scan`], which asks the routing
//! policy first and aborts when it says no. The engine behind it is
//! opaque: it receives a [`ScanRequest`] carrying the proxy to use and
//! is trusted to honour it for each of its connections.
//!
//! ```rust,ignore
//! let gate = ScanGate::new(policy.clone(), engine);
//! match gate.scan(ScanRequest::new(url)).await {
//!     Err(ScanError::Blocked(e)) => show_error(e),   // never retry direct
//!     result => handle(result?),
//! }
//! ```

use crate::error::RoutingError;
use crate::policy::RoutingPolicy;
use crate::transport::TransportOverride;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// One scan invocation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Target URL
    pub url: String,
    /// POST body, if any
    pub data: Option<String>,
    pub cookie: Option<String>,
    pub user_agent: Option<String>,
    /// `scheme://host:port` proxy for every connection the engine opens
    pub proxy: Option<String>,
}

impl ScanRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Ask for a specific proxy
    ///
    /// Only honoured while routing is disabled or best-effort.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }
}

/// The scanning engine behind the gate
#[async_trait]
pub trait ScanEngine: Send + Sync {
    type Output: Send;

    async fn scan(&self, request: ScanRequest) -> anyhow::Result<Self::Output>;
}

/// Scan result plus how it was routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatedScan<T> {
    pub output: T,
    /// Proxy handed to the engine
    pub proxy: Option<String>,
    /// Tor verified end to end when the scan started
    pub verified: bool,
}

/// Scan errors
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The routing policy refused; the scan never started
    #[error("Scan aborted: {0} {remediation}", remediation = .0.kind().remediation())]
    Blocked(RoutingError),

    #[error("Scan failed: {0:#}")]
    Engine(anyhow::Error),
}

impl ScanError {
    pub fn is_blocked(&self) -> bool {
        matches!(self, ScanError::Blocked(_))
    }
}

/// Routing-aware front for a [`ScanEngine`]
pub struct ScanGate<E> {
    policy: Arc<RoutingPolicy>,
    engine: E,
}

impl<E: ScanEngine> ScanGate<E> {
    pub fn new(policy: Arc<RoutingPolicy>, engine: E) -> Self {
        Self { policy, engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Dialer for engines that open their own sockets
    pub fn transport(&self) -> Arc<TransportOverride> {
        self.policy.transport()
    }

    /// Check the policy, then run the scan
    pub async fn scan(&self, mut request: ScanRequest) -> Result<GatedScan<E::Output>, ScanError> {
        let decision = self.policy.ensure_or_fail().await.map_err(|e| {
            warn!("Scan of {} aborted: {}", request.url, e);
            ScanError::Blocked(e)
        })?;

        request.proxy = if decision.enforced {
            if let Some(user) = request.proxy.as_deref() {
                if decision.proxy_url.as_deref() != Some(user) {
                    warn!("Ignoring proxy {} for {}: Tor routing is fail-closed", user, request.url);
                }
            }
            decision.proxy_url.clone()
        } else {
            request.proxy.take().or_else(|| decision.proxy_url.clone())
        };

        match &request.proxy {
            Some(proxy) => info!("Scanning {} via {}", request.url, proxy),
            None => info!("Scanning {} directly", request.url),
        }

        let proxy = request.proxy.clone();
        let output = self.engine.scan(request).await.map_err(ScanError::Engine)?;

        Ok(GatedScan {
            output,
            proxy,
            verified: decision.verified,
        })
    }
}

impl<E> std::fmt::Debug for ScanGate<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanGate").field("policy", &self.policy).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::ProxyEndpoint;
    use crate::error::ErrorKind;
    use crate::policy::tests::{MockProbe, MockVerifier};
    use std::sync::Mutex;

    /// Records requests, answers with the proxy it was given
    #[derive(Default)]
    struct RecordingEngine {
        requests: Mutex<Vec<ScanRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl ScanEngine for RecordingEngine {
        type Output = Option<String>;

        async fn scan(&self, request: ScanRequest) -> anyhow::Result<Self::Output> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                anyhow::bail!("target returned HTTP 500");
            }
            Ok(request.proxy)
        }
    }

    fn gate(probe: Arc<MockProbe>, verifier: Arc<MockVerifier>, fail_closed: bool) -> ScanGate<RecordingEngine> {
        let policy = RoutingPolicy::new(probe, verifier).with_config(ProxyEndpoint::default(), fail_closed);
        ScanGate::new(Arc::new(policy), RecordingEngine::default())
    }

    #[tokio::test]
    async fn test_disabled_passes_user_proxy_through() {
        let gate = gate(MockProbe::up(), MockVerifier::ok(), true);

        let scan = gate.scan(ScanRequest::new("http://target.example/?id=1")).await.unwrap();
        assert_eq!(scan.proxy, None);

        let request = ScanRequest::new("http://target.example/?id=1").with_proxy("http://127.0.0.1:8080");
        let scan = gate.scan(request).await.unwrap();
        assert_eq!(scan.output.as_deref(), Some("http://127.0.0.1:8080"));
    }

    #[tokio::test]
    async fn test_fail_closed_routing_proxy_wins() {
        let gate = gate(MockProbe::up(), MockVerifier::ok(), true);
        gate.policy.set_enabled(true).await.unwrap();

        let request = ScanRequest::new("http://target.example/").with_proxy("http://127.0.0.1:8080");
        let scan = gate.scan(request).await.unwrap();

        assert!(scan.verified);
        assert_eq!(scan.proxy.as_deref(), Some("socks5h://127.0.0.1:9050"));
        assert_eq!(
            gate.engine().requests.lock().unwrap()[0].proxy.as_deref(),
            Some("socks5h://127.0.0.1:9050")
        );
    }

    #[tokio::test]
    async fn test_best_effort_honours_user_proxy() {
        let gate = gate(MockProbe::down(), MockVerifier::failing(), false);
        gate.policy.set_enabled(true).await.unwrap();

        let scan = gate.scan(ScanRequest::new("http://target.example/")).await.unwrap();
        assert_eq!(scan.proxy.as_deref(), Some("socks5h://127.0.0.1:9050"));
        assert!(!scan.verified);

        let request = ScanRequest::new("http://target.example/").with_proxy("http://127.0.0.1:8080");
        let scan = gate.scan(request).await.unwrap();
        assert_eq!(scan.proxy.as_deref(), Some("http://127.0.0.1:8080"));
    }

    #[tokio::test]
    async fn test_blocked_scans_never_reach_engine() {
        let probe = MockProbe::up();
        let gate = gate(probe.clone(), MockVerifier::ok(), true);
        gate.policy.set_enabled(true).await.unwrap();

        // Proxy dies after enabling
        probe.down.store(true, std::sync::atomic::Ordering::SeqCst);
        gate.policy.recheck().await;

        let err = gate.scan(ScanRequest::new("http://target.example/")).await.unwrap_err();
        match &err {
            ScanError::Blocked(e) => assert_eq!(e.kind(), ErrorKind::ProxyNotRunning),
            other => panic!("expected blocked scan, got {:?}", other),
        }
        assert!(err.to_string().contains("Start Orbot"));
        assert!(gate.engine().requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_block_messages_differ_by_reason() {
        let not_running = {
            let probe = MockProbe::up();
            let gate = gate(probe.clone(), MockVerifier::ok(), true);
            gate.policy.set_enabled(true).await.unwrap();
            probe.down.store(true, std::sync::atomic::Ordering::SeqCst);
            gate.policy.recheck().await;
            gate.scan(ScanRequest::new("http://a.example/")).await.unwrap_err().to_string()
        };
        let unreachable = {
            let gate = gate(MockProbe::up(), MockVerifier::failing(), true);
            gate.policy.set_enabled(true).await.unwrap();
            gate.scan(ScanRequest::new("http://a.example/")).await.unwrap_err().to_string()
        };

        assert!(not_running.contains("not accessible"));
        assert!(unreachable.contains("could not be verified"));
        assert_ne!(not_running, unreachable);
    }

    #[tokio::test]
    async fn test_engine_failure_is_not_a_block() {
        let policy = Arc::new(RoutingPolicy::new(MockProbe::up(), MockVerifier::ok()));
        let gate = ScanGate::new(policy, RecordingEngine { fail: true, ..Default::default() });

        let err = gate.scan(ScanRequest::new("http://target.example/")).await.unwrap_err();
        assert!(!err.is_blocked());
        assert!(err.to_string().contains("HTTP 500"));
    }
}
