//! Routing Policy
//!
//! Owns the Tor routing configuration and the trust established for
//! it, and answers the one question every outbound connection must ask:
//! may I connect, and through what?
//!
//! # States
//!
//! ```text
//!            set_enabled(true)
//! Disabled ───────────────────▶ Enabling ──probe ok──▶ ProxyReachable ──verify ok──▶ NetworkVerified
//!    ▲                              │                        │
//!    │                          probe failed            verify failed
//!    │                              ▼                        ▼
//!    └──── set_enabled(false) ── (from any state) ◀── ProxyUnreachable / Failed
//! ```
//!
//! # Concurrency
//!
//! Two locks, always taken in this order when both are needed:
//!
//! 1. `check_gate`: held for the duration of any probe or verification,
//!    so at most one check runs at a time and concurrent callers wait
//!    for its result instead of launching their own.
//! 2. `state`: held only for short read-modify-write sections, never
//!    across network I/O.
//!
//! Every `configure`/`set_enabled` bumps `generation`. A check result is
//! committed only if the generation is unchanged when it completes;
//! otherwise it is dropped and the decision recomputed.
//!
//! # Usage
//!
//! ```rust,ignore
//! let policy = Arc::new(RoutingPolicy::with_defaults());
//! policy.set_enabled(true).await?;         // probes Orbot under fail-closed
//!
//! // Worker, before each scan:
//! let decision = policy.ensure_allowed().await;
//! let proxy = decision.require()?;         // abort when blocked
//! ```

use crate::decision::{
    ConnectionReport, RoutingDecision, RoutingState, RoutingStatus, VerificationState,
};
use crate::endpoint::ProxyEndpoint;
use crate::error::{ErrorKind, RoutingError};
use crate::probe::{LivenessProbe, ProbeOutcome, TcpLivenessProbe, DEFAULT_LIVENESS_TIMEOUT};
use crate::transport::TransportOverride;
use crate::verifier::{
    NetworkVerifier, SocksNetworkVerifier, VerifyOutcome, DEFAULT_VERIFY_TIMEOUT,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Probe and verification timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimeouts {
    /// Liveness probe bound
    pub liveness: Duration,
    /// Per-target verification bound
    pub verify: Duration,
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            liveness: DEFAULT_LIVENESS_TIMEOUT,
            verify: DEFAULT_VERIFY_TIMEOUT,
        }
    }
}

/// Configuration snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    pub endpoint: ProxyEndpoint,
    pub fail_closed: bool,
    pub enabled: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            endpoint: ProxyEndpoint::default(),
            fail_closed: true, // Safer default
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disabled,
    /// Fail-closed enable waiting on its liveness probe
    Enabling,
    Enabled,
}

#[derive(Debug)]
struct PolicyState {
    endpoint: ProxyEndpoint,
    fail_closed: bool,
    phase: Phase,
    verification: VerificationState,
    /// Cause text of the last failed check, for messages
    last_failure: Option<String>,
    generation: u64,
    /// Checks committed so far; lets waiters tell that one finished
    completed_checks: u64,
}

impl PolicyState {
    fn reset_trust(&mut self) {
        self.verification = VerificationState::Unverified;
        self.last_failure = None;
    }

    fn routing_state(&self) -> RoutingState {
        match self.phase {
            Phase::Disabled => RoutingState::Disabled,
            Phase::Enabling => RoutingState::Enabling,
            Phase::Enabled => RoutingState::derive(true, &self.verification),
        }
    }

    /// Pure decision from current state
    fn decision(&self) -> RoutingDecision {
        if self.phase == Phase::Disabled {
            return RoutingDecision::direct();
        }

        let verified = self.verification.is_verified();
        if !self.fail_closed {
            return RoutingDecision::proxied(&self.endpoint, verified, self.verification.failure());
        }

        match &self.verification {
            VerificationState::NetworkVerified => {
                RoutingDecision::proxied(&self.endpoint, true, None).enforcing()
            }
            VerificationState::Failed(kind) => RoutingDecision::blocked(Some(*kind)),
            _ => RoutingDecision::blocked(None),
        }
    }

    /// Decision plus the failure behind it, read under one lock
    fn checked(&self) -> Checked {
        Checked {
            decision: self.decision(),
            endpoint: self.endpoint.clone(),
            cause: self.last_failure.clone(),
        }
    }

    /// Result that needs no further checking, if there is one
    fn settled(&self) -> Option<Checked> {
        match (&self.verification, self.fail_closed) {
            (VerificationState::NetworkVerified, _) | (VerificationState::Failed(_), _) => {
                Some(self.checked())
            }
            (VerificationState::ProxyReachable, false) => Some(self.checked()),
            _ => None,
        }
    }
}

/// Outcome of one pre-flight check
struct Checked {
    decision: RoutingDecision,
    endpoint: ProxyEndpoint,
    cause: Option<String>,
}

/// Tor routing policy
///
/// Construct once, share with `Arc` between the control side and scan
/// workers.
pub struct RoutingPolicy {
    state: Mutex<PolicyState>,
    check_gate: Mutex<()>,
    probe: Arc<dyn LivenessProbe>,
    verifier: Arc<dyn NetworkVerifier>,
    transport: Arc<TransportOverride>,
    timeouts: ProbeTimeouts,
}

impl RoutingPolicy {
    /// Create a disabled, fail-closed policy on the default endpoint
    pub fn new(probe: Arc<dyn LivenessProbe>, verifier: Arc<dyn NetworkVerifier>) -> Self {
        let defaults = RoutingConfig::default();
        Self {
            state: Mutex::new(PolicyState {
                endpoint: defaults.endpoint,
                fail_closed: defaults.fail_closed,
                phase: Phase::Disabled,
                verification: VerificationState::Unverified,
                last_failure: None,
                generation: 0,
                completed_checks: 0,
            }),
            check_gate: Mutex::new(()),
            probe,
            verifier,
            transport: Arc::new(TransportOverride::new()),
            timeouts: ProbeTimeouts::default(),
        }
    }

    /// TCP liveness probe + SOCKS5 verification against Tor Project hosts
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(TcpLivenessProbe),
            Arc::new(SocksNetworkVerifier::tor_project()),
        )
    }

    /// Set the initial endpoint and fail-closed flag
    pub fn with_config(mut self, endpoint: ProxyEndpoint, fail_closed: bool) -> Self {
        let state = self.state.get_mut();
        state.endpoint = endpoint;
        state.fail_closed = fail_closed;
        self
    }

    pub fn with_timeouts(mut self, timeouts: ProbeTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Use a caller-supplied dialer
    pub fn with_transport(mut self, transport: Arc<TransportOverride>) -> Self {
        self.transport = transport;
        self
    }

    /// The dialer scan engines connect through
    pub fn transport(&self) -> Arc<TransportOverride> {
        self.transport.clone()
    }

    pub fn timeouts(&self) -> ProbeTimeouts {
        self.timeouts
    }

    /// Current configuration
    pub async fn config(&self) -> RoutingConfig {
        let state = self.state.lock().await;
        RoutingConfig {
            endpoint: state.endpoint.clone(),
            fail_closed: state.fail_closed,
            enabled: state.phase == Phase::Enabled,
        }
    }

    /// Current routing state
    pub async fn state(&self) -> RoutingState {
        self.state.lock().await.routing_state()
    }

    pub async fn verification(&self) -> VerificationState {
        self.state.lock().await.verification.clone()
    }

    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    pub async fn is_enabled(&self) -> bool {
        self.state.lock().await.phase == Phase::Enabled
    }

    /// Replace endpoint and fail-closed flag
    ///
    /// Always discards established trust: verification is specific to
    /// the endpoint it ran against.
    pub async fn configure(&self, endpoint: ProxyEndpoint, fail_closed: bool) {
        let mut state = self.state.lock().await;
        state.endpoint = endpoint;
        state.fail_closed = fail_closed;
        state.generation += 1;
        state.reset_trust();

        if state.phase == Phase::Enabled {
            self.transport.apply(&state.endpoint).await;
        }

        info!(
            "Tor routing configured: {} (fail-closed: {}, generation {})",
            state.endpoint, state.fail_closed, state.generation
        );
    }

    /// Change only the endpoint
    pub async fn set_endpoint(&self, endpoint: ProxyEndpoint) {
        let fail_closed = self.state.lock().await.fail_closed;
        self.configure(endpoint, fail_closed).await;
    }

    /// Change only the fail-closed flag
    ///
    /// Trust is kept: it describes the endpoint, not the mode.
    pub async fn set_fail_closed(&self, fail_closed: bool) {
        let mut state = self.state.lock().await;
        if state.fail_closed != fail_closed {
            state.fail_closed = fail_closed;
            info!("Fail-closed mode {}", if fail_closed { "on" } else { "off" });
        }
    }

    /// Forget established trust so the next `ensure_allowed` checks again
    pub async fn recheck(&self) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.reset_trust();
        debug!("Re-check requested (generation {})", state.generation);
    }

    /// Turn Tor routing on or off
    ///
    /// Enabling under fail-closed probes the proxy first and fails with
    /// [`RoutingError::ProxyNotRunning`] if it does not answer, leaving
    /// routing disabled. Disabling always succeeds.
    ///
    /// Returns the state actually reached. An enable overtaken by a
    /// concurrent disable returns `Ok(RoutingState::Disabled)`, so check
    /// [`RoutingState::is_enabled`] rather than treating `Ok` as enabled.
    pub async fn set_enabled(&self, enabled: bool) -> Result<RoutingState, RoutingError> {
        if enabled {
            self.enable().await
        } else {
            self.disable().await;
            Ok(RoutingState::Disabled)
        }
    }

    async fn enable(&self) -> Result<RoutingState, RoutingError> {
        {
            let state = self.state.lock().await;
            if state.phase == Phase::Enabled {
                return Ok(state.routing_state());
            }
        }

        let _gate = self.check_gate.lock().await;

        let (mut endpoint, mut generation) = {
            let mut state = self.state.lock().await;
            if state.phase == Phase::Enabled {
                return Ok(state.routing_state());
            }

            state.generation += 1;
            state.reset_trust();

            if !state.fail_closed {
                state.phase = Phase::Enabled;
                self.transport.apply(&state.endpoint).await;
                info!("Tor routing enabled via {} (best-effort)", state.endpoint);
                return Ok(state.routing_state());
            }

            state.phase = Phase::Enabling;
            (state.endpoint.clone(), state.generation)
        };

        loop {
            debug!("Enabling Tor routing: probing {}", endpoint);
            let outcome = self.probe.probe(&endpoint, self.timeouts.liveness).await;

            let mut state = self.state.lock().await;
            if state.generation != generation {
                if state.phase != Phase::Enabling {
                    debug!("Enable superseded by a disable; dropping probe result");
                    return Ok(state.routing_state());
                }
                if !state.fail_closed {
                    state.phase = Phase::Enabled;
                    self.transport.apply(&state.endpoint).await;
                    info!("Tor routing enabled via {} (best-effort)", state.endpoint);
                    return Ok(state.routing_state());
                }
                debug!("Endpoint changed while enabling; probing {}", state.endpoint);
                endpoint = state.endpoint.clone();
                generation = state.generation;
                continue;
            }

            return match outcome {
                ProbeOutcome::Reachable => {
                    state.phase = Phase::Enabled;
                    state.verification = VerificationState::ProxyReachable;
                    self.transport.apply(&state.endpoint).await;
                    info!("Tor routing enabled via {} (fail-closed)", state.endpoint);
                    Ok(state.routing_state())
                }
                ProbeOutcome::Unreachable(cause) => {
                    state.phase = Phase::Disabled;
                    state.reset_trust();
                    warn!("Cannot enable Tor routing: {} unreachable ({})", endpoint, cause);
                    Err(RoutingError::ProxyNotRunning {
                        endpoint: endpoint.to_string(),
                        cause: cause.to_string(),
                    })
                }
            };
        }
    }

    async fn disable(&self) {
        let mut state = self.state.lock().await;
        let was = state.phase;
        state.phase = Phase::Disabled;
        state.generation += 1;
        state.reset_trust();
        self.transport.revert().await;

        if was != Phase::Disabled {
            info!("Tor routing disabled");
        }
    }

    /// Pre-flight check before any network operation
    ///
    /// Probes and verifies as needed. Under fail-closed, a decision with
    /// `permitted == false` means the operation must be aborted.
    pub async fn ensure_allowed(&self) -> RoutingDecision {
        self.check().await.decision
    }

    /// Like [`ensure_allowed`](Self::ensure_allowed), but a blocked
    /// decision becomes a descriptive error
    pub async fn ensure_or_fail(&self) -> Result<RoutingDecision, RoutingError> {
        let Checked { decision, endpoint, cause } = self.check().await;
        if decision.permitted {
            return Ok(decision);
        }

        let endpoint = endpoint.to_string();
        let cause = cause.unwrap_or_else(|| "not verified".to_string());
        Err(match decision.reason.unwrap_or(ErrorKind::ProxyNotRunning) {
            ErrorKind::NetworkUnreachable => RoutingError::NetworkUnreachable { endpoint, cause },
            ErrorKind::InvalidConfiguration => RoutingError::InvalidConfiguration(cause),
            ErrorKind::ProxyNotRunning => RoutingError::ProxyNotRunning { endpoint, cause },
        })
    }

    async fn check(&self) -> Checked {
        loop {
            let (generation, seen_checks) = {
                let state = self.state.lock().await;
                match state.phase {
                    Phase::Disabled => return state.checked(),
                    Phase::Enabled if state.verification.is_verified() => return state.checked(),
                    Phase::Enabled if !state.fail_closed && state.verification.is_reachable() => {
                        return state.checked();
                    }
                    _ => {}
                }
                (state.generation, state.completed_checks)
            };

            let _gate = self.check_gate.lock().await;

            let (endpoint, needs_probe) = {
                let state = self.state.lock().await;
                if state.generation != generation || state.phase != Phase::Enabled {
                    // Reconfigured, disabled or enabled while we waited
                    continue;
                }
                if state.completed_checks != seen_checks {
                    if let Some(settled) = state.settled() {
                        return settled;
                    }
                }
                (
                    state.endpoint.clone(),
                    state.verification != VerificationState::ProxyReachable,
                )
            };

            if needs_probe {
                let outcome = self.probe.probe(&endpoint, self.timeouts.liveness).await;

                let mut state = self.state.lock().await;
                if state.generation != generation {
                    debug!("Discarding liveness result for {}: configuration changed", endpoint);
                    continue;
                }
                match outcome {
                    ProbeOutcome::Reachable => {
                        state.verification = VerificationState::ProxyReachable;
                        state.last_failure = None;
                    }
                    ProbeOutcome::Unreachable(cause) => {
                        state.verification = VerificationState::Failed(ErrorKind::ProxyNotRunning);
                        state.last_failure = Some(cause.to_string());
                        state.completed_checks += 1;
                        if state.fail_closed {
                            warn!("Blocking network access: Tor proxy {} not running ({})", endpoint, cause);
                        } else {
                            warn!("Tor proxy {} not running ({}); continuing best-effort", endpoint, cause);
                        }
                        return state.checked();
                    }
                }
            }

            {
                // The mode may have changed while probing; it does not bump the generation
                let mut state = self.state.lock().await;
                if !state.fail_closed {
                    state.completed_checks += 1;
                    return state.checked();
                }
            }

            let outcome = self.verifier.verify(&endpoint, self.timeouts.verify).await;

            let mut state = self.state.lock().await;
            if state.generation != generation {
                debug!("Discarding verification for {}: configuration changed", endpoint);
                continue;
            }
            state.completed_checks += 1;
            match outcome {
                VerifyOutcome::Verified(target) => {
                    state.verification = VerificationState::NetworkVerified;
                    state.last_failure = None;
                    info!("Tor routing verified via {} ({})", endpoint, target);
                }
                VerifyOutcome::Unverified(cause) => {
                    state.verification = VerificationState::Failed(ErrorKind::NetworkUnreachable);
                    warn!("Blocking network access: Tor network unreachable via {} ({})", endpoint, cause);
                    state.last_failure = Some(cause);
                }
            }
            return state.checked();
        }
    }

    /// Decision from current state, without probing
    pub async fn decide(&self) -> RoutingDecision {
        self.state.lock().await.decision()
    }

    /// Status for display
    pub async fn status(&self) -> RoutingStatus {
        let state = self.state.lock().await;
        RoutingStatus {
            enabled: state.phase == Phase::Enabled,
            fail_closed: state.fail_closed,
            proxy_reachable: state.phase == Phase::Enabled && state.verification.is_reachable(),
            network_verified: state.phase == Phase::Enabled && state.verification.is_verified(),
            host: state.endpoint.host().to_string(),
            port: state.endpoint.port(),
            state: state.routing_state(),
            generation: state.generation,
        }
    }

    /// Probe and verify the configured endpoint without touching state
    pub async fn test_connection(&self) -> ConnectionReport {
        let endpoint = self.state.lock().await.endpoint.clone();
        self.test_endpoint(&endpoint).await
    }

    /// Probe and verify a candidate endpoint without touching state
    pub async fn test_endpoint(&self, endpoint: &ProxyEndpoint) -> ConnectionReport {
        info!("Testing Tor connection at {}", endpoint);

        match self.probe.probe(endpoint, self.timeouts.liveness).await {
            ProbeOutcome::Unreachable(cause) => ConnectionReport::ProxyUnreachable {
                endpoint: endpoint.clone(),
                cause: cause.to_string(),
            },
            ProbeOutcome::Reachable => {
                match self.verifier.verify(endpoint, self.timeouts.verify).await {
                    VerifyOutcome::Verified(target) => ConnectionReport::Verified {
                        endpoint: endpoint.clone(),
                        target: target.to_string(),
                    },
                    VerifyOutcome::Unverified(cause) => ConnectionReport::NetworkUnverified {
                        endpoint: endpoint.clone(),
                        cause,
                    },
                }
            }
        }
    }
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for RoutingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingPolicy")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}
