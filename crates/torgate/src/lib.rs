//! Torgate - Tor-only routing policy for scan traffic
//!
//! Decides, before every outbound connection, whether it may proceed
//! and through which proxy. In fail-closed mode nothing leaves the
//! process unless Orbot (or any Tor SOCKS5 proxy) is up and traffic
//! through it has been seen reaching the Tor network.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Application                           │
//! │                                                              │
//! │  ┌────────────┐   set_enabled/configure   ┌───────────────┐  │
//! │  │  Control   │──────────────────────────▶│ RoutingPolicy │  │
//! │  └────────────┘                           └───┬───────┬───┘  │
//! │                                probe/verify   │       │ apply│
//! │  ┌────────────┐   ensure_allowed   ┌──────────▼──┐ ┌──▼────┐ │
//! │  │  ScanGate  │───────────────────▶│ Probe +     │ │Trans- │ │
//! │  │  + engine  │                    │ Verifier    │ │port   │ │
//! │  └─────┬──────┘                    └─────────────┘ └──┬────┘ │
//! │        │ connect                                      │      │
//! │        └──────────────────────────────────────────────┘      │
//! └───────────────────────────────────────────────────┬──────────┘
//!                                                     │ SOCKS5
//!                                                     ▼
//!                                      ┌──────────────────────────┐
//!                                      │  Orbot / Tor (127.0.0.1) │
//!                                      └──────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Fail-closed**: blocked decisions abort the scan, no direct fallback
//! - **Two-step trust**: TCP liveness, then a SOCKS5 CONNECT to Tor Project hosts
//! - **Generation-checked**: results for an old configuration are dropped
//! - **Single-flight**: concurrent workers share one verification
//!
//! # Security
//!
//! - Proxy URLs use `socks5h`, so hostnames resolve inside Tor
//! - Verification is never persisted and never reused across endpoints

mod control;
mod decision;
mod endpoint;
mod error;
mod policy;
mod probe;
mod scan;
mod settings;
mod socks;
mod transport;
mod verifier;

pub use control::{RoutingControl, SettingsForm};
pub use decision::{
    ConnectionReport, RoutingDecision, RoutingState, RoutingStatus, VerificationState,
};
pub use endpoint::{ProxyEndpoint, DEFAULT_PROXY_HOST, DEFAULT_PROXY_PORT, PROXY_SCHEME};
pub use error::{ErrorKind, RoutingError};
pub use policy::{ProbeTimeouts, RoutingConfig, RoutingPolicy};
pub use probe::{
    LivenessProbe, ProbeOutcome, TcpLivenessProbe, UnreachableCause, DEFAULT_LIVENESS_TIMEOUT,
};
pub use scan::{GatedScan, ScanEngine, ScanError, ScanGate, ScanRequest};
pub use settings::{ConfigFormat, RoutingSettings, SettingsError};
pub use socks::SocksError;
pub use transport::{TransportError, TransportOverride, DEFAULT_CONNECT_TIMEOUT};
pub use verifier::{
    NetworkVerifier, SocksNetworkVerifier, VerificationTarget, VerifyOutcome,
    DEFAULT_VERIFY_TIMEOUT, MIN_TARGETS,
};
