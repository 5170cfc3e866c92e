//! Shell control surface
//!
//! Text-level entry points for a settings form: raw host/port strings
//! are validated here and rejected before they reach the policy.

use crate::decision::{ConnectionReport, RoutingState, RoutingStatus};
use crate::endpoint::ProxyEndpoint;
use crate::error::RoutingError;
use crate::policy::RoutingPolicy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Contents of the Tor settings form, as typed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SettingsForm {
    pub host: String,
    pub port: String,
    pub fail_closed: bool,
    pub enabled: bool,
}

impl SettingsForm {
    /// Validated endpoint; empty fields fall back to the defaults
    pub fn endpoint(&self) -> Result<ProxyEndpoint, RoutingError> {
        ProxyEndpoint::parse(&self.host, &self.port)
    }
}

/// Control facade over a shared [`RoutingPolicy`]
#[derive(Debug, Clone)]
pub struct RoutingControl {
    policy: Arc<RoutingPolicy>,
}

impl RoutingControl {
    pub fn new(policy: Arc<RoutingPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> Arc<RoutingPolicy> {
        self.policy.clone()
    }

    /// Change the proxy host, keeping the port
    pub async fn set_host(&self, host: &str) -> Result<ProxyEndpoint, RoutingError> {
        let current = self.policy.config().await.endpoint;
        let endpoint = ProxyEndpoint::parse(host, &current.port().to_string())?;
        if endpoint != current {
            self.policy.set_endpoint(endpoint.clone()).await;
        }
        Ok(endpoint)
    }

    /// Change the proxy port from its text form, keeping the host
    pub async fn set_port_text(&self, port: &str) -> Result<ProxyEndpoint, RoutingError> {
        let current = self.policy.config().await.endpoint;
        let endpoint = ProxyEndpoint::parse(current.host(), port)?;
        if endpoint != current {
            self.policy.set_endpoint(endpoint.clone()).await;
        }
        Ok(endpoint)
    }

    pub async fn set_fail_closed(&self, fail_closed: bool) {
        self.policy.set_fail_closed(fail_closed).await;
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<RoutingState, RoutingError> {
        self.policy.set_enabled(enabled).await
    }

    /// Save the whole form: reconfigure, then enable or disable
    ///
    /// Nothing changes if the host or port is invalid. An unchanged
    /// endpoint and mode keep the trust already established.
    pub async fn apply_settings(&self, form: &SettingsForm) -> Result<RoutingState, RoutingError> {
        let endpoint = form.endpoint().inspect_err(|e| warn!("Rejected Tor settings: {}", e))?;

        let current = self.policy.config().await;
        if current.endpoint != endpoint || current.fail_closed != form.fail_closed {
            self.policy.configure(endpoint, form.fail_closed).await;
        }

        let state = self.policy.set_enabled(form.enabled).await?;
        info!("Tor settings saved: {}", state);
        Ok(state)
    }

    pub async fn status(&self) -> RoutingStatus {
        self.policy.status().await
    }

    /// Probe and verify the committed endpoint
    pub async fn test_connection(&self) -> ConnectionReport {
        self.policy.test_connection().await
    }

    /// Probe and verify the endpoint typed into `form`, committing nothing
    pub async fn test_form(&self, form: &SettingsForm) -> Result<ConnectionReport, RoutingError> {
        let endpoint = form.endpoint()?;
        Ok(self.policy.test_endpoint(&endpoint).await)
    }
}
