//! Routing Settings
//!
//! File-backed configuration for the routing policy. Loaded from TOML
//! or JSON, validated into a [`ProxyEndpoint`] and verifier targets.
//!
//! # Example
//!
//! ```toml
//! host = "127.0.0.1"
//! port = 9050
//! fail_closed = true
//! enabled = true
//!
//! [[verification_targets]]
//! host = "check.torproject.org"
//! port = 443
//!
//! [[verification_targets]]
//! host = "www.torproject.org"
//! port = 443
//! ```
//!
//! Nothing here is written back by the policy; verification state is
//! never persisted.

use crate::endpoint::{ProxyEndpoint, DEFAULT_PROXY_HOST, DEFAULT_PROXY_PORT};
use crate::error::RoutingError;
use crate::policy::{ProbeTimeouts, RoutingPolicy};
use crate::probe::TcpLivenessProbe;
use crate::verifier::{SocksNetworkVerifier, VerificationTarget};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Routing settings file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSettings {
    /// Proxy host
    #[serde(default = "default_host")]
    pub host: String,
    /// Proxy port (validated 1-65535; wider type so bad values are
    /// reported, not truncated)
    #[serde(default = "default_port")]
    pub port: i64,
    /// Block network access unless Tor is verified
    #[serde(default = "default_true")]
    pub fail_closed: bool,
    /// Route through Tor at startup
    #[serde(default)]
    pub enabled: bool,
    /// Liveness probe timeout (seconds)
    #[serde(default = "default_liveness_timeout")]
    pub liveness_timeout_secs: u64,
    /// Per-target verification timeout (seconds)
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,
    /// Hosts reached through the proxy to verify Tor, in order
    #[serde(default = "VerificationTarget::tor_project")]
    pub verification_targets: Vec<VerificationTarget>,
}

fn default_host() -> String {
    DEFAULT_PROXY_HOST.to_string()
}

fn default_port() -> i64 {
    DEFAULT_PROXY_PORT as i64
}

fn default_true() -> bool {
    true
}

fn default_liveness_timeout() -> u64 {
    5
}

fn default_verify_timeout() -> u64 {
    10
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            fail_closed: true,
            enabled: false,
            liveness_timeout_secs: default_liveness_timeout(),
            verify_timeout_secs: default_verify_timeout(),
            verification_targets: VerificationTarget::tor_project(),
        }
    }
}

/// Settings file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick a format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Some(ConfigFormat::Toml),
            Some("json") => Some(ConfigFormat::Json),
            _ => None,
        }
    }
}

impl RoutingSettings {
    /// Load from a `.toml` or `.json` file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let format = ConfigFormat::from_path(path).ok_or(SettingsError::UnsupportedFormat)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::IoError(format!("{}: {}", path.display(), e)))?;

        let settings = Self::from_str_format(&content, format)?;
        info!("Loaded routing settings from {}", path.display());
        Ok(settings)
    }

    /// Load from a string in the given format
    pub fn from_str_format(content: &str, format: ConfigFormat) -> Result<Self, SettingsError> {
        let settings: Self = match format {
            ConfigFormat::Toml => {
                toml::from_str(content).map_err(|e| SettingsError::ParseError(e.to_string()))?
            }
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| SettingsError::ParseError(e.to_string()))?,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        Self::from_str_format(content, ConfigFormat::Toml)
    }

    /// Load from JSON string
    pub fn from_json(content: &str) -> Result<Self, SettingsError> {
        Self::from_str_format(content, ConfigFormat::Json)
    }

    /// Export to TOML
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        toml::to_string_pretty(self).map_err(|e| SettingsError::ParseError(e.to_string()))
    }

    /// Export to JSON
    pub fn to_json(&self) -> Result<String, SettingsError> {
        serde_json::to_string_pretty(self).map_err(|e| SettingsError::ParseError(e.to_string()))
    }

    /// Check everything that can be checked without the network
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.endpoint()?;
        self.verifier()?;
        if self.liveness_timeout_secs == 0 || self.verify_timeout_secs == 0 {
            return Err(SettingsError::Invalid(RoutingError::invalid(
                "Timeouts must be at least one second",
            )));
        }
        Ok(())
    }

    /// Validated proxy endpoint
    pub fn endpoint(&self) -> Result<ProxyEndpoint, SettingsError> {
        Ok(ProxyEndpoint::from_port_number(self.host.clone(), self.port)?)
    }

    /// Verifier over the configured targets
    pub fn verifier(&self) -> Result<SocksNetworkVerifier, SettingsError> {
        Ok(SocksNetworkVerifier::new(self.verification_targets.clone())?)
    }

    pub fn timeouts(&self) -> ProbeTimeouts {
        ProbeTimeouts {
            liveness: Duration::from_secs(self.liveness_timeout_secs),
            verify: Duration::from_secs(self.verify_timeout_secs),
        }
    }

    /// Build a disabled policy from these settings
    ///
    /// `enabled` is not applied here: enabling may probe the network, so
    /// the caller does it with [`RoutingPolicy::set_enabled`].
    pub fn build_policy(&self) -> Result<RoutingPolicy, SettingsError> {
        let policy = RoutingPolicy::new(Arc::new(TcpLivenessProbe), Arc::new(self.verifier()?))
            .with_config(self.endpoint()?, self.fail_closed)
            .with_timeouts(self.timeouts());
        Ok(policy)
    }
}

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unsupported config format (expected .toml or .json)")]
    UnsupportedFormat,

    #[error(transparent)]
    Invalid(#[from] RoutingError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_defaults() {
        let settings = RoutingSettings::default();

        assert!(settings.fail_closed);
        assert!(!settings.enabled);
        assert_eq!(settings.endpoint().unwrap(), ProxyEndpoint::default());
        assert_eq!(settings.verification_targets.len(), 2);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings = RoutingSettings::from_toml("port = 9150\nenabled = true\n").unwrap();

        assert_eq!(settings.port, 9150);
        assert!(settings.enabled);
        assert!(settings.fail_closed);
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.timeouts(), ProbeTimeouts::default());
    }

    #[test]
    fn test_out_of_range_port_rejected() {
        for content in ["port = 0", "port = 70000", "port = -5"] {
            match RoutingSettings::from_toml(content) {
                Err(SettingsError::Invalid(e)) => assert_eq!(e.kind(), ErrorKind::InvalidConfiguration),
                other => panic!("expected invalid port for {:?}, got {:?}", content, other),
            }
        }

        // Non-numeric ports fail to parse
        assert!(matches!(
            RoutingSettings::from_toml("port = \"abc\""),
            Err(SettingsError::ParseError(_))
        ));
    }

    #[test]
    fn test_single_target_rejected() {
        let content = r#"
            [[verification_targets]]
            host = "check.torproject.org"
            port = 443
        "#;
        assert!(matches!(
            RoutingSettings::from_toml(content),
            Err(SettingsError::Invalid(_))
        ));
    }

    #[test]
    fn test_json() {
        let settings = RoutingSettings::from_json(r#"{"host": "10.0.0.2", "fail_closed": false}"#).unwrap();
        assert_eq!(settings.host, "10.0.0.2");
        assert!(!settings.fail_closed);
        assert!(settings.to_json().unwrap().contains("10.0.0.2"));
    }

    #[test]
    fn test_toml_export_parses_back() {
        let exported = RoutingSettings::default().to_toml().unwrap();
        assert_eq!(RoutingSettings::from_toml(&exported).unwrap(), RoutingSettings::default());
    }

    #[test]
    fn test_unsupported_extension() {
        let err = RoutingSettings::load(Path::new("routing.yaml")).unwrap_err();
        assert!(matches!(err, SettingsError::UnsupportedFormat));
    }

    #[tokio::test]
    async fn test_build_policy() {
        let settings = RoutingSettings::from_toml("host = \"10.0.0.2\"\nport = 9150\nfail_closed = false").unwrap();
        let policy = settings.build_policy().unwrap();

        let config = policy.config().await;
        assert_eq!(config.endpoint.to_string(), "10.0.0.2:9150");
        assert!(!config.fail_closed);
        assert!(!config.enabled);
    }
}
