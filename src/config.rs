//! Configuration for the tail client
//!
//! Built once at startup from an optional TOML file, then overridden by
//! command-line values, then validated. The resulting [`TailConfig`] is
//! passed by reference into every stage; nothing reads ambient state.

use crate::delivery::OutputFormat;
use crate::protocol::{AckMode, DestinationPattern, DEFAULT_MAX_FRAME_BYTES};
use crate::session::{HeartBeat, SessionOptions, StompCredentials};
use crate::transport::{Endpoint, TransportOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CA_FILE: &str = "/etc/pki/tls/certs/ca-bundle.crt";
pub const DEFAULT_DESTINATION: &str = "/queue/Consumer.client-rbean.go-test.VirtualTopic.eng.>";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TailConfig {
    pub broker: BrokerSection,
    pub tls: TlsSection,
    pub subscription: SubscriptionSection,
    pub session: SessionSection,
    pub reconnect: ReconnectSection,
    pub output: OutputSection,
}

/// Broker endpoint and STOMP-level login
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerSection {
    /// `host:port` or `stomp+ssl://host:port`
    pub endpoint: Option<String>,
    /// Name verified against the broker certificate (defaults to endpoint host)
    pub server_name: Option<String>,
    /// STOMP `host` header (defaults to endpoint host)
    pub host_header: Option<String>,
    /// Environment variable containing the STOMP login
    pub login_env: Option<String>,
    /// Environment variable containing the STOMP passcode
    pub passcode_env: Option<String>,
}

/// PEM credential files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TlsSection {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: PathBuf,
}

impl Default for TlsSection {
    fn default() -> Self {
        Self {
            cert_file: None,
            key_file: None,
            ca_file: PathBuf::from(DEFAULT_CA_FILE),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubscriptionSection {
    pub destination: String,
    pub ack: AckMode,
    /// Capacity of the hand-off queue between the frame reader and consumer
    pub buffer_size: usize,
}

impl Default for SubscriptionSection {
    fn default() -> Self {
        Self {
            destination: DEFAULT_DESTINATION.to_string(),
            ack: AckMode::Auto,
            buffer_size: 64,
        }
    }
}

/// Timeouts and heart-beating, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSection {
    pub dial_timeout_ms: u64,
    pub tls_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub subscribe_timeout_ms: u64,
    pub disconnect_timeout_ms: u64,
    pub heartbeat_send_ms: u64,
    pub heartbeat_recv_ms: u64,
    pub heartbeat_grace_ms: u64,
    pub max_frame_bytes: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            dial_timeout_ms: 10_000,
            tls_timeout_ms: 10_000,
            handshake_timeout_ms: 10_000,
            subscribe_timeout_ms: 10_000,
            disconnect_timeout_ms: 5_000,
            heartbeat_send_ms: 60_000,
            heartbeat_recv_ms: 60_000,
            heartbeat_grace_ms: 15_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Outer supervising loop, off unless enabled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSection {
    pub enabled: bool,
    /// Maximum consecutive attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Treat a broker-closed feed like a failure and reconnect
    pub restart_on_end_of_feed: bool,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: Some(10),
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            restart_on_end_of_feed: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputSection {
    pub format: OutputFormat,
}

/// Values supplied on the command line; each one replaces the file value
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub endpoint: Option<String>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    pub destination: Option<String>,
    pub output: Option<OutputFormat>,
    pub reconnect: Option<bool>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("Invalid destination: {0}")]
    InvalidDestination(#[from] crate::protocol::DestinationError),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TailConfig {
    /// Load configuration from a TOML file. Validation is deferred until
    /// command-line overrides have been applied.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(endpoint) = overrides.endpoint {
            self.broker.endpoint = Some(endpoint);
        }
        if let Some(cert_file) = overrides.cert_file {
            self.tls.cert_file = Some(cert_file);
        }
        if let Some(key_file) = overrides.key_file {
            self.tls.key_file = Some(key_file);
        }
        if let Some(ca_file) = overrides.ca_file {
            self.tls.ca_file = ca_file;
        }
        if let Some(destination) = overrides.destination {
            self.subscription.destination = destination;
        }
        if let Some(format) = overrides.output {
            self.output.format = format;
        }
        if let Some(enabled) = overrides.reconnect {
            self.reconnect.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint()?;
        if self.tls.cert_file.is_none() {
            return Err(ConfigError::Missing("tls.cert_file"));
        }
        if self.tls.key_file.is_none() {
            return Err(ConfigError::Missing("tls.key_file"));
        }
        self.destination()?;

        if self.subscription.ack != AckMode::Auto {
            return Err(ConfigError::InvalidConfig(format!(
                "ack mode '{}' is not supported, only 'auto'",
                self.subscription.ack
            )));
        }
        if self.subscription.buffer_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "subscription.buffer_size must be greater than 0".to_string(),
            ));
        }

        let session = &self.session;
        for (name, value) in [
            ("session.dial_timeout_ms", session.dial_timeout_ms),
            ("session.tls_timeout_ms", session.tls_timeout_ms),
            ("session.handshake_timeout_ms", session.handshake_timeout_ms),
            ("session.subscribe_timeout_ms", session.subscribe_timeout_ms),
            ("session.disconnect_timeout_ms", session.disconnect_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be greater than 0"
                )));
            }
        }
        if session.max_frame_bytes < 1024 {
            return Err(ConfigError::InvalidConfig(
                "session.max_frame_bytes must be at least 1024".to_string(),
            ));
        }

        let reconnect = &self.reconnect;
        if reconnect.max_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "reconnect.max_attempts must be greater than 0 or omitted for unlimited"
                    .to_string(),
            ));
        }
        if reconnect.initial_delay_ms == 0 || reconnect.max_delay_ms < reconnect.initial_delay_ms
        {
            return Err(ConfigError::InvalidConfig(
                "reconnect delays must satisfy 0 < initial_delay_ms <= max_delay_ms".to_string(),
            ));
        }
        if !reconnect.multiplier.is_finite() || reconnect.multiplier < 1.0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.multiplier must be a finite number >= 1.0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        let raw = self
            .broker
            .endpoint
            .as_deref()
            .ok_or(ConfigError::Missing("broker.endpoint"))?;
        raw.parse()
    }

    pub fn destination(&self) -> Result<DestinationPattern, ConfigError> {
        Ok(DestinationPattern::parse(&self.subscription.destination)?)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            dial_timeout: Duration::from_millis(self.session.dial_timeout_ms),
            tls_timeout: Duration::from_millis(self.session.tls_timeout_ms),
            server_name: self.broker.server_name.clone(),
        }
    }

    /// Session parameters, resolving login/passcode from the environment
    pub fn session_options(&self) -> Result<SessionOptions, ConfigError> {
        let endpoint = self.endpoint()?;
        let host = self
            .broker
            .host_header
            .clone()
            .unwrap_or_else(|| endpoint.host().to_string());

        let credentials = match &self.broker.login_env {
            Some(login_env) => {
                let login = get_env_var_required(login_env)?;
                let passcode = self
                    .broker
                    .passcode_env
                    .as_deref()
                    .map(get_env_var_required)
                    .transpose()?
                    .unwrap_or_default();
                Some(StompCredentials::new(login, passcode))
            }
            None => None,
        };

        let session = &self.session;
        Ok(SessionOptions {
            host,
            credentials,
            heart_beat: HeartBeat {
                send: Duration::from_millis(session.heartbeat_send_ms),
                receive: Duration::from_millis(session.heartbeat_recv_ms),
            },
            heartbeat_grace: Duration::from_millis(session.heartbeat_grace_ms),
            handshake_timeout: Duration::from_millis(session.handshake_timeout_ms),
            subscribe_timeout: Duration::from_millis(session.subscribe_timeout_ms),
            disconnect_timeout: Duration::from_millis(session.disconnect_timeout_ms),
            max_frame_bytes: session.max_frame_bytes,
            feed_capacity: self.subscription.buffer_size,
        })
    }
}

fn get_env_var_required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarNotFound(name.to_string()))
}
