//! Broker endpoint parsing

use crate::config::ConfigError;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Default STOMP+SSL listener port on ActiveMQ brokers
pub const DEFAULT_STOMP_TLS_PORT: u16 = 61612;

const TLS_SCHEMES: &[&str] = &["stomp+ssl", "stomp+tls", "ssl", "tls"];

/// Host/port pair identifying the broker's TLS listener
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` form accepted by `TcpStream::connect`
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.socket_addr())
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidEndpoint {
            endpoint: raw.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid("endpoint is empty"));
        }
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("stomp+ssl://{trimmed}")
        };

        let url = Url::parse(&with_scheme).map_err(|e| invalid(&e.to_string()))?;
        if !TLS_SCHEMES.contains(&url.scheme()) {
            return Err(invalid(&format!(
                "unsupported scheme '{}', expected one of {}",
                url.scheme(),
                TLS_SCHEMES.join(", ")
            )));
        }
        if !matches!(url.path(), "" | "/") || url.query().is_some() {
            return Err(invalid("endpoint must not carry a path or query"));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = url.port().unwrap_or(DEFAULT_STOMP_TLS_PORT);

        Ok(Self::new(host, port))
    }
}
