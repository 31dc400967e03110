//! umb-tail - follow a STOMP destination over mutually-authenticated TLS
//!
//! # Overview
//!
//! The crate is layered bottom-up:
//! - [`protocol`]: STOMP frame model, codec and destination patterns
//! - [`transport`]: client-certificate TLS connections to the broker
//! - [`session`]: CONNECT handshake, subscriptions and per-subscription feeds
//! - [`delivery`]: the loop that writes each message to a sink, plus the
//!   reconnecting supervisor around it
//!
//! # Quick Start
//!
//! ```no_run
//! use tokio::sync::watch;
//! use umb_tail::config::TailConfig;
//! use umb_tail::credentials::CredentialMaterial;
//! use umb_tail::delivery::{stdout_sink, OutputFormat, ReconnectPolicy, RunSettings, Supervisor};
//! use umb_tail::transport::SecureTransport;
//!
//! # async fn tail() -> Result<(), umb_tail::TailError> {
//! let mut config = TailConfig::default();
//! config.broker.endpoint = Some("umb.example.com:61612".to_string());
//! config.tls.cert_file = Some("client.crt".into());
//! config.tls.key_file = Some("client.key".into());
//! config.subscription.destination = "/topic/VirtualTopic.eng.>".to_string();
//! config.validate()?;
//!
//! let material = CredentialMaterial::load(&config.tls)?;
//! let transport = SecureTransport::from_material(&material, config.transport_options())?;
//! let settings = RunSettings::from_config(&config)?;
//!
//! let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//! let mut sink = stdout_sink(OutputFormat::Raw);
//! let outcome = Supervisor::new(transport, settings, ReconnectPolicy::disabled())
//!     .run(sink.as_mut(), shutdown_rx)
//!     .await?;
//! println!("delivered {} messages", outcome.delivered());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod credentials;
pub mod delivery;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, TailConfig};
pub use error::{SessionError, TailError, TailResult};
pub use protocol::{AckMode, DestinationPattern, Frame};
pub use session::{Message, Session, SessionOptions, SessionState, Subscription};
pub use transport::{Endpoint, SecureTransport, Transport};
