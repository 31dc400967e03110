//! The delivery loop and one full connect-subscribe-deliver run

use super::sink::MessageSink;
use crate::config::{ConfigError, TailConfig};
use crate::error::TailError;
use crate::protocol::{AckMode, DestinationPattern};
use crate::session::{Message, Session, SessionOptions, Subscription};
use crate::transport::{Endpoint, Transport};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

/// Why a delivery loop stopped without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryEnd {
    /// The broker closed the stream normally
    EndOfFeed,
    /// The shutdown trigger fired
    Shutdown,
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub last_message_id: Option<String>,
}

impl DeliveryStats {
    fn record(&mut self, message: &Message) {
        self.delivered += 1;
        self.last_message_id = Some(message.message_id().to_string());
    }
}

/// Everything one run needs besides the stream and the sink
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub endpoint: Endpoint,
    pub destination: DestinationPattern,
    pub ack: AckMode,
    pub session: SessionOptions,
}

impl RunSettings {
    pub fn from_config(config: &TailConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: config.endpoint()?,
            destination: config.destination()?,
            ack: config.subscription.ack,
            session: config.session_options()?,
        })
    }
}

/// Resolves once the shutdown flag is set. Never resolves if the sender is
/// dropped without setting it.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let requested = *shutdown.borrow_and_update();
        if requested {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sleep for `delay` unless shutdown is requested first.
///
/// Returns `true` when the full delay elapsed.
pub async fn interruptible_sleep(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown_requested(shutdown) => false,
    }
}

/// Pull messages from `subscription` and forward each to `sink` until the
/// feed ends, fails, or shutdown is requested.
pub async fn deliver(
    subscription: &mut Subscription,
    sink: &mut dyn MessageSink,
    shutdown: &mut watch::Receiver<bool>,
    stats: &mut DeliveryStats,
) -> Result<DeliveryEnd, TailError> {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => {
                info!(delivered = stats.delivered, "Shutdown requested, stopping delivery");
                return Ok(DeliveryEnd::Shutdown);
            }
            next = subscription.next() => next,
        };

        match next {
            Ok(Some(message)) => {
                debug!(
                    message_id = %message.message_id(),
                    destination = %message.destination(),
                    bytes = message.body().len(),
                    "Delivering message"
                );
                sink.deliver(&message).await?;
                stats.record(&message);
            }
            Ok(None) => {
                warn!(delivered = stats.delivered, "Subscription feed ended");
                return Ok(DeliveryEnd::EndOfFeed);
            }
            Err(e) => return Err(TailError::Session(e)),
        }
    }
}

/// Handshake, subscribe and deliver over an already established stream.
///
/// The session is disconnected on every exit path.
pub async fn run_session<S>(
    stream: S,
    settings: &RunSettings,
    sink: &mut dyn MessageSink,
    shutdown: &mut watch::Receiver<bool>,
    stats: &mut DeliveryStats,
) -> Result<DeliveryEnd, TailError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut session = Session::connect(stream, settings.session.clone()).await?;

    let result = async {
        let mut subscription = session.subscribe(&settings.destination, settings.ack).await?;
        let span = crate::delivery_span!(
            destination = %settings.destination,
            subscription_id = %subscription.id()
        );
        let end = deliver(&mut subscription, sink, shutdown, stats)
            .instrument(span)
            .await;
        if matches!(end, Ok(DeliveryEnd::Shutdown)) {
            if let Err(e) = session.unsubscribe(&mut subscription).await {
                debug!(error = %e, "Unsubscribe failed during shutdown");
            }
        }
        end
    }
    .await;

    session.disconnect().await;
    result
}

/// Establish a transport connection and run one session over it.
pub async fn run_once<T: Transport>(
    transport: &T,
    settings: &RunSettings,
    sink: &mut dyn MessageSink,
    shutdown: &mut watch::Receiver<bool>,
    stats: &mut DeliveryStats,
) -> Result<DeliveryEnd, TailError> {
    let stream = tokio::select! {
        biased;
        _ = shutdown_requested(shutdown) => return Ok(DeliveryEnd::Shutdown),
        stream = transport.establish(&settings.endpoint) => stream?,
    };
    run_session(stream, settings, sink, shutdown, stats).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(interruptible_sleep(&mut rx, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(true);
        });
        assert!(!interruptible_sleep(&mut rx, Duration::from_secs(30)).await);
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_never_fires() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(interruptible_sleep(&mut rx, Duration::from_millis(10)).await);
    }

    #[test]
    fn test_run_settings_from_config() {
        let mut config = TailConfig::default();
        config.broker.endpoint = Some("broker:61612".to_string());
        config.subscription.destination = "/queue/test.>".to_string();
        let settings = RunSettings::from_config(&config).unwrap();
        assert_eq!(settings.endpoint.port(), 61612);
        assert!(settings.destination.is_wildcard());
        assert_eq!(settings.ack, AckMode::Auto);
    }
}
