//! STOMP session over an established byte stream
//!
//! After the handshake the stream is split: a background reader task owns
//! the inbound half and routes MESSAGE frames to per-subscription feeds,
//! while outbound frames (SUBSCRIBE, UNSUBSCRIBE, DISCONNECT, heart-beats)
//! are serialized through a mutex around the outbound half.

use super::feed::{Message, Subscription};
use super::router::{route_frame, FrameRoute};
use super::state::{HeartBeat, SessionInfo, SessionState, StompCredentials};
use crate::error::{SessionError, TailError};
use crate::protocol::{
    headers, AckMode, CodecError, Command, DestinationPattern, Frame, Packet, StompCodec,
    DEFAULT_MAX_FRAME_BYTES,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn, Instrument};

/// Protocol versions offered in CONNECT
pub const ACCEPT_VERSIONS: &str = "1.0,1.1,1.2";

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Any bidirectional byte stream a session can run over
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

type FramedStream = Framed<Box<dyn ByteStream>, StompCodec>;
type FrameSink = SplitSink<FramedStream, Packet>;
type FrameSource = SplitStream<FramedStream>;
type ReceiptResult = Result<(), SessionError>;

/// Handshake and runtime parameters for one session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Value of the CONNECT `host` header
    pub host: String,
    pub credentials: Option<StompCredentials>,
    /// Offered heart-beat intervals
    pub heart_beat: HeartBeat,
    /// Slack added to the broker's heart-beat interval before declaring it gone
    pub heartbeat_grace: Duration,
    pub handshake_timeout: Duration,
    pub subscribe_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub max_frame_bytes: usize,
    /// Bounded queue size between the reader task and each subscription
    pub feed_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            credentials: None,
            heart_beat: HeartBeat {
                send: Duration::from_secs(60),
                receive: Duration::from_secs(60),
            },
            heartbeat_grace: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(10),
            subscribe_timeout: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(5),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            feed_capacity: 64,
        }
    }
}

/// Request that waits on a RECEIPT did not complete
#[derive(Debug, Error)]
enum RequestFailure {
    #[error("{}", describe(.0))]
    Session(SessionError),
    #[error("no RECEIPT within {0:?}")]
    TimedOut(Duration),
}

fn describe(error: &SessionError) -> String {
    match error {
        SessionError::Broker { message, details } if !details.is_empty() && details != message => {
            format!("{message}: {details}")
        }
        other => other.to_string(),
    }
}

fn session_error(error: CodecError) -> SessionError {
    match error {
        CodecError::Protocol(e) => SessionError::Protocol(e),
        CodecError::Io(e) => SessionError::ConnectionLost(e.to_string()),
    }
}

struct FeedEntry {
    sender: mpsc::Sender<Message>,
    pattern: DestinationPattern,
}

/// State shared between the session handle and its background tasks
struct Shared {
    feeds: Mutex<HashMap<String, FeedEntry>>,
    receipts: Mutex<HashMap<String, oneshot::Sender<ReceiptResult>>>,
    writer: Mutex<Option<FrameSink>>,
    state: watch::Sender<SessionState>,
}

impl Shared {
    /// `Disconnected` always wins; `Ended`/`Failed` only replace `Connected`.
    fn transition(&self, next: SessionState) -> bool {
        self.state.send_if_modified(|current| {
            let allowed = match (&*current, &next) {
                (SessionState::Disconnected, _) => false,
                (_, SessionState::Disconnected) => true,
                (SessionState::Connected, _) => true,
                _ => false,
            };
            if allowed {
                *current = next;
            }
            allowed
        })
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), SessionError> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(SessionError::Closed)?;
        trace!(command = %frame.command, "Sending frame");
        sink.send(Packet::Frame(frame)).await.map_err(session_error)
    }

    async fn register_receipt(
        &self,
        receipt: &str,
    ) -> Result<oneshot::Receiver<ReceiptResult>, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.receipts.lock().await.insert(receipt.to_string(), tx);

        // The reader drains receipts after leaving Connected, so checking
        // here closes the window where an entry would never complete.
        let state = self.state.borrow().clone();
        match state {
            SessionState::Connected => Ok(rx),
            SessionState::Failed(error) => {
                self.receipts.lock().await.remove(receipt);
                Err(error)
            }
            SessionState::Ended | SessionState::Disconnected => {
                self.receipts.lock().await.remove(receipt);
                Err(SessionError::Closed)
            }
        }
    }

    async fn complete_receipt(&self, receipt: &str) {
        let waiter = self.receipts.lock().await.remove(receipt);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(Ok(()));
            }
            None => debug!(receipt_id = %receipt, "RECEIPT with no pending request"),
        }
    }

    async fn dispatch(&self, message: Message, state_rx: &mut watch::Receiver<SessionState>) {
        let entry = self.feeds.lock().await.get(message.subscription()).map(|entry| {
            (
                entry.sender.clone(),
                entry.pattern.matches(message.destination()),
            )
        });
        let Some((sender, in_pattern)) = entry else {
            warn!(
                subscription_id = %message.subscription(),
                message_id = %message.message_id(),
                "Dropping MESSAGE for unknown subscription"
            );
            return;
        };
        if !in_pattern {
            debug!(
                destination = %message.destination(),
                subscription_id = %message.subscription(),
                "Message destination outside subscribed pattern"
            );
        }

        let subscription = message.subscription().to_string();
        // A full feed blocks the reader here; that is the backpressure.
        tokio::select! {
            sent = sender.send(message) => {
                if sent.is_err() {
                    debug!(subscription_id = %subscription, "Feed consumer gone, removing subscription");
                    self.feeds.lock().await.remove(&subscription);
                }
            }
            _ = wait_disconnected(state_rx) => {
                trace!(subscription_id = %subscription, "Session disconnected during delivery");
            }
        }
    }

    /// Tear down after the reader stops: publish the final state, fail
    /// pending requests, end every feed and close the connection.
    async fn shutdown(&self, outcome: Result<(), SessionError>) {
        let (next, receipt_error) = match outcome {
            Ok(()) => {
                info!("Broker closed the connection");
                (
                    SessionState::Ended,
                    SessionError::ConnectionLost("connection closed by broker".to_string()),
                )
            }
            Err(error) => {
                if *self.state.borrow() != SessionState::Disconnected {
                    error!(error = %error, "Session failed");
                }
                (SessionState::Failed(error.clone()), error)
            }
        };
        self.transition(next);

        for (_, waiter) in self.receipts.lock().await.drain() {
            let _ = waiter.send(Err(receipt_error.clone()));
        }
        self.feeds.lock().await.clear();

        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink {
            match timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => debug!("Connection closed"),
                Ok(Err(e)) => debug!(error = %e, "Error while closing connection"),
                Err(_) => debug!("Timed out closing connection"),
            }
        }
    }
}

async fn wait_disconnected(state: &mut watch::Receiver<SessionState>) {
    loop {
        let disconnected = *state.borrow_and_update() == SessionState::Disconnected;
        if disconnected {
            return;
        }
        if state.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn read_loop(mut source: FrameSource, shared: Arc<Shared>, read_timeout: Option<Duration>) {
    let mut state_rx = shared.state.subscribe();
    let outcome = loop {
        let next = match read_timeout {
            Some(limit) => match timeout(limit, source.next()).await {
                Ok(next) => next,
                Err(_) => {
                    break Err(SessionError::ConnectionLost(format!(
                        "no data from broker within {limit:?}"
                    )));
                }
            },
            None => source.next().await,
        };

        let frame = match next {
            None => break Ok(()),
            Some(Err(e)) => break Err(session_error(e)),
            Some(Ok(Packet::Heartbeat)) => {
                trace!("Heart-beat received");
                continue;
            }
            Some(Ok(Packet::Frame(frame))) => frame,
        };

        match route_frame(frame) {
            Ok(FrameRoute::Deliver(message)) => shared.dispatch(message, &mut state_rx).await,
            Ok(FrameRoute::Receipt(receipt)) => shared.complete_receipt(&receipt).await,
            Ok(FrameRoute::BrokerError {
                message,
                receipt_id,
                details,
            }) => {
                warn!(broker_message = %message, receipt_id = ?receipt_id, "Broker sent ERROR frame");
                break Err(SessionError::Broker { message, details });
            }
            Err(e) => break Err(SessionError::Protocol(e)),
        }
    };
    shared.shutdown(outcome).await;
}

async fn heartbeat_loop(shared: Arc<Shared>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let mut writer = shared.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return;
        };
        if let Err(e) = sink.send(Packet::Heartbeat).await {
            debug!(error = %e, "Heart-beat write failed");
            return;
        }
        trace!("Heart-beat sent");
    }
}

/// CONNECT frame for the given options
pub fn connect_frame(options: &SessionOptions) -> Frame {
    let mut frame = Frame::new(Command::Connect)
        .header(headers::ACCEPT_VERSION, ACCEPT_VERSIONS)
        .header(headers::HOST, options.host.as_str())
        .header(headers::HEART_BEAT, options.heart_beat.to_header());
    if let Some(credentials) = &options.credentials {
        frame = frame
            .header(headers::LOGIN, credentials.login())
            .header(headers::PASSCODE, credentials.passcode());
    }
    frame
}

async fn handshake(framed: &mut FramedStream, options: &SessionOptions) -> Result<Frame, TailError> {
    framed
        .send(Packet::Frame(connect_frame(options)))
        .await
        .map_err(|e| TailError::handshake(format!("failed to send CONNECT: {e}")))?;

    loop {
        match framed.next().await {
            Some(Ok(Packet::Heartbeat)) => continue,
            Some(Ok(Packet::Frame(frame))) => {
                return match frame.command {
                    Command::Connected => Ok(frame),
                    Command::Error => {
                        let message = frame.get(headers::MESSAGE).unwrap_or("no message");
                        let details = frame.body_text();
                        Err(TailError::handshake(if details.is_empty() {
                            format!("broker rejected CONNECT: {message}")
                        } else {
                            format!("broker rejected CONNECT: {message}: {details}")
                        }))
                    }
                    other => Err(TailError::handshake(format!(
                        "expected CONNECTED, received {other}"
                    ))),
                };
            }
            Some(Err(e)) => return Err(TailError::handshake(e)),
            None => {
                return Err(TailError::handshake(
                    "connection closed before CONNECTED",
                ));
            }
        }
    }
}

fn session_info(frame: &Frame, offered: HeartBeat) -> Result<SessionInfo, TailError> {
    let broker = match frame.get(headers::HEART_BEAT) {
        Some(raw) => HeartBeat::parse(raw).map_err(TailError::handshake)?,
        None => HeartBeat::NONE,
    };
    Ok(SessionInfo {
        version: frame.get(headers::VERSION).unwrap_or("1.0").to_string(),
        session_id: frame.get(headers::SESSION).map(str::to_string),
        server: frame.get(headers::SERVER).map(str::to_string),
        heart_beat: HeartBeat::negotiate(offered, broker),
    })
}

/// A connected protocol session
pub struct Session {
    info: SessionInfo,
    options: SessionOptions,
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
    next_subscription: AtomicU64,
    next_receipt: AtomicU64,
    disconnected: bool,
}

impl Session {
    /// Perform the CONNECT handshake and start the background tasks.
    pub async fn connect<S>(stream: S, options: SessionOptions) -> Result<Self, TailError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let span = crate::session_span!(host = %options.host);
        async move {
            let stream: Box<dyn ByteStream> = Box::new(stream);
            let mut framed = Framed::new(stream, StompCodec::new(options.max_frame_bytes));

            let limit = options.handshake_timeout;
            let connected = match timeout(limit, handshake(&mut framed, &options)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(TailError::handshake(format!(
                        "no CONNECTED frame within {limit:?}"
                    )));
                }
            };
            let info = session_info(&connected, options.heart_beat)?;
            info!(
                version = %info.version,
                session_id = ?info.session_id,
                server = ?info.server,
                heartbeat_send_ms = info.heart_beat.send.as_millis() as u64,
                heartbeat_recv_ms = info.heart_beat.receive.as_millis() as u64,
                "STOMP session established"
            );

            framed.codec_mut().set_version(&info.version);
            let (sink, source) = framed.split();
            let (state, _) = watch::channel(SessionState::Connected);
            let shared = Arc::new(Shared {
                feeds: Mutex::new(HashMap::new()),
                receipts: Mutex::new(HashMap::new()),
                writer: Mutex::new(Some(sink)),
                state,
            });

            let read_timeout = (!info.heart_beat.receive.is_zero())
                .then(|| info.heart_beat.receive + options.heartbeat_grace);
            let reader = tokio::spawn(
                read_loop(source, shared.clone(), read_timeout).in_current_span(),
            );
            let heartbeat = (!info.heart_beat.send.is_zero()).then(|| {
                tokio::spawn(heartbeat_loop(shared.clone(), info.heart_beat.send).in_current_span())
            });

            Ok(Self {
                info,
                options,
                shared,
                reader,
                heartbeat,
                next_subscription: AtomicU64::new(0),
                next_receipt: AtomicU64::new(0),
                disconnected: false,
            })
        }
        .instrument(span)
        .await
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    /// Watch state transitions (e.g. to notice the broker hanging up)
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().is_connected()
    }

    pub async fn active_subscriptions(&self) -> usize {
        self.shared.feeds.lock().await.len()
    }

    /// Register interest in `pattern` and wait for the broker to confirm it.
    pub async fn subscribe(
        &self,
        pattern: &DestinationPattern,
        ack: AckMode,
    ) -> Result<Subscription, TailError> {
        let destination = pattern.to_string();
        if !self.is_connected() {
            return Err(TailError::subscribe(destination, "session is not connected"));
        }

        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed).to_string();
        let (sender, receiver) = mpsc::channel(self.options.feed_capacity.max(1));
        self.shared.feeds.lock().await.insert(
            id.clone(),
            FeedEntry {
                sender,
                pattern: pattern.clone(),
            },
        );

        let frame = Frame::new(Command::Subscribe)
            .header(headers::ID, id.as_str())
            .header(headers::DESTINATION, destination.as_str())
            .header(headers::ACK, ack.as_header());
        if let Err(failure) = self.request(frame, self.options.subscribe_timeout).await {
            self.shared.feeds.lock().await.remove(&id);
            warn!(destination = %destination, error = %failure, "Subscribe failed");
            return Err(TailError::subscribe(destination, failure));
        }

        info!(subscription_id = %id, destination = %destination, ack = %ack, "Subscribed");
        Ok(Subscription::new(
            id,
            pattern.clone(),
            receiver,
            self.shared.state.subscribe(),
        ))
    }

    /// Stop the feed and tell the broker. A subscription whose feed is
    /// already gone is left alone.
    pub async fn unsubscribe(&self, subscription: &mut Subscription) -> Result<(), SessionError> {
        subscription.close();
        let removed = self
            .shared
            .feeds
            .lock()
            .await
            .remove(subscription.id())
            .is_some();
        if !removed || !self.is_connected() {
            debug!(subscription_id = %subscription.id(), "Nothing to unsubscribe");
            return Ok(());
        }

        self.shared
            .send_frame(Frame::new(Command::Unsubscribe).header(headers::ID, subscription.id()))
            .await?;
        info!(subscription_id = %subscription.id(), "Unsubscribed");
        Ok(())
    }

    /// Send DISCONNECT (best-effort, bounded wait for its receipt), close the
    /// connection and stop the background tasks. Calling it again does nothing.
    pub async fn disconnect(&mut self) {
        if self.disconnected {
            debug!("Session already disconnected");
            return;
        }
        self.disconnected = true;

        let receipt = self.next_receipt_id(Command::Disconnect);
        let waiter = if self.is_connected() {
            self.shared.register_receipt(&receipt).await.ok()
        } else {
            None
        };

        // Feeds stop yielding from here on, including anything buffered
        self.shared.transition(SessionState::Disconnected);
        self.shared.feeds.lock().await.clear();

        if let Some(waiter) = waiter {
            let limit = self.options.disconnect_timeout;
            let frame = Frame::new(Command::Disconnect).header(headers::RECEIPT, receipt.as_str());
            let outcome = timeout(limit, async {
                self.shared.send_frame(frame).await?;
                waiter.await.unwrap_or(Err(SessionError::Closed))
            })
            .await;
            match outcome {
                Ok(Ok(())) => debug!("DISCONNECT acknowledged"),
                Ok(Err(e)) => debug!(error = %e, "DISCONNECT not acknowledged"),
                Err(_) => debug!(timeout = ?limit, "Timed out waiting for DISCONNECT receipt"),
            }
            self.shared.receipts.lock().await.remove(&receipt);
        }

        let sink = self.shared.writer.lock().await.take();
        if let Some(mut sink) = sink {
            if let Ok(Err(e)) = timeout(CLOSE_TIMEOUT, sink.close()).await {
                debug!(error = %e, "Error while closing connection");
            }
        }
        self.reader.abort();
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.abort();
        }
        info!("Session disconnected");
    }

    fn next_receipt_id(&self, command: Command) -> String {
        format!(
            "{}-{}",
            command.as_str().to_ascii_lowercase(),
            self.next_receipt.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Send `frame` with a receipt header and wait for the RECEIPT.
    async fn request(&self, frame: Frame, limit: Duration) -> Result<(), RequestFailure> {
        let receipt = self.next_receipt_id(frame.command);
        let waiter = self
            .shared
            .register_receipt(&receipt)
            .await
            .map_err(RequestFailure::Session)?;
        let frame = frame.header(headers::RECEIPT, receipt.as_str());

        let outcome = timeout(limit, async {
            self.shared.send_frame(frame).await?;
            waiter.await.unwrap_or_else(|_| {
                Err(SessionError::ConnectionLost(
                    "session ended before RECEIPT".to_string(),
                ))
            })
        })
        .await;
        self.shared.receipts.lock().await.remove(&receipt);

        match outcome {
            Ok(result) => result.map_err(RequestFailure::Session),
            Err(_) => Err(RequestFailure::TimedOut(limit)),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.abort();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("info", &self.info)
            .field("state", &*self.shared.state.borrow())
            .field("disconnected", &self.disconnected)
            .finish()
    }
}
