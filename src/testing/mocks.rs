//! Mock implementations for testing
//!
//! Provides a scripted STOMP broker that speaks over any async stream, a
//! transport handing out pre-wired in-memory streams, and a recording sink,
//! so the session and delivery layers can be exercised without a real broker.

use crate::delivery::MessageSink;
use crate::error::TailError;
use crate::protocol::{headers, CodecError, Command, Frame, Packet, ProtocolError, StompCodec};
use crate::session::Message;
use crate::transport::{Endpoint, Transport};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{duplex, AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

const DUPLEX_CAPACITY: usize = 64 * 1024;

/// Broker side of a STOMP connection, driven step by step by a test
pub struct MockBroker<S> {
    framed: Framed<S, StompCodec>,
    next_message_id: AtomicU64,
}

impl MockBroker<DuplexStream> {
    /// An in-memory connection: the client end and a broker on the other side
    pub fn pair() -> (DuplexStream, Self) {
        let (client, server) = duplex(DUPLEX_CAPACITY);
        (client, Self::new(server))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> MockBroker<S> {
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, StompCodec::default()),
            next_message_id: AtomicU64::new(1),
        }
    }

    /// Next frame from the client, skipping heart-beats
    pub async fn next_frame(&mut self) -> Result<Frame, CodecError> {
        loop {
            match self.framed.next().await {
                Some(Ok(Packet::Heartbeat)) => continue,
                Some(Ok(Packet::Frame(frame))) => return Ok(frame),
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(CodecError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "client closed the connection",
                    )));
                }
            }
        }
    }

    /// Next frame, which must carry `command`
    pub async fn expect_frame(&mut self, command: Command) -> Result<Frame, CodecError> {
        let frame = self.next_frame().await?;
        if frame.command != command {
            return Err(ProtocolError::UnexpectedFrame(format!(
                "{} (expected {command})",
                frame.command
            ))
            .into());
        }
        Ok(frame)
    }

    pub async fn send_frame(&mut self, frame: Frame) -> Result<(), CodecError> {
        self.framed.send(Packet::Frame(frame)).await
    }

    pub async fn send_heartbeat(&mut self) -> Result<(), CodecError> {
        self.framed.send(Packet::Heartbeat).await
    }

    /// Write bytes verbatim, bypassing the encoder
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        SinkExt::<Packet>::flush(&mut self.framed).await?;
        let stream = self.framed.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Read CONNECT and answer CONNECTED without heart-beating
    pub async fn accept_connect(&mut self) -> Result<Frame, CodecError> {
        let connect = self.expect_frame(Command::Connect).await?;
        self.send_frame(
            Frame::new(Command::Connected)
                .header(headers::VERSION, "1.2")
                .header(headers::SESSION, "mock-session-1")
                .header(headers::SERVER, "MockBroker/1.0")
                .header(headers::HEART_BEAT, "0,0"),
        )
        .await?;
        Ok(connect)
    }

    /// Read CONNECT and answer with an ERROR frame
    pub async fn reject_connect(&mut self, message: &str) -> Result<Frame, CodecError> {
        let connect = self.expect_frame(Command::Connect).await?;
        self.send_error(message, None).await?;
        Ok(connect)
    }

    /// Read SUBSCRIBE and confirm its receipt
    pub async fn accept_subscribe(&mut self) -> Result<Frame, CodecError> {
        let subscribe = self.expect_frame(Command::Subscribe).await?;
        if let Some(receipt) = subscribe.get(headers::RECEIPT) {
            let receipt = receipt.to_string();
            self.send_receipt(&receipt).await?;
        }
        Ok(subscribe)
    }

    /// Read SUBSCRIBE and refuse it with an ERROR referencing its receipt
    pub async fn reject_subscribe(&mut self, message: &str) -> Result<Frame, CodecError> {
        let subscribe = self.expect_frame(Command::Subscribe).await?;
        let receipt = subscribe.get(headers::RECEIPT).map(str::to_string);
        self.send_error(message, receipt.as_deref()).await?;
        Ok(subscribe)
    }

    /// Read DISCONNECT and confirm its receipt
    pub async fn accept_disconnect(&mut self) -> Result<Frame, CodecError> {
        let disconnect = self.expect_frame(Command::Disconnect).await?;
        if let Some(receipt) = disconnect.get(headers::RECEIPT) {
            let receipt = receipt.to_string();
            self.send_receipt(&receipt).await?;
        }
        Ok(disconnect)
    }

    pub async fn send_receipt(&mut self, receipt_id: &str) -> Result<(), CodecError> {
        self.send_frame(Frame::new(Command::Receipt).header(headers::RECEIPT_ID, receipt_id))
            .await
    }

    pub async fn send_error(
        &mut self,
        message: &str,
        receipt_id: Option<&str>,
    ) -> Result<(), CodecError> {
        let mut frame = Frame::new(Command::Error).header(headers::MESSAGE, message);
        if let Some(receipt_id) = receipt_id {
            frame = frame.header(headers::RECEIPT_ID, receipt_id);
        }
        self.send_frame(frame.with_body(message.as_bytes().to_vec()))
            .await
    }

    /// Push a MESSAGE for `subscription`
    pub async fn send_message(
        &mut self,
        subscription: &str,
        destination: &str,
        body: impl Into<bytes::Bytes>,
    ) -> Result<(), CodecError> {
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        self.send_frame(
            Frame::new(Command::Message)
                .header(headers::SUBSCRIPTION, subscription)
                .header(headers::DESTINATION, destination)
                .header(headers::MESSAGE_ID, format!("ID:mock-{id}"))
                .with_body(body),
        )
        .await
    }

    /// Flush and shut down the write side, then drop the connection
    pub async fn close(mut self) -> Result<(), CodecError> {
        SinkExt::<Packet>::flush(&mut self.framed).await?;
        self.framed.get_mut().shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.framed.into_inner()
    }
}

/// Transport handing out queued in-memory streams; dial fails once empty
#[derive(Debug, Default)]
pub struct MockTransport {
    streams: Mutex<VecDeque<DuplexStream>>,
    attempts: AtomicU32,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a connection and return the broker end for it
    pub async fn push_connection(&self) -> MockBroker<DuplexStream> {
        let (client, broker) = MockBroker::pair();
        self.streams.lock().await.push_back(client);
        broker
    }

    /// Number of `establish` calls so far
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Stream = DuplexStream;

    async fn establish(&self, endpoint: &Endpoint) -> Result<DuplexStream, TailError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.streams
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| TailError::Dial {
                endpoint: endpoint.to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            })
    }
}

/// Sink that keeps every delivered message; clones share the record
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    messages: Arc<Mutex<Vec<Message>>>,
    fail_after: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with a sink error once `count` messages have been recorded
    pub fn failing_after(count: usize) -> Self {
        Self {
            fail_after: Some(count),
            ..Self::default()
        }
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.messages.lock().await.clone()
    }

    pub async fn bodies(&self) -> Vec<Vec<u8>> {
        self.messages
            .lock()
            .await
            .iter()
            .map(|m| m.body().to_vec())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn deliver(&mut self, message: &Message) -> Result<(), TailError> {
        let mut messages = self.messages.lock().await;
        if self.fail_after.is_some_and(|limit| messages.len() >= limit) {
            return Err(TailError::Sink(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "recording sink closed",
            )));
        }
        messages.push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{HeartBeat, Session, SessionOptions};
    use std::time::Duration;

    #[tokio::test]
    async fn test_mock_transport_runs_dry() {
        let transport = MockTransport::new();
        let _broker = transport.push_connection().await;
        let endpoint = Endpoint::new("mock", 61612);
        assert!(transport.establish(&endpoint).await.is_ok());
        assert!(matches!(
            transport.establish(&endpoint).await,
            Err(TailError::Dial { .. })
        ));
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test]
    async fn test_mock_broker_handshake() {
        let (client, mut broker) = MockBroker::pair();
        let server = tokio::spawn(async move { broker.accept_connect().await });

        let options = SessionOptions {
            heart_beat: HeartBeat::NONE,
            handshake_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let session = Session::connect(client, options).await.unwrap();
        assert_eq!(session.info().version, "1.2");

        let connect = server.await.unwrap().unwrap();
        assert_eq!(connect.get(headers::ACCEPT_VERSION), Some("1.0,1.1,1.2"));
    }

    #[tokio::test]
    async fn test_recording_sink_failure() {
        let mut sink = RecordingSink::failing_after(0);
        let message = Message::from_frame(
            Frame::new(Command::Message)
                .header(headers::SUBSCRIPTION, "0")
                .header(headers::DESTINATION, "/queue/a")
                .header(headers::MESSAGE_ID, "1"),
        )
        .unwrap();
        assert!(matches!(
            sink.deliver(&message).await,
            Err(TailError::Sink(_))
        ));
        assert!(sink.is_empty().await);
    }
}
