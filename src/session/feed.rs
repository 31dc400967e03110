//! Subscription feed: received messages handed to the consumer in order

use super::state::SessionState;
use crate::error::SessionError;
use crate::protocol::{headers, DestinationPattern, Frame, ProtocolError};
use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::{mpsc, watch};

/// One received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    destination: String,
    message_id: String,
    subscription: String,
    headers: HashMap<String, String>,
    body: Bytes,
}

impl Message {
    /// Build from a MESSAGE frame. The first occurrence of a repeated header wins.
    pub fn from_frame(frame: Frame) -> Result<Self, ProtocolError> {
        let destination = frame.require(headers::DESTINATION)?.to_string();
        let message_id = frame.require(headers::MESSAGE_ID)?.to_string();
        let subscription = frame.require(headers::SUBSCRIPTION)?.to_string();

        let mut map = HashMap::with_capacity(frame.headers.len());
        for (name, value) in frame.headers {
            map.entry(name).or_insert(value);
        }

        Ok(Self {
            destination,
            message_id,
            subscription,
            headers: map,
            body: frame.body,
        })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(headers::CONTENT_TYPE)
    }

    /// Body bytes exactly as received
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }
}

/// Consumer side of one subscription
///
/// Messages arrive in wire order through a bounded queue. Once the owning
/// session is disconnected, reads fail with [`SessionError::Closed`] instead
/// of returning anything still buffered.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    pattern: DestinationPattern,
    receiver: mpsc::Receiver<Message>,
    state: watch::Receiver<SessionState>,
    finished: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        pattern: DestinationPattern,
        receiver: mpsc::Receiver<Message>,
        state: watch::Receiver<SessionState>,
    ) -> Self {
        Self {
            id,
            pattern,
            receiver,
            state,
            finished: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pattern(&self) -> &DestinationPattern {
        &self.pattern
    }

    /// Wait for the next message.
    ///
    /// `Ok(Some(_))` is a message (possibly with an empty body), `Ok(None)`
    /// means the broker closed the stream normally, `Err(_)` carries the
    /// reason the session failed. After `Ok(None)` or `Err(_)` every further
    /// call returns `Err(SessionError::Closed)`.
    pub async fn next(&mut self) -> Result<Option<Message>, SessionError> {
        if self.finished || *self.state.borrow() == SessionState::Disconnected {
            self.finished = true;
            return Err(SessionError::Closed);
        }

        match self.receiver.recv().await {
            Some(message) if *self.state.borrow() != SessionState::Disconnected => {
                Ok(Some(message))
            }
            Some(_) => {
                self.finished = true;
                Err(SessionError::Closed)
            }
            None => {
                self.finished = true;
                let state = self.state.borrow().clone();
                match state {
                    SessionState::Failed(error) => Err(error),
                    SessionState::Ended => Ok(None),
                    SessionState::Connected | SessionState::Disconnected => {
                        Err(SessionError::Closed)
                    }
                }
            }
        }
    }

    /// Stop accepting messages; later reads fail with `Closed`
    pub(crate) fn close(&mut self) {
        self.finished = true;
        self.receiver.close();
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
