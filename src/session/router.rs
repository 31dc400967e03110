//! Classification of inbound frames (pure)

use super::feed::Message;
use crate::protocol::{headers, Command, Frame, ProtocolError};

/// Where an inbound frame goes once the session is established
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRoute {
    /// Deliver to the feed registered under the subscription id
    Deliver(Message),
    /// Complete the pending request waiting on this receipt id
    Receipt(String),
    /// Broker reported a fatal error
    BrokerError {
        message: String,
        receipt_id: Option<String>,
        details: String,
    },
}

/// Route one frame received after CONNECTED.
///
/// Anything other than MESSAGE, RECEIPT or ERROR means the stream is out of
/// step with the session and is reported as a protocol error.
pub fn route_frame(frame: Frame) -> Result<FrameRoute, ProtocolError> {
    match frame.command {
        Command::Message => Message::from_frame(frame).map(FrameRoute::Deliver),
        Command::Receipt => Ok(FrameRoute::Receipt(
            frame.require(headers::RECEIPT_ID)?.to_string(),
        )),
        Command::Error => {
            let details = frame.body_text();
            let message = match frame.get(headers::MESSAGE) {
                Some(message) => message.to_string(),
                None if !details.is_empty() => details.lines().next().unwrap_or_default().to_string(),
                None => "broker sent ERROR without a message".to_string(),
            };
            Ok(FrameRoute::BrokerError {
                message,
                receipt_id: frame.get(headers::RECEIPT_ID).map(str::to_string),
                details,
            })
        }
        other => Err(ProtocolError::UnexpectedFrame(other.to_string())),
    }
}
