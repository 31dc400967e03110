//! Session state and handshake negotiation (pure functions)

use crate::error::SessionError;
use crate::protocol::ProtocolError;
use std::fmt;
use std::time::Duration;
use zeroize::Zeroizing;

/// Lifecycle of one protocol session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake complete, frames flowing
    Connected,
    /// The broker or network closed the stream without a protocol fault
    Ended,
    /// The stream was torn down by a fault
    Failed(SessionError),
    /// `disconnect` was called
    Disconnected,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_connected()
    }
}

/// Heart-beat intervals in one direction pair; zero means "none"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub send: Duration,
    pub receive: Duration,
}

impl HeartBeat {
    pub const NONE: HeartBeat = HeartBeat {
        send: Duration::ZERO,
        receive: Duration::ZERO,
    };

    pub fn to_header(&self) -> String {
        format!("{},{}", self.send.as_millis(), self.receive.as_millis())
    }

    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedHeader(format!("heart-beat:{raw}"));
        let (send, receive) = raw.split_once(',').ok_or_else(malformed)?;
        let send: u64 = send.trim().parse().map_err(|_| malformed())?;
        let receive: u64 = receive.trim().parse().map_err(|_| malformed())?;
        Ok(Self {
            send: Duration::from_millis(send),
            receive: Duration::from_millis(receive),
        })
    }

    /// Combine what the client offered with what the broker answered.
    ///
    /// The result's `send` is how often the client must write, its
    /// `receive` how often the broker has promised to.
    pub fn negotiate(client: HeartBeat, broker: HeartBeat) -> HeartBeat {
        HeartBeat {
            send: pair_interval(client.send, broker.receive),
            receive: pair_interval(broker.send, client.receive),
        }
    }
}

fn pair_interval(offered: Duration, wanted: Duration) -> Duration {
    if offered.is_zero() || wanted.is_zero() {
        Duration::ZERO
    } else {
        offered.max(wanted)
    }
}

/// What the broker told us in CONNECTED
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub version: String,
    pub session_id: Option<String>,
    pub server: Option<String>,
    /// Negotiated intervals
    pub heart_beat: HeartBeat,
}

/// STOMP login and passcode
#[derive(Clone)]
pub struct StompCredentials {
    login: String,
    passcode: Zeroizing<String>,
}

impl StompCredentials {
    pub fn new(login: impl Into<String>, passcode: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            passcode: Zeroizing::new(passcode.into()),
        }
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn passcode(&self) -> &str {
        &self.passcode
    }
}

impl fmt::Debug for StompCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StompCredentials")
            .field("login", &self.login)
            .field("passcode", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hb(send: u64, receive: u64) -> HeartBeat {
        HeartBeat {
            send: Duration::from_millis(send),
            receive: Duration::from_millis(receive),
        }
    }

    #[test]
    fn test_negotiate_takes_larger_interval() {
        let negotiated = HeartBeat::negotiate(hb(10_000, 10_000), hb(5_000, 30_000));
        assert_eq!(negotiated, hb(30_000, 10_000));
    }

    #[test]
    fn test_negotiate_zero_disables_direction() {
        assert_eq!(HeartBeat::negotiate(hb(0, 10_000), hb(5_000, 5_000)), hb(0, 10_000));
        assert_eq!(HeartBeat::negotiate(hb(10_000, 10_000), hb(0, 0)), HeartBeat::NONE);
        assert_eq!(HeartBeat::negotiate(HeartBeat::NONE, hb(1_000, 1_000)), HeartBeat::NONE);
    }

    #[test]
    fn test_header_format_and_parse() {
        assert_eq!(hb(60_000, 0).to_header(), "60000,0");
        assert_eq!(HeartBeat::parse("0, 30000").unwrap(), hb(0, 30_000));
        assert!(HeartBeat::parse("fast").is_err());
        assert!(HeartBeat::parse("1,x").is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_passcode() {
        let credentials = StompCredentials::new("alice", "hunter2");
        let debug = format!("{credentials:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
        assert_eq!(credentials.passcode(), "hunter2");
    }

    #[test]
    fn test_state_predicates() {
        assert!(SessionState::Connected.is_connected());
        assert!(SessionState::Ended.is_terminal());
        assert!(SessionState::Failed(SessionError::Closed).is_terminal());
    }
}
