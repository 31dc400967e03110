//! STOMP protocol session and subscription feeds
//!
//! [`Session::connect`] performs the handshake over any byte stream;
//! [`Session::subscribe`] returns a [`Subscription`] whose
//! [`Subscription::next`] yields messages in wire order.

pub mod client;
pub mod feed;
pub mod router;
pub mod state;

pub use client::{connect_frame, ByteStream, Session, SessionOptions, ACCEPT_VERSIONS};
pub use feed::{Message, Subscription};
pub use router::{route_frame, FrameRoute};
pub use state::{HeartBeat, SessionInfo, SessionState, StompCredentials};
