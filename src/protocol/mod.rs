//! STOMP wire protocol
//!
//! Frame model, byte-level codec and destination addressing. Nothing in this
//! module performs I/O; the session layer drives the codec over a stream.

pub mod codec;
pub mod destination;
pub mod error;
pub mod frame;

pub use codec::{CodecError, Packet, StompCodec, DEFAULT_MAX_FRAME_BYTES};
pub use destination::{AckMode, DestinationError, DestinationPattern};
pub use error::ProtocolError;
pub use frame::{headers, Command, Frame};
