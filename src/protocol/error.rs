//! Wire grammar violations
//!
//! Any of these is fatal to the connection it was read from: the stream
//! cannot be resynchronized once a frame boundary is lost.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("frame terminated before the blank line ending its headers")]
    MissingHeaderTerminator,
    #[error("malformed header line {0:?}")]
    MalformedHeader(String),
    #[error("undefined header escape sequence {0}")]
    InvalidEscape(String),
    #[error("frame headers are not valid UTF-8")]
    InvalidUtf8,
    #[error("invalid content-length {0:?}")]
    InvalidContentLength(String),
    #[error("frame body not followed by NUL terminator")]
    MissingNulTerminator,
    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },
    #[error("connection closed in the middle of a frame")]
    TruncatedFrame,
    #[error("{command} frame is missing required header {header:?}")]
    MissingHeader {
        command: &'static str,
        header: &'static str,
    },
    #[error("unexpected {0} frame")]
    UnexpectedFrame(String),
}
