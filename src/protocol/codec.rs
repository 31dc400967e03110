//! Byte-level STOMP framing for `tokio_util::codec`
//!
//! ```text
//! frame   = command EOL *( header EOL ) EOL *OCTET NUL *( EOL )
//! EOL     = [CR] LF
//! ```
//!
//! Bare EOLs between frames are heart-beats and are surfaced as
//! [`Packet::Heartbeat`] so the session can track broker liveness.

use super::error::ProtocolError;
use super::frame::{escape_header, headers, unescape_header, Command, Frame};
use bytes::{Buf, BufMut, BytesMut};
use std::io;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Default ceiling for a single frame (headers plus body)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Unit of traffic on a STOMP connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Heartbeat,
    Frame(Frame),
}

impl From<Frame> for Packet {
    fn from(frame: Frame) -> Self {
        Packet::Frame(frame)
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Headers already parsed, waiting for the body to arrive
#[derive(Debug)]
struct PendingBody {
    frame: Frame,
    body_start: usize,
    /// Offset of the NUL terminator when `content-length` was given
    nul_at: Option<usize>,
    scanned: usize,
}

#[derive(Debug)]
pub struct StompCodec {
    max_frame_bytes: usize,
    escape_headers: bool,
    /// Bytes of an incomplete header block already checked
    header_scanned: usize,
    pending: Option<PendingBody>,
}

impl StompCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            escape_headers: true,
            header_scanned: 0,
            pending: None,
        }
    }

    /// Adopt the protocol version agreed in CONNECTED.
    ///
    /// STOMP 1.0 has no header escaping, so backslashes pass through verbatim
    /// in both directions.
    pub fn set_version(&mut self, version: &str) {
        self.escape_headers = version.trim() != "1.0";
    }

    pub fn escapes_headers(&self) -> bool {
        self.escape_headers
    }

    fn too_large(&self, size: usize) -> ProtocolError {
        ProtocolError::FrameTooLarge {
            size,
            max: self.max_frame_bytes,
        }
    }

    fn decode_head(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        match src.first() {
            None => return Ok(None),
            Some(b'\n') => {
                src.advance(1);
                return Ok(Some(Packet::Heartbeat));
            }
            Some(b'\r') => match src.get(1) {
                None => return Ok(None),
                Some(b'\n') => {
                    src.advance(2);
                    return Ok(Some(Packet::Heartbeat));
                }
                // A stray CR is rejected by the command parse below
                Some(_) => {}
            },
            Some(_) => {}
        }

        let scan_from = std::mem::take(&mut self.header_scanned);
        let Some((header_end, body_start)) = find_header_end(src, scan_from)? else {
            if src.len() > self.max_frame_bytes {
                return Err(self.too_large(src.len()).into());
            }
            // The last two bytes may start a blank line still arriving
            self.header_scanned = src.len().saturating_sub(2);
            return Ok(None);
        };

        let frame = parse_head(&src[..header_end], self.escape_headers)?;
        let nul_at = match frame.get(headers::CONTENT_LENGTH) {
            Some(raw) => {
                let length: usize = raw
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::InvalidContentLength(raw.to_string()))?;
                let nul_at = body_start
                    .checked_add(length)
                    .filter(|end| *end <= self.max_frame_bytes)
                    .ok_or_else(|| self.too_large(body_start.saturating_add(length)))?;
                Some(nul_at)
            }
            None => None,
        };

        self.pending = Some(PendingBody {
            frame,
            body_start,
            nul_at,
            scanned: body_start,
        });
        Ok(None)
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Decoder for StompCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        if self.pending.is_none() {
            if let Some(packet) = self.decode_head(src)? {
                return Ok(Some(packet));
            }
        }

        let Some((declared_nul, scanned)) = self.pending.as_ref().map(|p| (p.nul_at, p.scanned))
        else {
            return Ok(None);
        };

        let nul_at = match declared_nul {
            Some(nul_at) => {
                if src.len() <= nul_at {
                    src.reserve(nul_at - src.len() + 1);
                    return Ok(None);
                }
                if src[nul_at] != 0 {
                    self.pending = None;
                    return Err(ProtocolError::MissingNulTerminator.into());
                }
                nul_at
            }
            None => match src[scanned..].iter().position(|b| *b == 0) {
                Some(offset) => scanned + offset,
                None => {
                    if src.len() > self.max_frame_bytes {
                        self.pending = None;
                        return Err(self.too_large(src.len()).into());
                    }
                    if let Some(pending) = self.pending.as_mut() {
                        pending.scanned = src.len();
                    }
                    return Ok(None);
                }
            },
        };

        let Some(pending) = self.pending.take() else {
            return Ok(None);
        };
        let mut raw = src.split_to(nul_at + 1);
        raw.truncate(nul_at);
        let mut frame = pending.frame;
        frame.body = raw.split_off(pending.body_start).freeze();
        Ok(Some(Packet::Frame(frame)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        if let Some(packet) = self.decode(buf)? {
            return Ok(Some(packet));
        }
        let only_line_endings = buf.iter().all(|b| matches!(b, b'\r' | b'\n'));
        let mid_frame = self.pending.take().is_some() || !only_line_endings;
        self.header_scanned = 0;
        buf.clear();
        if mid_frame {
            return Err(ProtocolError::TruncatedFrame.into());
        }
        Ok(None)
    }
}

impl Encoder<Packet> for StompCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), CodecError> {
        let frame = match item {
            Packet::Heartbeat => {
                dst.put_u8(b'\n');
                return Ok(());
            }
            Packet::Frame(frame) => frame,
        };

        let escape = self.escape_headers && frame.command.escapes_headers();
        dst.put_slice(frame.command.as_str().as_bytes());
        dst.put_u8(b'\n');
        for (name, value) in &frame.headers {
            if escape {
                dst.put_slice(escape_header(name).as_bytes());
                dst.put_u8(b':');
                dst.put_slice(escape_header(value).as_bytes());
            } else {
                if name.contains(&[':', '\n', '\r'][..]) || value.contains(&['\n', '\r'][..]) {
                    return Err(ProtocolError::MalformedHeader(format!("{name}:{value}")).into());
                }
                dst.put_slice(name.as_bytes());
                dst.put_u8(b':');
                dst.put_slice(value.as_bytes());
            }
            dst.put_u8(b'\n');
        }
        if !frame.body.is_empty() && frame.get(headers::CONTENT_LENGTH).is_none() {
            dst.put_slice(format!("{}:{}\n", headers::CONTENT_LENGTH, frame.body.len()).as_bytes());
        }
        dst.put_u8(b'\n');
        dst.put_slice(&frame.body);
        dst.put_u8(0);
        Ok(())
    }
}

/// Locate the blank line ending the header block.
///
/// Returns `(header_end, body_start)`. A NUL before the blank line means the
/// terminator is missing. Bytes before `from` were checked by an earlier call.
fn find_header_end(src: &[u8], from: usize) -> Result<Option<(usize, usize)>, ProtocolError> {
    let from = from.min(src.len());
    for (i, byte) in src.iter().enumerate().skip(from) {
        match byte {
            0 => return Err(ProtocolError::MissingHeaderTerminator),
            b'\n' => match src.get(i + 1) {
                None => return Ok(None),
                Some(b'\n') => return Ok(Some((i, i + 2))),
                Some(b'\r') => match src.get(i + 2) {
                    None => return Ok(None),
                    Some(b'\n') => return Ok(Some((i, i + 3))),
                    Some(_) => {}
                },
                Some(_) => {}
            },
            _ => {}
        }
    }
    Ok(None)
}

fn parse_head(head: &[u8], escape_headers: bool) -> Result<Frame, ProtocolError> {
    let text = std::str::from_utf8(head).map_err(|_| ProtocolError::InvalidUtf8)?;
    let mut lines = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line));

    let command = Command::parse(lines.next().unwrap_or_default())?;
    let escape = escape_headers && command.escapes_headers();
    let mut frame = Frame::new(command);
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Err(ProtocolError::MalformedHeader(line.to_string()));
        };
        if escape {
            frame
                .headers
                .push((unescape_header(name)?, unescape_header(value)?));
        } else {
            frame.headers.push((name.to_string(), value.to_string()));
        }
    }
    Ok(frame)
}
