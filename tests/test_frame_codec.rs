//! Wire-level behavior of the STOMP codec
//!
//! Exercises the decoder against byte sequences a broker could produce:
//! split reads, heart-beats between frames, binary bodies and malformed input.

use bytes::BytesMut;
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};
use umb_tail::protocol::{headers, CodecError, Command, Frame, Packet, ProtocolError, StompCodec};

fn decode_all(codec: &mut StompCodec, bytes: &[u8]) -> Vec<Packet> {
    let mut buf = BytesMut::from(bytes);
    let mut packets = Vec::new();
    while let Some(packet) = codec.decode(&mut buf).unwrap() {
        packets.push(packet);
    }
    packets
}

fn frames(packets: Vec<Packet>) -> Vec<Frame> {
    packets
        .into_iter()
        .filter_map(|p| match p {
            Packet::Frame(frame) => Some(frame),
            Packet::Heartbeat => None,
        })
        .collect()
}

#[test]
fn test_message_frame_decodes() {
    let mut codec = StompCodec::default();
    let raw = b"MESSAGE\nsubscription:0\nmessage-id:ID:1\ndestination:/queue/test.a\n\nhello\0";
    let decoded = frames(decode_all(&mut codec, raw));

    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].command, Command::Message);
    assert_eq!(decoded[0].get(headers::DESTINATION), Some("/queue/test.a"));
    assert_eq!(&decoded[0].body[..], b"hello");
}

#[test]
fn test_heartbeats_between_frames() {
    let mut codec = StompCodec::default();
    let raw = b"\n\r\nRECEIPT\nreceipt-id:1\n\n\0\n\nRECEIPT\nreceipt-id:2\n\n\0";
    let packets = decode_all(&mut codec, raw);

    let heartbeats = packets
        .iter()
        .filter(|p| matches!(p, Packet::Heartbeat))
        .count();
    assert_eq!(heartbeats, 4);
    let decoded = frames(packets);
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[1].get(headers::RECEIPT_ID), Some("2"));
}

#[test]
fn test_frame_split_across_reads() {
    let mut codec = StompCodec::default();
    let raw: &[u8] = b"MESSAGE\nsubscription:0\nmessage-id:7\ndestination:/queue/q\ncontent-length:5\n\nab\0de\0";
    let mut buf = BytesMut::new();
    let mut decoded = Vec::new();

    for chunk in raw.chunks(3) {
        buf.extend_from_slice(chunk);
        while let Some(packet) = codec.decode(&mut buf).unwrap() {
            decoded.push(packet);
        }
    }

    let decoded = frames(decoded);
    assert_eq!(decoded.len(), 1);
    assert_eq!(&decoded[0].body[..], b"ab\0de");
}

#[test]
fn test_crlf_line_endings() {
    let mut codec = StompCodec::default();
    let raw = b"CONNECTED\r\nversion:1.2\r\nheart-beat:0,0\r\n\r\n\0";
    let decoded = frames(decode_all(&mut codec, raw));
    assert_eq!(decoded[0].command, Command::Connected);
    assert_eq!(decoded[0].get(headers::VERSION), Some("1.2"));
}

#[test]
fn test_escaped_header_values() {
    let mut codec = StompCodec::default();
    let raw = b"MESSAGE\nsubscription:0\nmessage-id:1\ndestination:/queue/q\nnote:a\\cb\\nc\\\\d\n\n\0";
    let decoded = frames(decode_all(&mut codec, raw));
    assert_eq!(decoded[0].get("note"), Some("a:b\nc\\d"));
}

#[test]
fn test_unknown_command_rejected() {
    let mut codec = StompCodec::default();
    let mut buf = BytesMut::from(&b"BOGUS\n\n\0"[..]);
    assert!(matches!(
        codec.decode(&mut buf),
        Err(CodecError::Protocol(ProtocolError::UnknownCommand(_)))
    ));
}

#[test]
fn test_wrong_content_length_rejected() {
    let mut codec = StompCodec::default();
    let mut buf = BytesMut::from(
        &b"MESSAGE\nsubscription:0\nmessage-id:1\ndestination:/q\ncontent-length:2\n\nabc\0"[..],
    );
    assert!(matches!(
        codec.decode(&mut buf),
        Err(CodecError::Protocol(ProtocolError::MissingNulTerminator))
    ));
}

#[test]
fn test_oversized_frame_rejected() {
    let mut codec = StompCodec::new(1024);
    let mut buf = BytesMut::from(
        &b"MESSAGE\nsubscription:0\nmessage-id:1\ndestination:/q\ncontent-length:999999\n\n"[..],
    );
    assert!(matches!(
        codec.decode(&mut buf),
        Err(CodecError::Protocol(ProtocolError::FrameTooLarge { .. }))
    ));
}

#[test]
fn test_content_length_near_usize_max_rejected() {
    let raw = format!("MESSAGE\ncontent-length:{}\n\n\0", usize::MAX);
    let mut codec = StompCodec::default();
    let mut buf = BytesMut::from(raw.as_bytes());
    assert!(matches!(
        codec.decode(&mut buf),
        Err(CodecError::Protocol(ProtocolError::FrameTooLarge { .. }))
    ));
}

#[test]
fn test_stomp_10_headers_keep_backslashes() {
    let mut codec = StompCodec::default();
    codec.set_version("1.0");
    let raw = b"MESSAGE\nsubscription:0\nmessage-id:1\ndestination:/queue/q\nJMSXGroupID:C:\\tmp\\t1\n\n\0";
    let decoded = frames(decode_all(&mut codec, raw));
    assert_eq!(decoded[0].get("JMSXGroupID"), Some("C:\\tmp\\t1"));

    let mut buf = BytesMut::new();
    let frame = Frame::new(Command::Subscribe).header(headers::DESTINATION, "/queue/a\\b");
    codec.encode(Packet::Frame(frame), &mut buf).unwrap();
    assert_eq!(&buf[..], b"SUBSCRIBE\ndestination:/queue/a\\b\n\n\0");
}

#[test]
fn test_headers_arriving_byte_by_byte() {
    let mut codec = StompCodec::default();
    let raw: &[u8] = b"MESSAGE\r\nsubscription:0\r\nmessage-id:9\r\ndestination:/queue/q\r\n\r\nok\0\n";
    let mut buf = BytesMut::new();
    let mut decoded = Vec::new();
    for byte in raw {
        buf.extend_from_slice(&[*byte]);
        while let Some(packet) = codec.decode(&mut buf).unwrap() {
            decoded.push(packet);
        }
    }
    assert_eq!(decoded.last(), Some(&Packet::Heartbeat));
    let decoded = frames(decoded);
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].get(headers::MESSAGE_ID), Some("9"));
    assert_eq!(&decoded[0].body[..], b"ok");
}

#[test]
fn test_truncated_frame_at_eof() {
    let mut codec = StompCodec::default();
    let mut buf = BytesMut::from(&b"MESSAGE\nsubscription:0\n"[..]);
    assert!(codec.decode(&mut buf).unwrap().is_none());
    assert!(matches!(
        codec.decode_eof(&mut buf),
        Err(CodecError::Protocol(ProtocolError::TruncatedFrame))
    ));
}

#[test]
fn test_clean_eof_after_heartbeat() {
    let mut codec = StompCodec::default();
    let mut buf = BytesMut::from(&b"\n"[..]);
    assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(Packet::Heartbeat));
    assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
}

#[test]
fn test_encoder_adds_content_length() {
    let mut codec = StompCodec::default();
    let mut buf = BytesMut::new();
    let frame = Frame::new(Command::Send)
        .header(headers::DESTINATION, "/queue/q")
        .with_body(&b"abc"[..]);
    codec.encode(Packet::Frame(frame), &mut buf).unwrap();
    assert_eq!(&buf[..], b"SEND\ndestination:/queue/q\ncontent-length:3\n\nabc\0");
}

proptest! {
    #[test]
    fn prop_binary_bodies_survive_the_codec(body in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let mut codec = StompCodec::default();
        let mut buf = BytesMut::new();
        let frame = Frame::new(Command::Message)
            .header(headers::SUBSCRIPTION, "0")
            .header(headers::MESSAGE_ID, "ID:prop")
            .header(headers::DESTINATION, "/queue/prop")
            .with_body(body.clone());
        codec.encode(Packet::Frame(frame), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap();
        match decoded {
            Some(Packet::Frame(frame)) => prop_assert_eq!(&frame.body[..], &body[..]),
            other => prop_assert!(false, "unexpected decode result: {:?}", other),
        }
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn prop_header_values_survive_escaping(value in "[ -~\n:\\\\]{0,64}") {
        let mut codec = StompCodec::default();
        let mut buf = BytesMut::new();
        let frame = Frame::new(Command::Message)
            .header(headers::SUBSCRIPTION, "0")
            .header(headers::MESSAGE_ID, "ID:prop")
            .header(headers::DESTINATION, "/queue/prop")
            .header("x-note", value.clone());
        codec.encode(Packet::Frame(frame), &mut buf).unwrap();

        match codec.decode(&mut buf).unwrap() {
            Some(Packet::Frame(frame)) => prop_assert_eq!(frame.get("x-note"), Some(value.as_str())),
            other => prop_assert!(false, "unexpected decode result: {:?}", other),
        }
    }
}
