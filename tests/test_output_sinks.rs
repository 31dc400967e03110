//! Output sinks write exactly what downstream tools expect

use tokio_test::io::Builder;
use umb_tail::delivery::{MessageSink, OutputFormat, WriterSink};
use umb_tail::error::TailError;
use umb_tail::protocol::{headers, Command, Frame};
use umb_tail::session::Message;

fn message(body: &'static [u8]) -> Message {
    Message::from_frame(
        Frame::new(Command::Message)
            .header(headers::SUBSCRIPTION, "0")
            .header(headers::DESTINATION, "/topic/VirtualTopic.eng.ci")
            .header(headers::MESSAGE_ID, "ID:umb-1")
            .header(headers::CONTENT_TYPE, "application/json")
            .with_body(body),
    )
    .unwrap()
}

#[tokio::test]
async fn test_raw_sink_writes_body_then_newline() {
    let writer = Builder::new().write(b"{\"ok\":true}").write(b"\n").build();
    let mut sink = WriterSink::raw(writer);
    tokio_test::assert_ok!(sink.deliver(&message(b"{\"ok\":true}")).await);
}

#[tokio::test]
async fn test_raw_sink_keeps_binary_bodies_intact() {
    let writer = Builder::new().write(&[0xff, 0x00, 0xfe]).write(b"\n").build();
    let mut sink = WriterSink::raw(writer);
    tokio_test::assert_ok!(sink.deliver(&message(&[0xff, 0x00, 0xfe])).await);
}

#[tokio::test]
async fn test_empty_body_prints_empty_line() {
    let writer = Builder::new().write(b"\n").build();
    let mut sink = WriterSink::raw(writer);
    tokio_test::assert_ok!(sink.deliver(&message(b"")).await);
}

#[tokio::test]
async fn test_closed_output_is_a_sink_error() {
    let writer = Builder::new()
        .write_error(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        .build();
    let mut sink = WriterSink::raw(writer);
    let err = sink.deliver(&message(b"lost")).await.unwrap_err();
    assert!(matches!(err, TailError::Sink(_)));
    assert!(err.diagnostic().starts_with("stage=delivery"));
}

#[tokio::test]
async fn test_json_sink_includes_headers() {
    let mut sink = WriterSink::json(Vec::new());
    sink.deliver(&message(b"payload")).await.unwrap();
    sink.deliver(&message(b"second")).await.unwrap();

    let output = String::from_utf8(sink.into_inner()).unwrap();
    let lines: Vec<serde_json::Value> = output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["message_id"], "ID:umb-1");
    assert_eq!(lines[0]["headers"]["content-type"], "application/json");
    assert_eq!(lines[1]["body"], "second");
}

#[test]
fn test_output_format_parsing() {
    assert_eq!("RAW".parse::<OutputFormat>(), Ok(OutputFormat::Raw));
    assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
    assert_eq!("log".parse::<OutputFormat>(), Ok(OutputFormat::Log));
    assert!("yaml".parse::<OutputFormat>().is_err());
    assert_eq!(OutputFormat::Json.to_string(), "json");
}
