//! Message sinks
//!
//! A sink receives each delivered [`Message`] in order. Bodies are opaque;
//! the raw sink writes them byte-for-byte.

use crate::error::TailError;
use crate::session::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::info;

/// How delivered messages are written out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Body bytes followed by a newline
    #[default]
    Raw,
    /// One JSON object per line
    Json,
    /// A log event per message
    Log,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(OutputFormat::Raw),
            "json" => Ok(OutputFormat::Json),
            "log" => Ok(OutputFormat::Log),
            other => Err(format!(
                "unknown output format '{other}', expected raw, json or log"
            )),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Raw => "raw",
            OutputFormat::Json => "json",
            OutputFormat::Log => "log",
        })
    }
}

/// Consumer of delivered messages
#[async_trait]
pub trait MessageSink: Send {
    async fn deliver(&mut self, message: &Message) -> Result<(), TailError>;
}

/// JSON line shape for [`OutputFormat::Json`]
#[derive(Debug, Serialize)]
pub struct MessageRecord<'a> {
    pub destination: &'a str,
    pub message_id: &'a str,
    pub subscription: &'a str,
    pub headers: BTreeMap<&'a str, &'a str>,
    pub body: String,
}

impl<'a> From<&'a Message> for MessageRecord<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            destination: message.destination(),
            message_id: message.message_id(),
            subscription: message.subscription(),
            headers: message
                .headers()
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
            body: String::from_utf8_lossy(message.body()).into_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Encoding {
    Raw,
    Json,
}

/// Writes each message to an async writer
pub struct WriterSink<W> {
    writer: W,
    encoding: Encoding,
}

impl<W: AsyncWrite + Unpin + Send> WriterSink<W> {
    pub fn raw(writer: W) -> Self {
        Self {
            writer,
            encoding: Encoding::Raw,
        }
    }

    pub fn json(writer: W) -> Self {
        Self {
            writer,
            encoding: Encoding::Json,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageSink for WriterSink<W> {
    async fn deliver(&mut self, message: &Message) -> Result<(), TailError> {
        match self.encoding {
            Encoding::Raw => {
                self.writer
                    .write_all(message.body())
                    .await
                    .map_err(TailError::Sink)?;
            }
            Encoding::Json => {
                let line = serde_json::to_vec(&MessageRecord::from(message))
                    .map_err(|e| TailError::Sink(e.into()))?;
                self.writer.write_all(&line).await.map_err(TailError::Sink)?;
            }
        }
        self.writer.write_all(b"\n").await.map_err(TailError::Sink)?;
        self.writer.flush().await.map_err(TailError::Sink)
    }
}

/// Emits one info event per message
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl MessageSink for LogSink {
    async fn deliver(&mut self, message: &Message) -> Result<(), TailError> {
        info!(
            destination = %message.destination(),
            message_id = %message.message_id(),
            body = %String::from_utf8_lossy(message.body()),
            "Received message"
        );
        Ok(())
    }
}

/// Sink writing to stdout in the given format
pub fn stdout_sink(format: OutputFormat) -> Box<dyn MessageSink> {
    match format {
        OutputFormat::Raw => Box::new(WriterSink::raw(tokio::io::stdout())),
        OutputFormat::Json => Box::new(WriterSink::json(tokio::io::stdout())),
        OutputFormat::Log => Box::new(LogSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{headers, Command, Frame};

    fn message(body: &'static [u8]) -> Message {
        Message::from_frame(
            Frame::new(Command::Message)
                .header(headers::SUBSCRIPTION, "0")
                .header(headers::DESTINATION, "/queue/test.a")
                .header(headers::MESSAGE_ID, "ID:1")
                .with_body(body),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_raw_sink_writes_body_bytes() {
        let mut sink = WriterSink::raw(Vec::new());
        sink.deliver(&message(b"\x00\xffbinary")).await.unwrap();
        sink.deliver(&message(b"")).await.unwrap();
        assert_eq!(sink.into_inner(), b"\x00\xffbinary\n\n");
    }

    #[tokio::test]
    async fn test_json_sink_writes_one_object_per_line() {
        let mut sink = WriterSink::json(Vec::new());
        sink.deliver(&message(b"{\"build\":1}")).await.unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert!(out.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(value["destination"], "/queue/test.a");
        assert_eq!(value["message_id"], "ID:1");
        assert_eq!(value["body"], "{\"build\":1}");
        assert_eq!(value["headers"]["subscription"], "0");
    }

    #[tokio::test]
    async fn test_log_sink_accepts_messages() {
        let mut sink = LogSink;
        assert!(sink.deliver(&message(b"hello")).await.is_ok());
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("RAW".parse::<OutputFormat>().unwrap(), OutputFormat::Raw);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("log".parse::<OutputFormat>().unwrap(), OutputFormat::Log);
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }
}
