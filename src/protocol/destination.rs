//! Destination patterns and acknowledgment modes
//!
//! Destinations follow the ActiveMQ addressing grammar: a type prefix such as
//! `/queue/` or `/topic/` followed by a dot-separated name. Within the name,
//! `*` matches exactly one segment and `>` (final segment only) matches zero
//! or more trailing segments.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const ANY_SEGMENT: &str = "*";
const ANY_TAIL: &str = ">";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationPattern {
    raw: String,
    prefix: String,
    segments: Vec<String>,
}

impl DestinationPattern {
    pub fn parse(raw: &str) -> Result<Self, DestinationError> {
        if raw.trim().is_empty() {
            return Err(DestinationError::Empty);
        }
        if raw.chars().any(char::is_control) {
            return Err(DestinationError::ControlCharacter(raw.to_string()));
        }

        let (prefix, name) = split_prefix(raw);
        if name.is_empty() {
            return Err(DestinationError::EmptySegment(raw.to_string()));
        }

        let segments: Vec<String> = name.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(DestinationError::EmptySegment(raw.to_string()));
        }
        if let Some(pos) = segments.iter().position(|s| s == ANY_TAIL) {
            if pos != segments.len() - 1 {
                return Err(DestinationError::MisplacedTailWildcard(raw.to_string()));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            prefix: prefix.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_wildcard(&self) -> bool {
        self.segments
            .iter()
            .any(|s| s == ANY_SEGMENT || s == ANY_TAIL)
    }

    /// Whether a concrete destination falls under this pattern
    pub fn matches(&self, destination: &str) -> bool {
        let (prefix, name) = split_prefix(destination);
        if prefix != self.prefix {
            return false;
        }
        let name: Vec<&str> = name.split('.').collect();
        match_segments(&self.segments, &name)
    }
}

impl FromStr for DestinationPattern {
    type Err = DestinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DestinationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_prefix(raw: &str) -> (&str, &str) {
    match raw.rfind('/') {
        Some(idx) => raw.split_at(idx + 1),
        None => ("", raw),
    }
}

fn match_segments(pattern: &[String], name: &[&str]) -> bool {
    match pattern.split_first() {
        None => name.is_empty(),
        Some((head, _)) if head == ANY_TAIL => true,
        Some((head, rest)) => match name.split_first() {
            Some((segment, name_rest)) => {
                (head == ANY_SEGMENT || head == segment) && match_segments(rest, name_rest)
            }
            None => false,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DestinationError {
    #[error("destination cannot be empty")]
    Empty,
    #[error("destination {0:?} contains an empty segment")]
    EmptySegment(String),
    #[error("destination {0:?} uses '>' before the final segment")]
    MisplacedTailWildcard(String),
    #[error("destination {0:?} contains control characters")]
    ControlCharacter(String),
}

/// When the broker considers a delivered message consumed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckMode {
    /// Acknowledged by the broker as soon as it is sent
    #[default]
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_header(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_header())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn literal_pattern_matches_itself(
            segments in proptest::collection::vec("[A-Za-z0-9_-]{1,8}", 1..6)
        ) {
            let destination = format!("/queue/{}", segments.join("."));
            let pattern = DestinationPattern::parse(&destination).unwrap();
            prop_assert!(pattern.matches(&destination));
            prop_assert!(!pattern.is_wildcard());
        }

        #[test]
        fn tail_wildcard_matches_any_extension(
            extra in proptest::collection::vec("[a-z]{1,6}", 0..4)
        ) {
            let pattern = DestinationPattern::parse("/topic/eng.>").unwrap();
            let mut name = vec!["eng".to_string()];
            name.extend(extra);
            let destination = format!("/topic/{}", name.join("."));
            prop_assert!(pattern.matches(&destination));
        }
    }

    #[test]
    fn test_virtual_topic_consumer_pattern() {
        let pattern = DestinationPattern::parse(
            "/queue/Consumer.client-rbean.go-test.VirtualTopic.eng.>",
        )
        .unwrap();
        assert!(pattern.is_wildcard());
        assert!(pattern.matches(
            "/queue/Consumer.client-rbean.go-test.VirtualTopic.eng.brew.build.complete"
        ));
        assert!(!pattern.matches("/topic/Consumer.client-rbean.go-test.VirtualTopic.eng.x"));
        assert!(!pattern.matches("/queue/Consumer.other.go-test.VirtualTopic.eng.x"));
    }

    #[test]
    fn test_single_segment_wildcard() {
        let pattern = DestinationPattern::parse("/queue/test.*.done").unwrap();
        assert!(pattern.matches("/queue/test.a.done"));
        assert!(!pattern.matches("/queue/test.a.b.done"));
        assert!(!pattern.matches("/queue/test.done"));
    }

    #[test]
    fn test_tail_wildcard_matches_bare_prefix() {
        let pattern = DestinationPattern::parse("/queue/test.>").unwrap();
        assert!(pattern.matches("/queue/test"));
        assert!(pattern.matches("/queue/test.one"));
        assert!(pattern.matches("/queue/test.one.two"));
        assert!(!pattern.matches("/queue/testing"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert_eq!(DestinationPattern::parse(""), Err(DestinationError::Empty));
        assert!(matches!(
            DestinationPattern::parse("/queue/a..b"),
            Err(DestinationError::EmptySegment(_))
        ));
        assert!(matches!(
            DestinationPattern::parse("/queue/"),
            Err(DestinationError::EmptySegment(_))
        ));
        assert!(matches!(
            DestinationPattern::parse("/queue/a.>.b"),
            Err(DestinationError::MisplacedTailWildcard(_))
        ));
        assert!(matches!(
            DestinationPattern::parse("/queue/a\nb"),
            Err(DestinationError::ControlCharacter(_))
        ));
    }

    #[test]
    fn test_ack_mode_headers() {
        assert_eq!(AckMode::default(), AckMode::Auto);
        assert_eq!(AckMode::Auto.as_header(), "auto");
        assert_eq!(AckMode::ClientIndividual.to_string(), "client-individual");
        let parsed: AckMode = serde_json::from_str("\"client\"").unwrap();
        assert_eq!(parsed, AckMode::Client);
    }
}
