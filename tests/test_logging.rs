//! Tests for logging configuration and format parsing
//!
//! Covers the pure functions in the logging module that turn environment
//! values and `-v` flags into a subscriber configuration.

use tracing::Level;
use umb_tail::observability::logging::{level_for_verbosity, parse_level, LogFormat};
use umb_tail::observability::{init_logging, init_default_logging};

#[test]
fn test_log_format_parse_is_case_insensitive() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
    assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("COMPACT"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_compact() {
    // Stdout carries message bodies, so the terminal-friendly format is the fallback
    for input in ["invalid", "", "xml", "123"] {
        assert_eq!(LogFormat::parse(input), LogFormat::Compact, "input: {input:?}");
    }
}

#[test]
fn test_log_level_parsing() {
    assert_eq!(parse_level("error"), Level::ERROR);
    assert_eq!(parse_level("WARN"), Level::WARN);
    assert_eq!(parse_level("debug"), Level::DEBUG);
    assert_eq!(parse_level("verbose"), Level::INFO);
}

#[test]
fn test_verbose_flags_raise_level() {
    assert_eq!(level_for_verbosity(Level::WARN, 0), Level::WARN);
    assert_eq!(level_for_verbosity(Level::WARN, 1), Level::DEBUG);
    assert_eq!(level_for_verbosity(Level::ERROR, 3), Level::TRACE);
    assert_eq!(level_for_verbosity(Level::DEBUG, 1), Level::DEBUG);
}

#[test]
fn test_repeated_initialization_is_harmless() {
    init_logging(Level::INFO, LogFormat::Compact, false);
    init_logging(Level::DEBUG, LogFormat::Json, true);
    init_default_logging(2);

    let span = umb_tail::session_span!(host = "localhost");
    let _guard = span.enter();
    tracing::info!("logging initialized");
}
