//! Crate-wide error taxonomy (spec §7).
//!
//! Only construction and parsing surface errors to their caller. Everything on the hot
//! path (transport failures, overflow, lookup-miss) recovers locally via counters and is
//! never returned from `submit`; see [`crate::submit`] for where those counters live.

use thiserror::Error;

/// Errors raised while decoding a [`crate::value::Value`] or [`crate::event::Event`]
/// from its wire representation (spec §6.1, §7 "Decode-invalid").
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer ended before the expected field was fully read")]
    ShortBuffer,
    #[error("value kind tag is not recognized")]
    BadKind,
    #[error("length field describes an impossible or oversized value")]
    BadLength,
}

/// Errors raised while tokenizing or parsing a filter expression (spec §4.3, §7
/// "Parse-invalid").
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("filter source exceeds the maximum query length")]
    QueryTooLong,
    #[error("unterminated quoted literal starting at byte {0}")]
    UnterminatedQuote(usize),
    #[error("unexpected token at byte {0}")]
    UnexpectedToken(usize),
    #[error("expected closing ')' at byte {0}")]
    ExpectedCloseParen(usize),
    #[error("unknown function {0:?}")]
    UnknownFunction(String),
    #[error("a user environment cannot override the built-in function {0:?}")]
    ReservedFunctionName(String),
    #[error("empty program did not end with a boolean value")]
    NotBoolean,
}

/// Errors raised while constructing a pipeline from a [`crate::pipeline::Config`] (spec
/// §4.7, §7 "Config-invalid").
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("submitter config is missing its discriminant \"kind\" field")]
    MissingKind,
    #[error("unknown submitter kind {0:?}")]
    UnknownKind(String),
    #[error("named submitter {0:?} is referenced but never defined")]
    UndefinedName(String),
    #[error("named submitter {0:?} forms a trivial cycle with no stateful node in between")]
    TrivialCycle(String),
    #[error("grouper flush_interval must be between 10s and 24h, got {0:?}")]
    FlushIntervalOutOfRange(std::time::Duration),
    #[error("invalid filter expression: {0}")]
    Filter(#[from] ParseError),
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to fetch remote configuration: {0}")]
    Fetch(#[from] reqwest::Error),
}
