// src/error.rs
use std::io;
use thiserror::Error;

/// Result type used throughout the writer
pub type Result<T> = std::result::Result<T, WriterError>;

/// Errors raised while configuring the writer or dispatching a sample.
///
/// None of these are fatal to the host process: configuration errors are
/// reported at load time, everything else is local to one dispatch call.
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Unsupported value kind: {0}")]
    UnsupportedValueKind(String),

    #[error("Sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("Invalid metric type name: {0}")]
    InvalidName(String),

    #[error("Writer has not been initialised")]
    NotInitialized,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl WriterError {
    /// Lock poisoning is reported the same way everywhere
    pub(crate) fn poisoned(what: &str) -> Self {
        WriterError::Other(format!("{} lock poisoned", what))
    }
}

impl From<serde_json::Error> for WriterError {
    fn from(err: serde_json::Error) -> Self {
        WriterError::Decode(err.to_string())
    }
}

impl From<config::ConfigError> for WriterError {
    fn from(err: config::ConfigError) -> Self {
        WriterError::Config(err.to_string())
    }
}
