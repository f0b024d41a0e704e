use std::io;
use thiserror::Error;
use std::str::Utf8Error;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Payload is truncated: {len} bytes, expected at least {expected}")]
    Truncated { len: usize, expected: usize },

    #[error("Payload rendered as {rendered:?} is not a base-10 integer")]
    InvalidFormat { rendered: String },
}

#[derive(Error, Debug)]
pub enum WireError {
    #[error("Failed to parse backend event json: {source}")]
    Json { #[from] source: serde_json::Error },

    #[error("Failed to decode base64 payload: {source}")]
    Base64 { #[from] source: base64::DecodeError },

    #[error("Unknown backend event kind {0:?}")]
    UnknownEventKind(String),

    #[error("Connection state {0} is out of range")]
    InvalidConnectionState(i32),
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("No usable bluetooth adapter is available")]
    Unavailable,

    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },
}

#[derive(Error, Debug)]
pub enum LogSinkError {
    #[error("Failed to read/write telemetry log: {source}")]
    Io { #[from] source: io::Error },

    #[error("Failed to acquire exclusive lock on telemetry log: {source}")]
    CanNotLock { source: io::Error },

    #[error("Telemetry log is not enabled")]
    NotEnabled,

    #[error("Failed to determine a directory for telemetry logs")]
    NoDirectory,
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (bluetooth): {source}")]
    Backend { #[from] source: BackendError },

    #[error("Failed to start application (telemetry log): {source}")]
    LogSink { #[from] source: LogSinkError },

    #[error("Failed to start application (runtime): {source}")]
    Runtime { #[from] source: io::Error },
}
