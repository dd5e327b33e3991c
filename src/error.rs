use std::fmt;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Connect,
    Timeout,
    Status(u16),
    Io,
    Other,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Connect => f.write_str("connect"),
            TransportKind::Timeout => f.write_str("timeout"),
            TransportKind::Status(code) => write!(f, "status {code}"),
            TransportKind::Io => f.write_str("io"),
            TransportKind::Other => f.write_str("other"),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("transport error ({kind}): {message}")]
    Transport { kind: TransportKind, message: String },
    #[error("upload sink not reachable after {attempts} attempts: {message}")]
    SinkUnreachable { attempts: u32, message: String },
    #[error("worker is already running")]
    AlreadyRunning,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

impl TransferError {
    pub fn transport(kind: TransportKind, message: impl Into<String>) -> Self {
        TransferError::Transport { kind, message: message.into() }
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportKind::Timeout
        } else if err.is_connect() {
            TransportKind::Connect
        } else if let Some(status) = err.status() {
            TransportKind::Status(status.as_u16())
        } else if err.is_body() || err.is_decode() {
            TransportKind::Io
        } else {
            TransportKind::Other
        };
        TransferError::transport(kind, err.to_string())
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        let kind = match err.kind() {
            TimedOut | WouldBlock => TransportKind::Timeout,
            ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected => {
                TransportKind::Connect
            }
            _ => TransportKind::Io,
        };
        TransferError::transport(kind, err.to_string())
    }
}
