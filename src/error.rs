//! Error types for rmlink.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::types::DeviceKind;

/// Result type alias for rmlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for rmlink.
#[derive(Error, Debug)]
pub enum Error {
    /// A gated command was issued to a device kind that lacks the feature.
    /// Fails before any I/O is attempted.
    #[error("device {kind} does not support {capability}")]
    UnsupportedCapability {
        kind: DeviceKind,
        capability: &'static str,
    },

    // Transport errors
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    // Protocol errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // Cryptographic errors
    #[error("cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("session is closed")]
    Closed,

    #[error("session error: {0}")]
    Session(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Transport layer errors.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("bind failed on {addr}: {reason}")]
    BindFailed { addr: SocketAddr, reason: String },

    #[error("connect failed to {addr}: {reason}")]
    ConnectFailed { addr: SocketAddr, reason: String },

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("socket error: {0}")]
    SocketError(String),
}

/// Protocol parsing and handling errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("datagram too short: {len} bytes (need {min})")]
    Truncated { len: usize, min: usize },

    #[error("malformed payload: {0}")]
    MalformedPayload(&'static str),
}

/// Cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("ciphertext length {0} is not a multiple of the AES block size")]
    InvalidCiphertextLength(usize),
}

impl Error {
    /// Check whether the error is a timeout waiting on the device.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Check whether the error is a fast-failing capability rejection.
    pub fn is_capability(&self) -> bool {
        matches!(self, Error::UnsupportedCapability { .. })
    }
}
