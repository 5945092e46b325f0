use std::io;

use mqtt_core::{ConnectReturnCode, DecodeError, EncodeError};

/// Failures surfaced to callers of the [`Client`](crate::Client) facade.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The supplied client identifier was empty or violated the broker's
    /// length rules.
    #[error("invalid client identifier: {0}")]
    InvalidClientId(String),

    /// Opening the transport failed, the handshake timed out, or the broker
    /// rejected the connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker returned a non-zero CONNACK return code.
    #[error("connection refused: {0}")]
    ConnectionRefused(ConnectReturnCode),

    /// The handshake did not complete within the configured timeout.
    #[error("connect handshake timed out")]
    HandshakeTimeout,

    /// The requested operation needs an open, connected session.
    #[error("not connected")]
    NotConnected,

    /// A topic name or topic filter violated MQTT's structural rules.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// A byte sequence read from the transport did not decode to a valid
    /// packet.
    #[error("invalid packet: {0}")]
    Decode(#[from] DecodeError),

    /// A packet could not be serialized (only possible for absurdly large
    /// payloads).
    #[error("invalid packet: {0}")]
    Encode(#[from] EncodeError),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}
