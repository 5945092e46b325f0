use thiserror::Error;

/// Failure decoding a byte stream into a [`Packet`](crate::Packet).
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not enough bytes were available to finish parsing the current packet.
    ///
    /// Not fatal on its own: the caller should buffer more bytes from the
    /// transport and retry.
    #[error("truncated packet: need more bytes")]
    Truncated,

    /// The fixed header's remaining-length field used a 5th continuation
    /// byte, or some other structural rule of the fixed header was violated.
    #[error("malformed fixed header: {0}")]
    MalformedHeader(String),

    /// The packet's variable header or payload did not parse, or left
    /// unconsumed bytes inside the declared remaining length.
    #[error("malformed packet body: {0}")]
    MalformedBody(String),

    /// The remaining-length field decoded to a value above
    /// [`MAX_REMAINING_LENGTH`](crate::MAX_REMAINING_LENGTH).
    #[error("remaining length {0} exceeds the 4-byte maximum of 268435455")]
    InvalidPayloadSize(usize),

    /// An unrecognized packet type nibble, QoS value, or return code.
    #[error("unrecognized field: {0}")]
    UnrecognizedField(String),
}

/// Failure encoding a [`Packet`](crate::Packet) into bytes.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The encoded remaining length would exceed the 4-byte varint range.
    #[error("remaining length {0} exceeds the 4-byte maximum of 268435455")]
    InvalidPayloadSize(usize),
}
