//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding signaling frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The frame is not valid JSON, or does not match the shape its `kind`
    /// promises (missing field, wrong type).
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame is well-formed but its `kind` is not one we speak.
    #[error("unknown message kind {0:?}")]
    UnknownKind(String),

    /// The frame has no `kind` field at all.
    #[error("frame has no kind discriminator")]
    MissingKind,
}

impl ProtocolError {
    /// Returns `true` for errors that mean the relay is speaking a protocol
    /// we don't know (as opposed to a corrupted frame).
    pub fn is_unknown_kind(&self) -> bool {
        matches!(self, Self::UnknownKind(_))
    }
}
