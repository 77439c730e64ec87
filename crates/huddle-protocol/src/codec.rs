//! Codec trait and implementations for serializing/deserializing frames.
//!
//! The rest of Huddle only needs something that implements [`Codec`].
//! [`JsonCodec`] is what the relay speaks today.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{ProtocolError, SignalMessage};

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because the signaling channel moves its codec
/// into spawned reader and writer tasks.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or don't
    /// match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// Just enough of a frame to read its discriminator.
#[derive(Deserialize)]
struct KindProbe {
    kind: Option<String>,
}

/// Decodes one inbound frame into a [`SignalMessage`].
///
/// Unlike a plain `codec.decode::<SignalMessage>()`, this tells an unknown
/// `kind` apart from a malformed frame, so the caller can log the two at
/// different levels.
///
/// # Errors
/// - [`ProtocolError::MissingKind`] — no `kind` field
/// - [`ProtocolError::UnknownKind`] — `kind` is not in [`SignalMessage::KINDS`]
/// - [`ProtocolError::Decode`] — anything else wrong with the frame
pub fn decode_signal<C: Codec>(
    codec: &C,
    data: &[u8],
) -> Result<SignalMessage, ProtocolError> {
    let probe: KindProbe = codec.decode(data)?;
    match probe.kind {
        None => Err(ProtocolError::MissingKind),
        Some(kind) if !SignalMessage::is_known_kind(&kind) => {
            Err(ProtocolError::UnknownKind(kind))
        }
        Some(_) => codec.decode(data),
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// This is behind the `json` feature flag (enabled by default).
///
/// ## Example
///
/// ```rust
/// use huddle_protocol::{decode_signal, Codec, JsonCodec, SignalMessage};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&SignalMessage::ping()).unwrap();
/// assert_eq!(bytes, br#"{"kind":"pingPong","message":"ping"}"#);
///
/// let decoded = decode_signal(&codec, &bytes).unwrap();
/// assert_eq!(decoded, SignalMessage::ping());
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
