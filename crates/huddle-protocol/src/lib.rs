//! Signaling protocol for Huddle.
//!
//! This crate defines what the client and the signaling relay say to each
//! other:
//!
//! - **Types** ([`SignalMessage`], [`IceCandidate`], [`ParticipantProfile`],
//!   identity newtypes): the messages that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those messages
//!   become bytes and back.
//! - **Errors** ([`ProtocolError`]): what can go wrong while doing so.
//!
//! ```text
//! Transport (bytes) → Protocol (SignalMessage) → Room (session controller)
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod codec;
mod error;
mod types;

pub use codec::{decode_signal, Codec};
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    IceCandidate, ParticipantName, ParticipantProfile, RoomId, SignalMessage,
    UserId,
};
