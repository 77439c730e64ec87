//! Participant tracking and per-peer media negotiation for Huddle.
//!
//! This crate owns everything that is scoped to one peer:
//!
//! 1. **Who is here** ([`Participant`], [`ParticipantRegistry`]): remote
//!    peers keyed by display name, each owning one receive handle.
//! 2. **Negotiation** ([`Negotiation`]): the offer/answer/candidate
//!    exchange for one handle, with early candidates queued until the
//!    answer lands and orphan candidates held in a [`CandidateBuffer`].
//! 3. **Backends** ([`MediaNegotiator`], [`NegotiationHandle`],
//!    [`LocalMedia`], [`PermissionProbe`]): the traits an actual media
//!    stack implements. [`loopback`] is a scripted one for tests.
//!
//! # How it fits in the stack
//!
//! ```text
//! Room Layer (above)     ← session controller drives registry + negotiations
//!     ↕
//! Session Layer (this crate)
//!     ↕
//! Protocol Layer (below) ← ParticipantName, IceCandidate, ParticipantProfile
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod error;
pub mod loopback;
mod negotiation;
mod negotiator;
mod participant;
mod permissions;
mod registry;

pub use error::{NegotiationError, SessionError};
pub use negotiation::{
    CandidateBuffer, CandidateOutcome, Negotiation, NegotiationState, DEFAULT_MAX_ORPHAN_NAMES,
    DEFAULT_MAX_PENDING_CANDIDATES,
};
pub use negotiator::{
    HandleSpec, IceServer, LocalMedia, MediaNegotiator, NegotiationEvent,
    NegotiationEventKind, NegotiationHandle, PeerEvents,
};
pub use participant::{Device, DeviceFlags, Direction, Participant};
pub use permissions::{PermissionProbe, Permissions};
pub use registry::{ParticipantRegistry, RemoteEntry};
