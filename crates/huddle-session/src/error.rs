//! Error types for the session layer.

use huddle_protocol::ParticipantName;

use crate::NegotiationState;

/// Errors from a media-negotiation backend or from driving one.
///
/// These are always scoped to a single peer: the controller logs them and
/// that peer's media fails to connect, nobody else is affected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    /// Local camera/microphone capture could not be started.
    #[error("local media capture failed: {0}")]
    Capture(String),

    /// The backend refused to create a handle.
    #[error("handle creation failed: {0}")]
    CreateHandle(String),

    /// Generating the SDP offer failed.
    #[error("offer generation failed: {0}")]
    Offer(String),

    /// The remote SDP answer was rejected.
    #[error("answer processing failed: {0}")]
    Answer(String),

    /// A remote ICE candidate was rejected.
    #[error("ice candidate rejected: {0}")]
    Candidate(String),

    /// The operation does not make sense in the handle's current state,
    /// e.g. an answer for a handle that never produced an offer.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        state: NegotiationState,
        operation: &'static str,
    },

    /// The handle was already disposed.
    #[error("handle already disposed")]
    Disposed,
}

/// Errors from participant registry operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No participant with this name is registered.
    #[error("participant {0} not found")]
    UnknownParticipant(ParticipantName),

    /// A participant with this name is already registered.
    #[error("participant {0} already registered")]
    DuplicateParticipant(ParticipantName),

    /// The name belongs to the local participant, which is never stored
    /// as a remote.
    #[error("{0} is the local participant")]
    LocalParticipant(ParticipantName),
}
