//! Unified error type for Huddle.

use huddle_protocol::ProtocolError;
use huddle_room::{RoomError, RoomServiceError};
use huddle_session::{NegotiationError, SessionError};
use huddle_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `huddle` crate you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]`
/// attributes generate the `From` impls, so `?` converts sub-crate errors
/// automatically.
#[derive(Debug, thiserror::Error)]
pub enum HuddleError {
    /// The signaling relay could not be reached, or the connection broke.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The participant registry rejected an operation.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The media backend failed.
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// Entry failed (permissions, room lookup, capture) or the session is
    /// in the wrong phase.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// The session's driver task is gone; the session has ended.
    #[error("session has ended")]
    SessionEnded,
}

impl From<RoomServiceError> for HuddleError {
    fn from(err: RoomServiceError) -> Self {
        Self::Room(RoomError::RoomService(err))
    }
}

impl HuddleError {
    /// Returns `true` if the user refused camera or microphone access.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Room(RoomError::PermissionDenied { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let huddle_err: HuddleError = err.into();
        assert!(matches!(huddle_err, HuddleError::Transport(_)));
        assert!(huddle_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::UnknownKind("chat".into());
        let huddle_err: HuddleError = err.into();
        assert!(matches!(huddle_err, HuddleError::Protocol(_)));
        assert!(huddle_err.to_string().contains("chat"));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::UnknownParticipant("bob".into());
        let huddle_err: HuddleError = err.into();
        assert!(matches!(huddle_err, HuddleError::Session(_)));
    }

    #[test]
    fn test_from_negotiation_error() {
        let err = NegotiationError::Disposed;
        let huddle_err: HuddleError = err.into();
        assert!(matches!(huddle_err, HuddleError::Negotiation(_)));
    }

    #[test]
    fn test_from_room_service_error_wraps_in_room() {
        let err = RoomServiceError::NotFound("r9".into());
        let huddle_err: HuddleError = err.into();
        assert!(matches!(
            huddle_err,
            HuddleError::Room(RoomError::RoomService(RoomServiceError::NotFound(_)))
        ));
    }

    #[test]
    fn test_is_permission_denied() {
        let denied: HuddleError = RoomError::PermissionDenied {
            camera: false,
            microphone: true,
        }
        .into();
        assert!(denied.is_permission_denied());
        assert!(!HuddleError::SessionEnded.is_permission_denied());
    }
}
