//! Error types for the room layer.

use huddle_protocol::RoomId;
use huddle_session::NegotiationError;

use crate::SessionPhase;

/// Errors the room directory service can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomServiceError {
    /// The room does not exist.
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// The room is at capacity.
    #[error("room {0} is full")]
    Full(RoomId),

    /// The service failed or could not be reached.
    #[error("room service error: {0}")]
    Server(String),
}

/// Errors returned by the session controller's entry operations.
///
/// Only failures that stop a join are returned. Problems while in the room
/// are logged and handled per peer.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// Camera or microphone access was denied.
    #[error("device permission denied (camera: {camera}, microphone: {microphone})")]
    PermissionDenied { camera: bool, microphone: bool },

    /// The operation does not make sense in the current phase.
    #[error("cannot {operation} while {phase}")]
    InvalidPhase {
        phase: SessionPhase,
        operation: &'static str,
    },

    /// Looking up the room failed.
    #[error(transparent)]
    RoomService(#[from] RoomServiceError),

    /// Local media capture could not be started.
    #[error("local media unavailable: {0}")]
    Media(#[from] NegotiationError),

    /// The session is already closed.
    #[error("session closed")]
    Closed,
}
