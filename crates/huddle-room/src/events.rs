//! What the controller tells the UI.
//!
//! Two surfaces: a [`RoomSnapshot`] on a watch channel for "what does the
//! room look like now", and a stream of [`RoomEvent`]s for "what just
//! happened".

use huddle_protocol::{ParticipantName, RoomId};
use huddle_session::{Device, Participant};

use crate::{RoomInfo, SessionPhase};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `leave()` was called.
    Left,
    /// Camera or microphone access was denied.
    PermissionDenied,
    /// The room directory could not provide the room.
    RoomUnavailable,
    /// Local capture could not be started.
    MediaUnavailable,
    /// The signaling channel went away.
    ChannelLost,
    /// The controller was dropped without leaving first.
    Dropped,
}

/// A change the UI may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// `existingParticipants` arrived; we are in the room.
    Joined {
        room: RoomId,
        existing: Vec<ParticipantName>,
    },
    ParticipantJoined(Participant),
    ParticipantLeft(ParticipantName),
    /// A participant's camera/microphone/speaker changed. Emitted for our
    /// own toggles too.
    DeviceChanged {
        name: ParticipantName,
        device: Device,
        enabled: bool,
    },
    /// Everyone in the room, counting ourselves.
    OccupancyChanged(usize),
    /// A peer's media could not be negotiated within the allowed attempts.
    NegotiationFailed {
        name: ParticipantName,
        attempts: u32,
    },
    Closed(CloseReason),
}

/// Read-only view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub phase: SessionPhase,
    pub room: Option<RoomInfo>,
    pub local: Participant,
    /// Remote participants in join order.
    pub remotes: Vec<Participant>,
    pub occupancy: usize,
}

impl RoomSnapshot {
    pub fn remote(&self, name: &str) -> Option<&Participant> {
        self.remotes.iter().find(|p| p.name.as_str() == name)
    }

    pub fn remote_names(&self) -> Vec<&str> {
        self.remotes.iter().map(|p| p.name.as_str()).collect()
    }
}
