//! Session configuration and the controller's phase machine.

use std::time::Duration;

use huddle_session::{IceServer, DEFAULT_MAX_ORPHAN_NAMES, DEFAULT_MAX_PENDING_CANDIDATES};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for one room session.
///
/// Passed to the controller at construction; there is no global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// STUN/TURN servers handed to every negotiation handle.
    pub ice_servers: Vec<IceServer>,

    /// How long a handle may take to reach `Active` before it is
    /// disposed and re-offered.
    pub offer_timeout: Duration,

    /// Total offers per peer (first one included) before giving up.
    pub max_negotiation_attempts: u32,

    /// Cap on remote candidates held per name, both in a handle's
    /// pre-answer queue and in the orphan buffer.
    pub max_buffered_candidates: usize,

    /// Cap on distinct names the orphan buffer holds candidates for.
    #[serde(default = "default_max_orphan_names")]
    pub max_orphan_names: usize,
}

fn default_max_orphan_names() -> usize {
    DEFAULT_MAX_ORPHAN_NAMES
}

impl SessionConfig {
    /// Shortest offer timeout `validated()` allows.
    pub const MIN_OFFER_TIMEOUT: Duration = Duration::from_secs(1);

    /// Clamps out-of-range values to something usable.
    pub fn validated(mut self) -> Self {
        if self.offer_timeout < Self::MIN_OFFER_TIMEOUT {
            tracing::warn!(
                requested = ?self.offer_timeout,
                "offer timeout too short, clamping"
            );
            self.offer_timeout = Self::MIN_OFFER_TIMEOUT;
        }
        self.max_negotiation_attempts = self.max_negotiation_attempts.max(1);
        self.max_buffered_candidates = self.max_buffered_candidates.max(1);
        self.max_orphan_names = self.max_orphan_names.max(1);
        self
    }

    /// How often the driver should sweep for stalled negotiations.
    pub fn sweep_interval(&self) -> Duration {
        self.offer_timeout / 2
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::stun("stun:stun.l.google.com:19302")],
            offer_timeout: Duration::from_secs(30),
            max_negotiation_attempts: 3,
            max_buffered_candidates: DEFAULT_MAX_PENDING_CANDIDATES,
            max_orphan_names: DEFAULT_MAX_ORPHAN_NAMES,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionPhase
// ---------------------------------------------------------------------------

/// Where the controller is in a room session's life.
///
/// ```text
/// Unjoined → PermissionsPending → Joining → Active → Leaving → Closed
///     └──────────────┴──────────────┴─────────┴──────────────────┘
///                      any phase may jump straight to Closed
/// ```
///
/// - **Unjoined**: constructed, nothing asked yet.
/// - **PermissionsPending**: camera/microphone access being checked, room
///   metadata being fetched.
/// - **Joining**: `joinRoom` sent, waiting for `existingParticipants`.
/// - **Active**: in the room. All inbound kinds are dispatched.
/// - **Leaving**: teardown in progress.
/// - **Closed**: terminal. Nothing is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionPhase {
    Unjoined,
    PermissionsPending,
    Joining,
    Active,
    Leaving,
    Closed,
}

impl SessionPhase {
    /// The next phase on the happy path.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Unjoined => Some(Self::PermissionsPending),
            Self::PermissionsPending => Some(Self::Joining),
            Self::Joining => Some(Self::Active),
            Self::Active => Some(Self::Leaving),
            Self::Leaving => Some(Self::Closed),
            Self::Closed => None,
        }
    }

    /// Returns `true` if moving to `target` is allowed: the next phase on
    /// the happy path, or `Closed` from anywhere but `Closed`.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target) || (target == Self::Closed && self != Self::Closed)
    }

    /// Returns `true` once `joinRoom` has been sent and until teardown.
    pub fn is_joined(&self) -> bool {
        matches!(self, Self::Joining | Self::Active)
    }

    /// Returns `true` if the session is in the room.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unjoined => write!(f, "Unjoined"),
            Self::PermissionsPending => write!(f, "PermissionsPending"),
            Self::Joining => write!(f, "Joining"),
            Self::Active => write!(f, "Active"),
            Self::Leaving => write!(f, "Leaving"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}
