//! The media-negotiation backend: the seam between Huddle and whatever
//! actually moves audio/video (a browser's `RTCPeerConnection`, a native
//! WebRTC stack, the [`loopback`](crate::loopback) backend in tests).
//!
//! Huddle drives the offer/answer/candidate exchange; the backend turns
//! those into media. Three traits:
//!
//! - [`MediaNegotiator`] — factory for handles and local capture
//! - [`NegotiationHandle`] — one peer connection
//! - [`LocalMedia`] — our own camera/microphone/speaker

use std::future::Future;

use huddle_protocol::{IceCandidate, ParticipantName};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{Device, DeviceFlags, Direction, NegotiationError};

// ---------------------------------------------------------------------------
// ICE configuration
// ---------------------------------------------------------------------------

/// One STUN/TURN server handed to every handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// A credential-less STUN server.
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// A TURN server with long-term credentials.
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Backend → controller events
// ---------------------------------------------------------------------------

/// Something a handle reports asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationEventKind {
    /// A local ICE candidate was gathered; it must be trickled to the relay.
    LocalCandidate(IceCandidate),
    /// Media is flowing.
    Connected,
    /// The connection failed after negotiation (ICE failure, DTLS error).
    Failed(String),
}

/// A [`NegotiationEventKind`] stamped with the handle it came from.
///
/// `generation` lets the controller ignore events from a handle it has
/// already replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationEvent {
    pub peer: ParticipantName,
    pub generation: u64,
    pub kind: NegotiationEventKind,
}

/// Sender a handle uses to report events for itself.
#[derive(Debug, Clone)]
pub struct PeerEvents {
    peer: ParticipantName,
    generation: u64,
    tx: mpsc::UnboundedSender<NegotiationEvent>,
}

impl PeerEvents {
    pub fn new(
        peer: ParticipantName,
        generation: u64,
        tx: mpsc::UnboundedSender<NegotiationEvent>,
    ) -> Self {
        Self {
            peer,
            generation,
            tx,
        }
    }

    pub fn peer(&self) -> &ParticipantName {
        &self.peer
    }

    /// Reports a gathered local candidate.
    pub fn candidate(&self, candidate: IceCandidate) {
        self.emit(NegotiationEventKind::LocalCandidate(candidate));
    }

    /// Reports that media is flowing.
    pub fn connected(&self) {
        self.emit(NegotiationEventKind::Connected);
    }

    /// Reports a post-negotiation failure.
    pub fn failed(&self, reason: impl Into<String>) {
        self.emit(NegotiationEventKind::Failed(reason.into()));
    }

    fn emit(&self, kind: NegotiationEventKind) {
        // A closed receiver means the session is gone; nothing to report to.
        let _ = self.tx.send(NegotiationEvent {
            peer: self.peer.clone(),
            generation: self.generation,
            kind,
        });
    }
}

/// Everything a backend needs to create one handle.
#[derive(Debug, Clone)]
pub struct HandleSpec {
    pub peer: ParticipantName,
    pub direction: Direction,
    pub generation: u64,
    pub ice_servers: Vec<IceServer>,
    pub events: PeerEvents,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One peer connection, as seen by the negotiation engine.
///
/// Every method reports failure through its `Result`; none of them may
/// panic. `dispose` must be safe to call more than once.
pub trait NegotiationHandle: Send + 'static {
    /// Produces the local SDP offer.
    fn generate_offer(
        &mut self,
    ) -> impl Future<Output = Result<String, NegotiationError>> + Send;

    /// Applies the relay's SDP answer.
    fn process_answer(
        &mut self,
        sdp_answer: &str,
    ) -> impl Future<Output = Result<(), NegotiationError>> + Send;

    /// Adds one remote ICE candidate.
    fn add_ice_candidate(
        &mut self,
        candidate: &IceCandidate,
    ) -> impl Future<Output = Result<(), NegotiationError>> + Send;

    /// Releases transport and media resources.
    fn dispose(&mut self);
}

/// Our own capture tracks and playback.
///
/// Toggling a device flips track enablement; it never adds or removes
/// tracks, so no renegotiation is needed.
pub trait LocalMedia: Send + 'static {
    fn set_enabled(&mut self, device: Device, enabled: bool);

    fn is_enabled(&self, device: Device) -> bool;

    /// Stops every track. Safe to call more than once.
    fn release(&mut self);
}

/// Factory for handles and local capture.
pub trait MediaNegotiator: Send + Sync + 'static {
    type Handle: NegotiationHandle;
    type Media: LocalMedia;

    /// Starts local capture with the given initial enablement.
    fn capture(&self, devices: DeviceFlags) -> Result<Self::Media, NegotiationError>;

    /// Creates a handle. `local` is our capture for the send-only uplink
    /// and `None` for receive-only handles.
    fn create_handle(
        &self,
        spec: HandleSpec,
        local: Option<&Self::Media>,
    ) -> Result<Self::Handle, NegotiationError>;
}
