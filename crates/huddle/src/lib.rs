//! # Huddle
//!
//! Client side of a multi-party video room.
//!
//! Huddle keeps one control connection to a signaling relay, tracks who is
//! in the room, and runs one media negotiation per participant: a
//! send-only uplink for ourselves and a receive-only handle per remote. The
//! media engine itself sits behind [`MediaNegotiator`]; Huddle only
//! exchanges offers, answers and ICE candidates on its behalf.
//!
//! ```text
//! HuddleClient::join ─→ permissions ─→ room directory ─→ SignalingChannel
//!                                                             │
//!                              JoinedSession ◄── driver task ◄┘
//!                                                 (SessionController)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use huddle::prelude::*;
//!
//! # async fn run() -> Result<(), HuddleError> {
//! let directory = StaticDirectory::new().with_room(RoomInfo::new("r1", "Study hall", 8));
//! let client = HuddleClient::builder()
//!     .url("wss://relay.example.com/signal")
//!     .build(LoopbackNegotiator::new(), directory);
//!
//! let mut session = client
//!     .join(LocalIdentity::new("42", "ana", "r1"), &Permissions::granted())
//!     .await?;
//! session.toggle_device(Device::Camera).await?;
//! while let Some(event) = session.next_event().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod channel;
mod client;
mod driver;
mod error;

pub use channel::{ChannelConfig, ChannelEvent, SignalingChannel};
pub use client::{HuddleClient, HuddleClientBuilder, JoinedSession, DEFAULT_RELAY_URL};
pub use error::HuddleError;

pub use huddle_session::MediaNegotiator;

/// Everything an application needs to join a room.
pub mod prelude {
    pub use crate::{
        ChannelConfig, ChannelEvent, HuddleClient, HuddleClientBuilder, HuddleError,
        JoinedSession, SignalingChannel, DEFAULT_RELAY_URL,
    };

    pub use huddle_heartbeat::HeartbeatConfig;
    pub use huddle_protocol::{
        decode_signal, Codec, IceCandidate, JsonCodec, ParticipantName, ParticipantProfile, RoomId,
        SignalMessage, UserId,
    };
    pub use huddle_room::{
        CameraPolicy, CloseReason, LocalIdentity, RoomDirectory, RoomEvent, RoomInfo,
        RoomSnapshot, SessionConfig, SessionPhase, SignalSink, StaticDirectory,
    };
    pub use huddle_session::loopback::{LoopbackNegotiator, LoopbackScript};
    pub use huddle_session::{
        Device, DeviceFlags, HandleSpec, IceServer, LocalMedia, MediaNegotiator,
        NegotiationHandle, Participant, PermissionProbe, Permissions,
    };
    pub use huddle_transport::{Connection, MemoryConnection, TransportError, WebSocketConnection};
}
