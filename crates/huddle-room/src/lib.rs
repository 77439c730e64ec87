//! Room sessions for Huddle.
//!
//! A [`SessionController`] is one client's membership in one room. It
//! checks permissions, resolves the room, joins through a [`SignalSink`],
//! and from then on reacts to relay messages, negotiation events and local
//! intents until it leaves.
//!
//! # Key types
//!
//! - [`SessionController`] — the state machine
//! - [`SessionPhase`] — where it is in its life
//! - [`SessionConfig`] — ICE servers, offer timeout, retry limits
//! - [`RoomDirectory`] — the external room service
//! - [`RoomSnapshot`] / [`RoomEvent`] — what the UI sees

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod config;
mod controller;
pub mod devices;
mod directory;
mod error;
mod events;
mod sink;

pub use config::{SessionConfig, SessionPhase};
pub use controller::{LocalIdentity, SessionController};
pub use directory::{CameraPolicy, RoomDirectory, RoomInfo, StaticDirectory};
pub use error::{RoomError, RoomServiceError};
pub use events::{CloseReason, RoomEvent, RoomSnapshot};
pub use sink::{RecordingSink, SignalSink};
