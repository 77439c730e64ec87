//! The room directory: the service that knows which rooms exist.
//!
//! Huddle only needs two things from it, the room's metadata before
//! joining and a notification after leaving. Browsing and listing rooms
//! belong to the application.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use huddle_protocol::{RoomId, UserId};
use serde::{Deserialize, Serialize};

use crate::RoomServiceError;

/// Whether participants are expected to have their camera on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CameraPolicy {
    #[default]
    On,
    Off,
}

/// Metadata for one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub id: RoomId,
    pub title: String,
    pub capacity: usize,
    /// Occupancy as reported by the directory when fetched.
    #[serde(default)]
    pub occupancy: usize,
    #[serde(default)]
    pub camera_policy: CameraPolicy,
}

impl RoomInfo {
    pub fn new(id: impl Into<RoomId>, title: impl Into<String>, capacity: usize) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            capacity,
            occupancy: 0,
            camera_policy: CameraPolicy::On,
        }
    }

    pub fn with_camera_policy(mut self, policy: CameraPolicy) -> Self {
        self.camera_policy = policy;
        self
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.occupancy >= self.capacity
    }
}

/// The room service, as seen by the session controller.
pub trait RoomDirectory: Send + Sync + 'static {
    /// Looks up a room before joining it.
    fn fetch_room(
        &self,
        id: &RoomId,
    ) -> impl Future<Output = Result<RoomInfo, RoomServiceError>> + Send;

    /// Tells the service that `user` left `id`.
    fn leave_room(
        &self,
        id: &RoomId,
        user: &UserId,
    ) -> impl Future<Output = Result<(), RoomServiceError>> + Send;
}

#[derive(Debug, Default)]
struct StaticInner {
    rooms: HashMap<RoomId, RoomInfo>,
    leaves: Vec<(RoomId, UserId)>,
}

/// A fixed, in-memory directory. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    inner: Arc<Mutex<StaticInner>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a room.
    pub fn with_room(self, room: RoomInfo) -> Self {
        self.lock().rooms.insert(room.id.clone(), room);
        self
    }

    /// Every `leave_room` call received so far.
    pub fn leaves(&self) -> Vec<(RoomId, UserId)> {
        self.lock().leaves.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StaticInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RoomDirectory for StaticDirectory {
    async fn fetch_room(&self, id: &RoomId) -> Result<RoomInfo, RoomServiceError> {
        self.lock()
            .rooms
            .get(id)
            .cloned()
            .ok_or_else(|| RoomServiceError::NotFound(id.clone()))
    }

    async fn leave_room(&self, id: &RoomId, user: &UserId) -> Result<(), RoomServiceError> {
        let mut inner = self.lock();
        if !inner.rooms.contains_key(id) {
            return Err(RoomServiceError::NotFound(id.clone()));
        }
        inner.leaves.push((id.clone(), user.clone()));
        Ok(())
    }
}
