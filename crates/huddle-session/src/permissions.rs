//! Camera/microphone permission gate.
//!
//! Device access is a hard precondition for entering a room: the session
//! controller asks a [`PermissionProbe`] before it opens the signaling
//! channel and gives up if either device is denied.

use std::future::Future;

/// Grant status of the two capture devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub camera: bool,
    pub microphone: bool,
}

impl Permissions {
    pub const fn granted() -> Self {
        Self {
            camera: true,
            microphone: true,
        }
    }

    pub const fn denied() -> Self {
        Self {
            camera: false,
            microphone: false,
        }
    }

    /// Returns `true` only if both devices are granted.
    pub fn all_granted(&self) -> bool {
        self.camera && self.microphone
    }
}

/// Asks the platform whether we may use the camera and microphone.
///
/// Implementations typically prompt the user on first use.
pub trait PermissionProbe: Send + Sync + 'static {
    fn check(&self) -> impl Future<Output = Permissions> + Send;
}

/// A fixed answer. Useful when the platform has already decided, and in
/// tests.
impl PermissionProbe for Permissions {
    async fn check(&self) -> Permissions {
        *self
    }
}
