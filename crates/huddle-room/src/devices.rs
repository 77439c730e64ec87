//! Device state sync between participants.
//!
//! Toggling a device flips track enablement on the existing uplink and
//! broadcasts the new state; it never renegotiates. The speaker is local
//! playback and is never broadcast.

use huddle_protocol::{ParticipantName, SignalMessage};
use huddle_session::{Device, Participant};

/// The broadcast for a local device change, or `None` for devices that
/// stay local.
pub fn device_message(sender: &ParticipantName, device: Device, enabled: bool) -> Option<SignalMessage> {
    match device {
        Device::Camera => Some(SignalMessage::IsCamOn {
            sender: sender.clone(),
            is_cam_on: enabled,
        }),
        Device::Microphone => Some(SignalMessage::IsMicOn {
            sender: sender.clone(),
            is_mic_on: enabled,
        }),
        Device::Speaker => None,
    }
}

/// A remote device change extracted from an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDeviceChange {
    pub sender: ParticipantName,
    pub device: Device,
    pub enabled: bool,
}

impl RemoteDeviceChange {
    /// Extracts the change from an `isCamOn`/`isMicOn` message.
    pub fn from_message(message: &SignalMessage) -> Option<Self> {
        match message {
            SignalMessage::IsCamOn { sender, is_cam_on } => Some(Self {
                sender: sender.clone(),
                device: Device::Camera,
                enabled: *is_cam_on,
            }),
            SignalMessage::IsMicOn { sender, is_mic_on } => Some(Self {
                sender: sender.clone(),
                device: Device::Microphone,
                enabled: *is_mic_on,
            }),
            _ => None,
        }
    }

    /// Applies the change. Returns `true` if the participant's flag moved.
    pub fn apply(&self, participant: &mut Participant) -> bool {
        participant.devices.set(self.device, self.enabled)
    }
}
