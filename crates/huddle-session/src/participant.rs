//! Participant types: who is in the room and what their devices are doing.

use std::fmt;

use huddle_protocol::{ParticipantName, ParticipantProfile, UserId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// A local capture or playback device that can be toggled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Device {
    Camera,
    Microphone,
    /// Local playback of remote audio. Never broadcast.
    Speaker,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Camera => write!(f, "camera"),
            Self::Microphone => write!(f, "microphone"),
            Self::Speaker => write!(f, "speaker"),
        }
    }
}

/// On/off state of a participant's three devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFlags {
    pub camera: bool,
    pub microphone: bool,
    pub speaker: bool,
}

impl Default for DeviceFlags {
    fn default() -> Self {
        Self::all_on()
    }
}

impl DeviceFlags {
    pub const fn all_on() -> Self {
        Self {
            camera: true,
            microphone: true,
            speaker: true,
        }
    }

    pub const fn all_off() -> Self {
        Self {
            camera: false,
            microphone: false,
            speaker: false,
        }
    }

    pub fn get(&self, device: Device) -> bool {
        match device {
            Device::Camera => self.camera,
            Device::Microphone => self.microphone,
            Device::Speaker => self.speaker,
        }
    }

    /// Sets one flag. Returns `true` if the value changed.
    pub fn set(&mut self, device: Device, enabled: bool) -> bool {
        let slot = match device {
            Device::Camera => &mut self.camera,
            Device::Microphone => &mut self.microphone,
            Device::Speaker => &mut self.speaker,
        };
        let changed = *slot != enabled;
        *slot = enabled;
        changed
    }
}

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Which way media flows on a negotiation handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Our own camera/microphone going up to the relay.
    SendOnly,
    /// One remote participant's media coming down.
    RecvOnly,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendOnly => write!(f, "sendonly"),
            Self::RecvOnly => write!(f, "recvonly"),
        }
    }
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// What we know about one participant.
///
/// For peers listed in `existingParticipants` only the name is known at
/// first; the rest arrives with their `receiveVideoAnswer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub name: ParticipantName,
    pub user_id: Option<UserId>,
    pub profile_image: Option<String>,
    pub devices: DeviceFlags,
}

impl Participant {
    /// A participant known only by name. Devices are assumed on until the
    /// relay says otherwise.
    pub fn named(name: ParticipantName) -> Self {
        Self {
            name,
            user_id: None,
            profile_image: None,
            devices: DeviceFlags::all_on(),
        }
    }

    pub fn from_profile(profile: &ParticipantProfile) -> Self {
        let mut participant = Self::named(profile.name.clone());
        participant.apply_profile(profile);
        participant
    }

    /// Overwrites identity and device flags with what the relay reported.
    pub fn apply_profile(&mut self, profile: &ParticipantProfile) {
        self.user_id = Some(profile.user_id.clone());
        self.profile_image = profile.profile_image.clone();
        self.devices = DeviceFlags {
            camera: profile.cam_enabled,
            microphone: profile.mic_enabled,
            speaker: profile.speaker_enabled,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_flags_set_reports_change() {
        let mut flags = DeviceFlags::all_on();
        assert!(flags.set(Device::Camera, false));
        assert!(!flags.set(Device::Camera, false));
        assert!(!flags.get(Device::Camera));
        assert!(flags.get(Device::Microphone));
    }

    #[test]
    fn test_participant_from_profile_copies_flags() {
        let profile = ParticipantProfile {
            user_id: UserId::from("7"),
            name: ParticipantName::from("carol"),
            profile_image: Some("img".into()),
            cam_enabled: false,
            mic_enabled: true,
            speaker_enabled: false,
        };

        let p = Participant::from_profile(&profile);

        assert_eq!(p.name.as_str(), "carol");
        assert_eq!(p.user_id, Some(UserId::from("7")));
        assert_eq!(
            p.devices,
            DeviceFlags {
                camera: false,
                microphone: true,
                speaker: false
            }
        );
    }

    #[test]
    fn test_named_participant_defaults() {
        let p = Participant::named("a".into());
        assert!(p.user_id.is_none());
        assert_eq!(p.devices, DeviceFlags::all_on());
    }
}
