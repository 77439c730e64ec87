//! Signaling message types for Huddle's wire format.
//!
//! Every frame exchanged with the relay is a flat JSON object with a
//! `kind` discriminator, e.g.
//!
//! ```json
//! { "kind": "participantLeft", "name": "alice" }
//! ```
//!
//! Field names are camelCase on the wire and snake_case in Rust.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A participant's display name.
///
/// The relay keys every per-peer message (`participantLeft`, `iceCandidate`,
/// `isCamOn`, ...) by this name, so it doubles as the registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantName(pub String);

impl ParticipantName {
    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ParticipantName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Opaque account identifier of a participant.
///
/// Relays disagree on whether this is a number or a string, so both are
/// accepted on input. It always serializes as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct UserIdVisitor;

        impl Visitor<'_> for UserIdVisitor {
            type Value = UserId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a user id string or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<UserId, E> {
                Ok(UserId(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<UserId, E> {
                Ok(UserId(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<UserId, E> {
                Ok(UserId(v.to_string()))
            }
        }

        deserializer.deserialize_any(UserIdVisitor)
    }
}

/// Identifier of a room on the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Payload pieces
// ---------------------------------------------------------------------------

/// A trickled ICE candidate, in the shape browsers produce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The `candidate:` attribute line.
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_m_line_index: Option<u16>,
}

/// Who a participant is and which devices they have on.
///
/// Carried flat inside `newParticipantArrived` and `receiveVideoAnswer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantProfile {
    pub user_id: UserId,
    pub name: ParticipantName,
    #[serde(default)]
    pub profile_image: Option<String>,
    #[serde(default)]
    pub cam_enabled: bool,
    #[serde(default)]
    pub mic_enabled: bool,
    #[serde(default)]
    pub speaker_enabled: bool,
}

// ---------------------------------------------------------------------------
// SignalMessage
// ---------------------------------------------------------------------------

/// Every message that travels over the signaling channel, in either
/// direction.
///
/// `#[serde(tag = "kind")]` gives the relay's flat shape:
///   `{ "kind": "isCamOn", "sender": "bob", "isCamOn": false }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SignalMessage {
    /// Client → relay: enter a room with the given device state.
    JoinRoom {
        user_id: UserId,
        name: ParticipantName,
        room: RoomId,
        cam_enabled: bool,
        mic_enabled: bool,
        speaker_enabled: bool,
    },

    /// Relay → client: who was already in the room when we joined.
    ExistingParticipants { data: Vec<ParticipantName> },

    /// Relay → client: someone joined after us.
    NewParticipantArrived(ParticipantProfile),

    /// Relay → client: someone left.
    ParticipantLeft { name: ParticipantName },

    /// Client → relay: start negotiating the media of `sender`.
    /// `sender` is our own name for the uplink.
    ReceiveVideoFrom {
        sender: ParticipantName,
        sdp_offer: String,
    },

    /// Relay → client: answer to a `receiveVideoFrom` offer.
    ReceiveVideoAnswer {
        #[serde(flatten)]
        profile: ParticipantProfile,
        sdp_answer: String,
    },

    /// Client → relay: a locally gathered candidate for `name`'s handle.
    OnIceCandidate {
        name: ParticipantName,
        candidate: IceCandidate,
    },

    /// Relay → client: a remote candidate for `name`'s handle.
    IceCandidate {
        name: ParticipantName,
        candidate: IceCandidate,
    },

    /// Either direction: `sender` turned their camera on or off.
    IsCamOn {
        sender: ParticipantName,
        is_cam_on: bool,
    },

    /// Either direction: `sender` turned their microphone on or off.
    IsMicOn {
        sender: ParticipantName,
        is_mic_on: bool,
    },

    /// Either direction: keep-alive.
    PingPong { message: String },

    /// Client → relay: we are leaving.
    LeaveRoom,
}

impl SignalMessage {
    /// Every `kind` this protocol understands.
    pub const KINDS: [&'static str; 12] = [
        "joinRoom",
        "existingParticipants",
        "newParticipantArrived",
        "participantLeft",
        "receiveVideoFrom",
        "receiveVideoAnswer",
        "onIceCandidate",
        "iceCandidate",
        "isCamOn",
        "isMicOn",
        "pingPong",
        "leaveRoom",
    ];

    /// The keep-alive frame the client sends.
    pub fn ping() -> Self {
        Self::PingPong {
            message: "ping".to_string(),
        }
    }

    /// Returns the wire `kind` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "joinRoom",
            Self::ExistingParticipants { .. } => "existingParticipants",
            Self::NewParticipantArrived(_) => "newParticipantArrived",
            Self::ParticipantLeft { .. } => "participantLeft",
            Self::ReceiveVideoFrom { .. } => "receiveVideoFrom",
            Self::ReceiveVideoAnswer { .. } => "receiveVideoAnswer",
            Self::OnIceCandidate { .. } => "onIceCandidate",
            Self::IceCandidate { .. } => "iceCandidate",
            Self::IsCamOn { .. } => "isCamOn",
            Self::IsMicOn { .. } => "isMicOn",
            Self::PingPong { .. } => "pingPong",
            Self::LeaveRoom => "leaveRoom",
        }
    }

    /// Returns `true` if `kind` names a known message.
    pub fn is_known_kind(kind: &str) -> bool {
        Self::KINDS.contains(&kind)
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! JSON shape tests. The relay is not ours, so every field name and tag
    //! value is checked against what it sends and expects.

    use super::*;
    use serde_json::json;

    fn profile(name: &str) -> ParticipantProfile {
        ParticipantProfile {
            user_id: UserId::from("7"),
            name: ParticipantName::from(name),
            profile_image: Some("https://img/7.png".into()),
            cam_enabled: true,
            mic_enabled: false,
            speaker_enabled: true,
        }
    }

    // =====================================================================
    // Identity types
    // =====================================================================

    #[test]
    fn test_participant_name_serializes_as_plain_string() {
        let json = serde_json::to_string(&ParticipantName::from("alice")).unwrap();
        assert_eq!(json, "\"alice\"");
    }

    #[test]
    fn test_user_id_accepts_number_and_string() {
        let from_number: UserId = serde_json::from_str("42").unwrap();
        let from_string: UserId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(from_number, UserId::from("42"));
        assert_eq!(from_number, from_string);
    }

    #[test]
    fn test_user_id_rejects_object() {
        let result: Result<UserId, _> = serde_json::from_str("{}");
        assert!(result.is_err());
    }

    // =====================================================================
    // Outbound shapes
    // =====================================================================

    #[test]
    fn test_join_room_json_format() {
        let msg = SignalMessage::JoinRoom {
            user_id: UserId::from("u1"),
            name: ParticipantName::from("alice"),
            room: RoomId::from("r9"),
            cam_enabled: true,
            mic_enabled: false,
            speaker_enabled: true,
        };
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(
            value,
            json!({
                "kind": "joinRoom",
                "userId": "u1",
                "name": "alice",
                "room": "r9",
                "camEnabled": true,
                "micEnabled": false,
                "speakerEnabled": true,
            })
        );
    }

    #[test]
    fn test_receive_video_from_json_format() {
        let msg = SignalMessage::ReceiveVideoFrom {
            sender: ParticipantName::from("bob"),
            sdp_offer: "v=0".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(
            value,
            json!({ "kind": "receiveVideoFrom", "sender": "bob", "sdpOffer": "v=0" })
        );
    }

    #[test]
    fn test_on_ice_candidate_json_format() {
        let msg = SignalMessage::OnIceCandidate {
            name: ParticipantName::from("bob"),
            candidate: IceCandidate {
                candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
            },
        };
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["kind"], "onIceCandidate");
        assert_eq!(value["candidate"]["sdpMid"], "0");
        assert_eq!(value["candidate"]["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_is_cam_on_json_format() {
        let msg = SignalMessage::IsCamOn {
            sender: ParticipantName::from("alice"),
            is_cam_on: false,
        };
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(
            value,
            json!({ "kind": "isCamOn", "sender": "alice", "isCamOn": false })
        );
    }

    #[test]
    fn test_ping_json_format() {
        let value = serde_json::to_value(SignalMessage::ping()).unwrap();
        assert_eq!(value, json!({ "kind": "pingPong", "message": "ping" }));
    }

    #[test]
    fn test_leave_room_is_kind_only() {
        let value = serde_json::to_value(SignalMessage::LeaveRoom).unwrap();
        assert_eq!(value, json!({ "kind": "leaveRoom" }));
    }

    // =====================================================================
    // Inbound shapes
    // =====================================================================

    #[test]
    fn test_existing_participants_from_relay() {
        let msg: SignalMessage = serde_json::from_value(json!({
            "kind": "existingParticipants",
            "data": ["a", "b"],
        }))
        .unwrap();

        assert_eq!(
            msg,
            SignalMessage::ExistingParticipants {
                data: vec!["a".into(), "b".into()],
            }
        );
    }

    #[test]
    fn test_new_participant_arrived_is_flat() {
        let msg: SignalMessage = serde_json::from_value(json!({
            "kind": "newParticipantArrived",
            "userId": 7,
            "profileImage": "https://img/7.png",
            "name": "carol",
            "camEnabled": true,
            "micEnabled": false,
            "speakerEnabled": true,
        }))
        .unwrap();

        assert_eq!(msg, SignalMessage::NewParticipantArrived(profile("carol")));
    }

    #[test]
    fn test_new_participant_arrived_defaults_missing_flags() {
        let msg: SignalMessage = serde_json::from_value(json!({
            "kind": "newParticipantArrived",
            "userId": "9",
            "name": "dave",
        }))
        .unwrap();

        let SignalMessage::NewParticipantArrived(p) = msg else {
            panic!("wrong variant: {msg:?}");
        };
        assert!(p.profile_image.is_none());
        assert!(!p.cam_enabled && !p.mic_enabled && !p.speaker_enabled);
    }

    #[test]
    fn test_receive_video_answer_flattens_profile() {
        let msg: SignalMessage = serde_json::from_value(json!({
            "kind": "receiveVideoAnswer",
            "userId": "7",
            "profileImage": "https://img/7.png",
            "name": "carol",
            "camEnabled": true,
            "micEnabled": false,
            "speakerEnabled": true,
            "sdpAnswer": "v=0 answer",
        }))
        .unwrap();

        assert_eq!(
            msg,
            SignalMessage::ReceiveVideoAnswer {
                profile: profile("carol"),
                sdp_answer: "v=0 answer".into(),
            }
        );
    }

    #[test]
    fn test_ice_candidate_without_mid_and_index() {
        let msg: SignalMessage = serde_json::from_value(json!({
            "kind": "iceCandidate",
            "name": "bob",
            "candidate": { "candidate": "candidate:2" },
        }))
        .unwrap();

        let SignalMessage::IceCandidate { name, candidate } = msg else {
            panic!("wrong variant: {msg:?}");
        };
        assert_eq!(name.as_str(), "bob");
        assert!(candidate.sdp_mid.is_none());
        assert!(candidate.sdp_m_line_index.is_none());
    }

    #[test]
    fn test_pong_from_relay() {
        let msg: SignalMessage =
            serde_json::from_str(r#"{"kind":"pingPong","message":"pong"}"#).unwrap();
        assert_eq!(msg.kind(), "pingPong");
    }

    // =====================================================================
    // kind() / KINDS agree
    // =====================================================================

    #[test]
    fn test_kind_matches_serialized_tag() {
        let samples = [
            SignalMessage::ExistingParticipants { data: vec![] },
            SignalMessage::NewParticipantArrived(profile("x")),
            SignalMessage::ParticipantLeft { name: "x".into() },
            SignalMessage::IsMicOn { sender: "x".into(), is_mic_on: true },
            SignalMessage::ping(),
            SignalMessage::LeaveRoom,
        ];
        for msg in samples {
            let value = serde_json::to_value(&msg).unwrap();
            assert_eq!(value["kind"], msg.kind());
            assert!(SignalMessage::is_known_kind(msg.kind()));
        }
    }

    #[test]
    fn test_unknown_kind_is_not_known() {
        assert!(!SignalMessage::is_known_kind("flyToMoon"));
    }

    #[test]
    fn test_decode_missing_required_field_fails() {
        let result: Result<SignalMessage, _> =
            serde_json::from_str(r#"{"kind":"participantLeft"}"#);
        assert!(result.is_err());
    }
}
