//! Integration tests for the signaling channel over an in-memory connection.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use huddle::prelude::*;
use tokio::time::Instant;

const PING: &[u8] = br#"{"kind":"pingPong","message":"ping"}"#;

fn open(config: ChannelConfig) -> (SignalingChannel, MemoryConnection) {
    let (client, relay) = MemoryConnection::pair();
    (SignalingChannel::open(client, JsonCodec, config), relay)
}

fn quiet() -> ChannelConfig {
    ChannelConfig {
        heartbeat: HeartbeatConfig::disabled(),
        ..Default::default()
    }
}

// =========================================================================
// Keep-alive
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_keepalive_pings_every_interval_while_open() {
    let (channel, relay) = open(ChannelConfig::default());
    let start = Instant::now();

    for n in 1..=3u32 {
        let frame = relay.recv().await.unwrap().unwrap();
        assert_eq!(frame, PING);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10) * n, "beat {n} early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(10) * n + Duration::from_secs(1));
    }

    assert!(channel.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_stops_after_close() {
    let (channel, relay) = open(ChannelConfig::default());
    assert_eq!(relay.recv().await.unwrap().unwrap(), PING);

    channel.close();

    // The writer closes the connection once the queue is flushed; no
    // further pings arrive.
    let next = tokio::time::timeout(Duration::from_secs(30), relay.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next, None);
}

// =========================================================================
// Outbound
// =========================================================================

#[tokio::test]
async fn test_send_encodes_json_frame() {
    let (channel, relay) = open(quiet());

    channel.send(SignalMessage::LeaveRoom);

    let frame = relay.recv().await.unwrap().unwrap();
    assert_eq!(frame, br#"{"kind":"leaveRoom"}"#);
}

#[tokio::test]
async fn test_close_flushes_queued_messages_first() {
    let (channel, relay) = open(quiet());

    channel.send(SignalMessage::IsMicOn {
        sender: "ana".into(),
        is_mic_on: false,
    });
    channel.send(SignalMessage::LeaveRoom);
    channel.close();

    let first: serde_json::Value =
        serde_json::from_slice(&relay.recv().await.unwrap().unwrap()).unwrap();
    let second: serde_json::Value =
        serde_json::from_slice(&relay.recv().await.unwrap().unwrap()).unwrap();
    assert_eq!(first["kind"], "isMicOn");
    assert_eq!(second["kind"], "leaveRoom");
    assert_eq!(relay.recv().await.unwrap(), None);
}

#[tokio::test]
async fn test_send_after_close_is_noop() {
    let (channel, relay) = open(quiet());

    channel.close();
    channel.close();
    channel.send(SignalMessage::LeaveRoom);

    assert!(!channel.is_open());
    assert_eq!(relay.recv().await.unwrap(), None);
}

// =========================================================================
// Inbound
// =========================================================================

#[tokio::test]
async fn test_inbound_frames_reach_dispatcher() {
    let (channel, relay) = open(quiet());
    let mut events = channel.on_message();

    relay
        .send(br#"{"kind":"participantLeft","name":"bob"}"#)
        .await
        .unwrap();

    assert_eq!(
        events.recv().await,
        Some(ChannelEvent::Message(SignalMessage::ParticipantLeft {
            name: "bob".into()
        }))
    );
}

#[tokio::test]
async fn test_frames_before_dispatcher_are_kept() {
    let (channel, relay) = open(quiet());
    relay.send(br#"{"kind":"leaveRoom"}"#).await.unwrap();
    tokio::task::yield_now().await;

    let mut events = channel.on_message();

    assert_eq!(
        events.recv().await,
        Some(ChannelEvent::Message(SignalMessage::LeaveRoom))
    );
}

#[tokio::test]
async fn test_unknown_and_malformed_frames_dropped() {
    let (channel, relay) = open(quiet());
    let mut events = channel.on_message();

    relay.send(br#"{"kind":"chatMessage","text":"hi"}"#).await.unwrap();
    relay.send(b"not json at all").await.unwrap();
    relay.send(br#"{"kind":"isCamOn","sender":"bob"}"#).await.unwrap();
    relay
        .send(br#"{"kind":"isCamOn","sender":"bob","isCamOn":true}"#)
        .await
        .unwrap();

    assert_eq!(
        events.recv().await,
        Some(ChannelEvent::Message(SignalMessage::IsCamOn {
            sender: "bob".into(),
            is_cam_on: true
        }))
    );
}

#[tokio::test]
async fn test_remote_close_delivers_closed_once() {
    let (channel, relay) = open(quiet());
    let mut events = channel.on_message();

    relay.close().await.unwrap();

    assert_eq!(events.recv().await, Some(ChannelEvent::Closed));
    assert_eq!(events.recv().await, None);
    assert!(!channel.is_open());
}

#[tokio::test]
async fn test_on_message_replaces_previous_dispatcher() {
    let (channel, relay) = open(quiet());
    let mut first = channel.on_message();
    let mut second = channel.on_message();

    relay.send(br#"{"kind":"leaveRoom"}"#).await.unwrap();

    assert_eq!(first.recv().await, None);
    assert_eq!(
        second.recv().await,
        Some(ChannelEvent::Message(SignalMessage::LeaveRoom))
    );
}

// =========================================================================
// Connect
// =========================================================================

#[tokio::test]
async fn test_connect_unreachable_fails_after_retries() {
    let config = ChannelConfig {
        connect_attempts: 2,
        connect_backoff: Duration::from_millis(10),
        connect_jitter: Duration::ZERO,
        ..Default::default()
    };

    let err = SignalingChannel::connect("ws://127.0.0.1:1/signal", config)
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::ConnectFailed { .. }));
}
