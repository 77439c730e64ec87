use clap::Parser;
use huddle::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Parser, Debug, PartialEq, Eq)]
#[command(name = "huddle-cli", about = "Join a huddle video room from the terminal")]
struct Args {
    /// Talk to an in-process relay instead of a real one.
    #[arg(long)]
    dry_run: bool,

    /// Room to join.
    room: String,

    /// Display name in the room.
    name: String,

    /// Signaling relay WebSocket URL.
    #[arg(long, env = "HUDDLE_RELAY_URL", default_value = DEFAULT_RELAY_URL)]
    url: String,
}

// ---------------------------------------------------------------------------
// Console commands
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Toggle(Device),
    Who,
    Leave,
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim() {
        "cam" | "camera" => Some(Command::Toggle(Device::Camera)),
        "mic" | "microphone" => Some(Command::Toggle(Device::Microphone)),
        "speaker" => Some(Command::Toggle(Device::Speaker)),
        "who" => Some(Command::Who),
        "leave" | "quit" | "q" => Some(Command::Leave),
        _ => None,
    }
}

fn describe(event: &RoomEvent) -> String {
    match event {
        RoomEvent::Joined { room, existing } => {
            format!("joined {room} with {} other(s)", existing.len())
        }
        RoomEvent::ParticipantJoined(p) => format!("{} joined", p.name),
        RoomEvent::ParticipantLeft(name) => format!("{name} left"),
        RoomEvent::DeviceChanged {
            name,
            device,
            enabled,
        } => format!("{name} turned {device} {}", if *enabled { "on" } else { "off" }),
        RoomEvent::OccupancyChanged(n) => format!("{n} in the room"),
        RoomEvent::NegotiationFailed { name, attempts } => {
            format!("gave up on {name}'s media after {attempts} attempt(s)")
        }
        RoomEvent::Closed(reason) => format!("session closed: {reason:?}"),
    }
}

// ---------------------------------------------------------------------------
// Dry-run relay
// ---------------------------------------------------------------------------

/// What an in-process relay answers to one client message.
fn relay_reply(message: &SignalMessage, peers: &[ParticipantName]) -> Vec<SignalMessage> {
    match message {
        SignalMessage::JoinRoom { .. } => vec![SignalMessage::ExistingParticipants {
            data: peers.to_vec(),
        }],
        SignalMessage::ReceiveVideoFrom { sender, .. } => vec![SignalMessage::ReceiveVideoAnswer {
            profile: ParticipantProfile {
                user_id: UserId::from(format!("dry-{sender}")),
                name: sender.clone(),
                profile_image: None,
                cam_enabled: true,
                mic_enabled: true,
                speaker_enabled: true,
            },
            sdp_answer: format!("v=0 dry-run answer for {sender}"),
        }],
        SignalMessage::PingPong { .. } => vec![SignalMessage::PingPong {
            message: "pong".into(),
        }],
        _ => Vec::new(),
    }
}

async fn run_dry_relay(conn: MemoryConnection, peers: Vec<ParticipantName>) {
    let codec = JsonCodec;
    while let Ok(Some(frame)) = conn.recv().await {
        let message = match decode_signal(&codec, &frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "dry-run relay could not decode frame");
                continue;
            }
        };
        for reply in relay_reply(&message, &peers) {
            let Ok(bytes) = codec.encode(&reply) else {
                continue;
            };
            if conn.send(&bytes).await.is_err() {
                return;
            }
        }
    }
    tracing::debug!("dry-run relay finished");
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,huddle=debug".into()),
        )
        .init();

    let args = Args::parse();

    let directory = StaticDirectory::new().with_room(RoomInfo::new(args.room.as_str(), args.room.as_str(), 0));
    let negotiator = LoopbackNegotiator::with_script(LoopbackScript {
        auto_connect: true,
        ..Default::default()
    });
    let client = HuddleClient::builder()
        .url(&args.url)
        .build(negotiator, directory);
    let identity = LocalIdentity::new(
        std::process::id().to_string(),
        args.name.as_str(),
        args.room.as_str(),
    );

    let mut session = if args.dry_run {
        let (client_end, relay_end) = MemoryConnection::pair();
        let peers = vec![ParticipantName::from("echo-1"), ParticipantName::from("echo-2")];
        tokio::spawn(run_dry_relay(relay_end, peers));
        client
            .join_over(identity, &Permissions::granted(), client_end)
            .await?
    } else {
        eprintln!("connecting to {}", client.url());
        client.join(identity, &Permissions::granted()).await?
    };

    eprintln!("in room {:?}; commands: cam, mic, speaker, who, leave", session.room().title);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = session.next_event() => match event {
                Some(event) => {
                    eprintln!("{}", describe(&event));
                    if matches!(event, RoomEvent::Closed(_)) {
                        return Ok(());
                    }
                }
                None => return Ok(()),
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_command(&line) {
                    Some(Command::Toggle(device)) => {
                        let on = session.toggle_device(device).await?;
                        eprintln!("{device} {}", if on { "on" } else { "off" });
                    }
                    Some(Command::Who) => {
                        let snapshot = session.snapshot();
                        eprintln!("{} (you), {:?}", snapshot.local.name, snapshot.remote_names());
                    }
                    Some(Command::Leave) => break,
                    None => eprintln!("unknown command {:?}", line.trim()),
                }
            }
        }
    }

    session.leave().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_positional_and_flags() {
        let parsed = Args::try_parse_from([
            "huddle-cli",
            "--dry-run",
            "r1",
            "ana",
            "--url",
            "ws://relay/signal",
        ])
        .unwrap();
        assert_eq!(
            parsed,
            Args {
                dry_run: true,
                room: "r1".into(),
                name: "ana".into(),
                url: "ws://relay/signal".into(),
            }
        );
    }

    #[test]
    fn test_args_parse_missing_name_rejected() {
        let err = Args::try_parse_from(["huddle-cli", "r1"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_args_parse_unknown_flag_rejected() {
        let err = Args::try_parse_from(["huddle-cli", "--loud", "r1", "ana"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_args_command_definition_valid() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command(" cam\n"), Some(Command::Toggle(Device::Camera)));
        assert_eq!(parse_command("q"), Some(Command::Leave));
        assert_eq!(parse_command("dance"), None);
    }

    #[test]
    fn test_relay_reply_join_lists_peers() {
        let peers = vec![ParticipantName::from("x")];
        let join = SignalMessage::JoinRoom {
            user_id: "1".into(),
            name: "ana".into(),
            room: "r1".into(),
            cam_enabled: true,
            mic_enabled: true,
            speaker_enabled: true,
        };

        assert_eq!(
            relay_reply(&join, &peers),
            vec![SignalMessage::ExistingParticipants { data: peers.clone() }]
        );
        assert!(relay_reply(&SignalMessage::LeaveRoom, &peers).is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_session_joins_and_leaves() {
        let (client_end, relay_end) = MemoryConnection::pair();
        tokio::spawn(run_dry_relay(relay_end, vec!["echo".into()]));
        let client = HuddleClient::builder().build(
            LoopbackNegotiator::with_script(LoopbackScript {
                auto_connect: true,
                ..Default::default()
            }),
            StaticDirectory::new().with_room(RoomInfo::new("r1", "r1", 0)),
        );

        let mut session = client
            .join_over(LocalIdentity::new("1", "ana", "r1"), &Permissions::granted(), client_end)
            .await
            .unwrap();

        loop {
            match session.next_event().await.unwrap() {
                RoomEvent::OccupancyChanged(2) => break,
                RoomEvent::Closed(reason) => panic!("closed early: {reason:?}"),
                _ => {}
            }
        }
        assert_eq!(session.snapshot().remote_names(), ["echo"]);
        session.leave().await.unwrap();
    }
}
