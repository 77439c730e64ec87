//! The per-session driver task.
//!
//! One task owns the [`SessionController`] and feeds it from four sources
//! in a single `select!` loop: UI intents, signaling channel events,
//! negotiation events and the stall sweep. Each branch runs to
//! completion before the next is polled.

use huddle_room::{RoomDirectory, RoomError, SessionController};
use huddle_session::{Device, MediaNegotiator};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::ChannelEvent;

/// A request from the [`JoinedSession`](crate::JoinedSession) handle.
#[derive(Debug)]
pub(crate) enum Intent {
    SetDevice {
        device: Device,
        enabled: bool,
        reply: oneshot::Sender<Result<bool, RoomError>>,
    },
    Toggle {
        device: Device,
        reply: oneshot::Sender<Result<bool, RoomError>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
}

/// Runs until the session is closed.
///
/// When every intent sender is gone (the UI dropped its handle) the
/// session leaves the room.
pub(crate) async fn run<N, D>(
    mut controller: SessionController<N, D>,
    mut channel: mpsc::UnboundedReceiver<ChannelEvent>,
    mut intents: mpsc::Receiver<Intent>,
) where
    N: MediaNegotiator,
    D: RoomDirectory,
{
    let Some(mut negotiation) = controller.take_negotiation_events() else {
        tracing::error!("negotiation events already taken, driver not started");
        controller.leave().await;
        return;
    };

    let period = controller.config().sweep_interval();
    let mut sweep = time::interval_at(Instant::now() + period, period);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(room = %controller.identity().room, "session driver started");

    while !controller.phase().is_closed() {
        tokio::select! {
            intent = intents.recv() => match intent {
                Some(intent) => apply(&mut controller, intent).await,
                None => {
                    tracing::debug!("session handle dropped, leaving");
                    controller.leave().await;
                }
            },
            event = channel.recv() => match event {
                Some(ChannelEvent::Message(message)) => controller.handle_message(message).await,
                Some(ChannelEvent::Closed) | None => controller.on_channel_closed(),
            },
            Some(event) = negotiation.recv() => {
                controller.handle_negotiation_event(event).await;
            }
            _ = sweep.tick() => {
                let expired = controller.expire_stalled(Instant::now()).await;
                if expired > 0 {
                    tracing::debug!(expired, "stalled negotiations swept");
                }
            }
        }
    }

    // Answer whatever the UI queued while we were closing.
    intents.close();
    while let Some(intent) = intents.recv().await {
        apply(&mut controller, intent).await;
    }

    tracing::debug!(room = %controller.identity().room, "session driver finished");
}

async fn apply<N, D>(controller: &mut SessionController<N, D>, intent: Intent)
where
    N: MediaNegotiator,
    D: RoomDirectory,
{
    match intent {
        Intent::SetDevice {
            device,
            enabled,
            reply,
        } => {
            let _ = reply.send(controller.set_device(device, enabled));
        }
        Intent::Toggle { device, reply } => {
            let _ = reply.send(controller.toggle_device(device));
        }
        Intent::Leave { reply } => {
            controller.leave().await;
            let _ = reply.send(());
        }
    }
}
