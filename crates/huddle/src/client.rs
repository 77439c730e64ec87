//! `HuddleClient` builder and the `JoinedSession` handle.
//!
//! This is the entry point for joining a room. It ties together all the
//! layers: permissions → room directory → signaling channel → session
//! controller, then hands the controller to a driver task.

use huddle_protocol::{Codec, JsonCodec};
use huddle_room::{
    LocalIdentity, RoomDirectory, RoomEvent, RoomInfo, RoomSnapshot, SessionController,
    SessionConfig, SignalSink,
};
use huddle_session::{Device, IceServer, MediaNegotiator, PermissionProbe};
use huddle_transport::Connection;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::driver::{self, Intent};
use crate::{ChannelConfig, HuddleError, SignalingChannel};

/// Default relay endpoint.
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8443/signal";

/// Room for a handful of queued UI intents.
const INTENT_QUEUE: usize = 16;

/// Builder for configuring a [`HuddleClient`].
///
/// # Example
///
/// ```rust,ignore
/// use huddle::prelude::*;
///
/// let client = HuddleClient::builder()
///     .url("wss://relay.example.com/signal")
///     .build(negotiator, directory);
/// let session = client.join(identity, &permissions).await?;
/// ```
#[derive(Debug, Clone)]
pub struct HuddleClientBuilder {
    url: String,
    session_config: SessionConfig,
    channel_config: ChannelConfig,
}

impl HuddleClientBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            url: DEFAULT_RELAY_URL.to_string(),
            session_config: SessionConfig::default(),
            channel_config: ChannelConfig::default(),
        }
    }

    /// Sets the signaling relay's WebSocket URL.
    pub fn url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets the signaling channel configuration.
    pub fn channel_config(mut self, config: ChannelConfig) -> Self {
        self.channel_config = config;
        self
    }

    /// Replaces the STUN/TURN servers handed to negotiation handles.
    pub fn ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.session_config.ice_servers = servers;
        self
    }

    /// Builds the client around a media backend and a room directory.
    pub fn build<N, D>(self, negotiator: N, directory: D) -> HuddleClient<N, D>
    where
        N: MediaNegotiator + Clone,
        D: RoomDirectory + Clone,
    {
        HuddleClient {
            url: self.url,
            session_config: self.session_config.validated(),
            channel_config: self.channel_config.validated(),
            negotiator,
            directory,
        }
    }
}

impl Default for HuddleClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Joins rooms. One client can join any number of rooms, one
/// [`JoinedSession`] each.
#[derive(Debug, Clone)]
pub struct HuddleClient<N, D> {
    url: String,
    session_config: SessionConfig,
    channel_config: ChannelConfig,
    negotiator: N,
    directory: D,
}

impl HuddleClient<(), ()> {
    /// Creates a new builder.
    pub fn builder() -> HuddleClientBuilder {
        HuddleClientBuilder::new()
    }
}

impl<N, D> HuddleClient<N, D>
where
    N: MediaNegotiator + Clone,
    D: RoomDirectory + Clone,
{
    /// The relay URL [`join`](Self::join) connects to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Joins a room over a fresh WebSocket to the relay.
    ///
    /// Permissions are checked and the room resolved before the relay is
    /// contacted, so a refused permission never opens a connection.
    ///
    /// # Errors
    /// - [`HuddleError::Room`] for denied permissions, an unknown or full
    ///   room, or failed capture
    /// - [`HuddleError::Transport`] if the relay cannot be reached
    pub async fn join<P: PermissionProbe>(
        &self,
        identity: LocalIdentity,
        permissions: &P,
    ) -> Result<JoinedSession, HuddleError> {
        let mut controller = self.prepare(identity, permissions).await?;
        let channel = match SignalingChannel::connect(&self.url, self.channel_config.clone()).await
        {
            Ok(channel) => channel,
            Err(e) => {
                controller.on_channel_closed();
                return Err(e.into());
            }
        };
        self.start(controller, channel)
    }

    /// Joins a room over an already established connection, speaking JSON.
    pub async fn join_over<P, T>(
        &self,
        identity: LocalIdentity,
        permissions: &P,
        conn: T,
    ) -> Result<JoinedSession, HuddleError>
    where
        P: PermissionProbe,
        T: Connection,
    {
        self.join_with_codec(identity, permissions, conn, JsonCodec)
            .await
    }

    /// Joins a room over an established connection with a custom codec.
    pub async fn join_with_codec<P, T, C>(
        &self,
        identity: LocalIdentity,
        permissions: &P,
        conn: T,
        codec: C,
    ) -> Result<JoinedSession, HuddleError>
    where
        P: PermissionProbe,
        T: Connection,
        C: Codec,
    {
        let controller = match self.prepare(identity, permissions).await {
            Ok(controller) => controller,
            Err(e) => {
                if let Err(close_err) = conn.close().await {
                    tracing::debug!(error = %close_err, "closing unused connection failed");
                }
                return Err(e);
            }
        };
        let channel = SignalingChannel::open(conn, codec, self.channel_config.clone());
        self.start(controller, channel)
    }

    async fn prepare<P: PermissionProbe>(
        &self,
        identity: LocalIdentity,
        permissions: &P,
    ) -> Result<SessionController<N, D>, HuddleError> {
        let mut controller = SessionController::new(
            self.session_config.clone(),
            identity,
            self.negotiator.clone(),
            self.directory.clone(),
        );
        controller.acquire_permissions(permissions).await?;
        controller.resolve_room().await?;
        Ok(controller)
    }

    fn start(
        &self,
        mut controller: SessionController<N, D>,
        channel: SignalingChannel,
    ) -> Result<JoinedSession, HuddleError> {
        let inbound = channel.on_message();
        let sink = channel.clone();
        if let Err(e) = controller.join(channel) {
            sink.close();
            return Err(e.into());
        }

        let room = controller.room().cloned().ok_or(HuddleError::SessionEnded)?;
        let events = controller.take_events().ok_or(HuddleError::SessionEnded)?;
        let snapshot = controller.subscribe();
        let (intents_tx, intents_rx) = mpsc::channel(INTENT_QUEUE);
        let driver = tokio::spawn(driver::run(controller, inbound, intents_rx));

        Ok(JoinedSession {
            room,
            intents: intents_tx,
            events,
            snapshot,
            driver: Some(driver),
        })
    }
}

/// The UI's handle on a joined room.
///
/// Dropping it leaves the room.
#[derive(Debug)]
pub struct JoinedSession {
    room: RoomInfo,
    intents: mpsc::Sender<Intent>,
    events: mpsc::UnboundedReceiver<RoomEvent>,
    snapshot: watch::Receiver<RoomSnapshot>,
    driver: Option<JoinHandle<()>>,
}

impl JoinedSession {
    /// The room as resolved before joining.
    pub fn room(&self) -> &RoomInfo {
        &self.room
    }

    /// The current state of the room.
    pub fn snapshot(&self) -> RoomSnapshot {
        self.snapshot.borrow().clone()
    }

    /// A receiver that is notified whenever the snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshot.clone()
    }

    /// The next room event, or `None` once the session has ended and every
    /// event was read.
    pub async fn next_event(&mut self) -> Option<RoomEvent> {
        self.events.recv().await
    }

    /// Turns one of our devices on or off. Returns `true` if it changed.
    ///
    /// # Errors
    /// [`HuddleError::Room`] or [`HuddleError::SessionEnded`] once the
    /// session is over.
    pub async fn set_device(&self, device: Device, enabled: bool) -> Result<bool, HuddleError> {
        let (reply, rx) = oneshot::channel();
        self.request(Intent::SetDevice {
            device,
            enabled,
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| HuddleError::SessionEnded)?
            .map_err(HuddleError::from)
    }

    /// Flips one of our devices. Returns the new state.
    pub async fn toggle_device(&self, device: Device) -> Result<bool, HuddleError> {
        let (reply, rx) = oneshot::channel();
        self.request(Intent::Toggle { device, reply }).await?;
        rx.await
            .map_err(|_| HuddleError::SessionEnded)?
            .map_err(HuddleError::from)
    }

    /// Leaves the room and waits for the session to wind down. Leaving a
    /// session that already ended is not an error.
    pub async fn leave(mut self) -> Result<(), HuddleError> {
        let (reply, rx) = oneshot::channel();
        if self.request(Intent::Leave { reply }).await.is_ok() {
            let _ = rx.await;
        }
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                tracing::error!(error = %e, "session driver panicked");
            }
        }
        Ok(())
    }

    async fn request(&self, intent: Intent) -> Result<(), HuddleError> {
        self.intents
            .send(intent)
            .await
            .map_err(|_| HuddleError::SessionEnded)
    }
}
