//! The signaling channel: one control connection to the relay.
//!
//! [`SignalingChannel::open`] wraps a [`Connection`] and spawns three tasks:
//!
//! - **reader**: decodes inbound frames and hands them to the installed
//!   dispatcher ([`SignalingChannel::on_message`])
//! - **writer**: drains the outbound queue onto the connection, then closes
//!   the connection once the queue is shut
//! - **keep-alive**: queues a `pingPong` every heartbeat interval
//!
//! The channel is also the controller's [`SignalSink`]. Sending only
//! queues, so the controller never waits on the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use huddle_heartbeat::{Heartbeat, HeartbeatConfig};
use huddle_protocol::{decode_signal, Codec, JsonCodec, ProtocolError, SignalMessage};
use huddle_room::SignalSink;
use huddle_transport::{Connection, ConnectionId, TransportError, WebSocketConnection};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the signaling channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Keep-alive cadence. 10 seconds by default.
    pub heartbeat: HeartbeatConfig,
    /// Connection attempts made by [`SignalingChannel::connect`], first
    /// one included.
    pub connect_attempts: u32,
    /// Base delay between attempts. Attempt `n` waits `n * backoff`.
    pub connect_backoff: Duration,
    /// Upper bound of the random delay added to each backoff.
    pub connect_jitter: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            connect_attempts: 3,
            connect_backoff: Duration::from_millis(500),
            connect_jitter: Duration::from_millis(250),
        }
    }
}

impl ChannelConfig {
    /// Clamps out-of-range values so the config is safe to use.
    pub fn validated(mut self) -> Self {
        if self.connect_attempts == 0 {
            warn!("connect_attempts is zero, making one attempt");
            self.connect_attempts = 1;
        }
        self.heartbeat = self.heartbeat.validated();
        self
    }

    /// How long to wait after failed attempt number `attempt` (1-based).
    fn retry_delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.connect_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        self.connect_backoff * attempt + Duration::from_millis(jitter)
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// What the channel hands to its dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A decoded frame from the relay.
    Message(SignalMessage),
    /// The relay closed the connection or the transport failed. Always
    /// the last event of a stream.
    Closed,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State shared between the channel handle and its tasks.
struct State {
    /// Outbound queue. `None` once the channel is closed.
    outbound: Mutex<Option<mpsc::UnboundedSender<SignalMessage>>>,
    dispatch: Mutex<Dispatch>,
    ended: AtomicBool,
}

struct Dispatch {
    tx: Option<mpsc::UnboundedSender<ChannelEvent>>,
    /// Receiver created at open, handed to the first `on_message` so
    /// frames that arrive before it are not lost.
    initial: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
}

impl State {
    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<SignalMessage>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self) -> MutexGuard<'_, Dispatch> {
        self.dispatch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a message. Returns `false` if the channel is closed.
    fn enqueue(&self, message: SignalMessage) -> bool {
        match self.outbound().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    fn deliver(&self, event: ChannelEvent) {
        let dispatch = self.dispatch();
        match dispatch.tx.as_ref() {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!("dispatcher gone, dropping inbound event");
                }
            }
            None => debug!("no dispatcher installed, dropping inbound event"),
        }
    }

    /// The connection ended from the far side. Shuts the outbound queue
    /// and tells the dispatcher, once.
    fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        self.outbound().take();
        match self.dispatch().tx.take() {
            Some(tx) => {
                let _ = tx.send(ChannelEvent::Closed);
            }
            None => debug!("no dispatcher installed, channel end unobserved"),
        }
    }
}

// ---------------------------------------------------------------------------
// SignalingChannel
// ---------------------------------------------------------------------------

struct Inner {
    id: ConnectionId,
    state: Arc<State>,
    reader: JoinHandle<()>,
    keepalive: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state.outbound().take();
        self.keepalive.abort();
        self.reader.abort();
    }
}

/// Control channel to the signaling relay. Cheap to clone; clones share
/// the connection.
#[derive(Clone)]
pub struct SignalingChannel {
    inner: Arc<Inner>,
}

impl SignalingChannel {
    /// Connects to the relay over WebSocket.
    ///
    /// Retries up to `config.connect_attempts` times, waiting a growing
    /// backoff plus random jitter between attempts.
    ///
    /// # Errors
    /// The last attempt's [`TransportError`].
    pub async fn connect(url: &str, config: ChannelConfig) -> Result<Self, TransportError> {
        let config = config.validated();
        let mut attempt = 1;
        loop {
            match WebSocketConnection::connect(url).await {
                Ok(conn) => {
                    info!(url, attempt, "signaling channel connected");
                    return Ok(Self::open(conn, JsonCodec, config));
                }
                Err(e) if attempt < config.connect_attempts => {
                    let delay = config.retry_delay(attempt);
                    warn!(
                        url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "signaling connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(url, attempts = attempt, error = %e, "signaling connect failed");
                    return Err(e);
                }
            }
        }
    }

    /// Wraps an established connection and starts the channel's tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open<T: Connection, C: Codec>(conn: T, codec: C, config: ChannelConfig) -> Self {
        let config = config.validated();
        let id = conn.id();
        let conn = Arc::new(conn);
        let codec = Arc::new(codec);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let state = Arc::new(State {
            outbound: Mutex::new(Some(outbound_tx)),
            dispatch: Mutex::new(Dispatch {
                tx: Some(dispatch_tx),
                initial: Some(dispatch_rx),
            }),
            ended: AtomicBool::new(false),
        });

        tokio::spawn(write_loop(
            Arc::clone(&conn),
            Arc::clone(&codec),
            outbound_rx,
        ));
        let reader = tokio::spawn(read_loop(conn, codec, Arc::clone(&state)));
        let keepalive = tokio::spawn(keepalive_loop(
            Heartbeat::new(config.heartbeat),
            Arc::clone(&state),
        ));

        debug!(%id, "signaling channel open");
        Self {
            inner: Arc::new(Inner {
                id,
                state,
                reader,
                keepalive,
            }),
        }
    }

    /// Installs the dispatcher and returns its event stream.
    ///
    /// Only one dispatcher is active. Installing another ends the previous
    /// stream. The first call also receives frames that arrived before it.
    pub fn on_message(&self) -> mpsc::UnboundedReceiver<ChannelEvent> {
        let mut dispatch = self.inner.state.dispatch();
        if let Some(initial) = dispatch.initial.take() {
            return initial;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        if self.inner.state.ended.load(Ordering::SeqCst) {
            let _ = tx.send(ChannelEvent::Closed);
        } else {
            dispatch.tx = Some(tx);
        }
        rx
    }

    /// The underlying connection's id.
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }
}

impl SignalSink for SignalingChannel {
    fn send(&self, message: SignalMessage) {
        let kind = message.kind();
        if self.inner.state.enqueue(message) {
            trace!(id = %self.inner.id, kind, "queued");
        } else {
            warn!(id = %self.inner.id, kind, "signaling channel not open, dropping message");
        }
    }

    /// Stops the keep-alive and the reader, lets the writer flush what is
    /// already queued, then closes the connection.
    fn close(&self) {
        let state = &self.inner.state;
        let Some(outbound) = state.outbound().take() else {
            return;
        };
        drop(outbound);
        self.inner.keepalive.abort();
        self.inner.reader.abort();
        state.ended.store(true, Ordering::SeqCst);
        state.dispatch().tx.take();
        debug!(id = %self.inner.id, "signaling channel closing");
    }

    fn is_open(&self) -> bool {
        self.inner.state.outbound().is_some()
    }
}

impl std::fmt::Debug for SignalingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingChannel")
            .field("id", &self.inner.id)
            .field("open", &self.is_open())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn read_loop<T: Connection, C: Codec>(conn: Arc<T>, codec: Arc<C>, state: Arc<State>) {
    let id = conn.id();
    loop {
        match conn.recv().await {
            Ok(Some(data)) => match decode_signal(codec.as_ref(), &data) {
                Ok(message) => {
                    trace!(%id, kind = message.kind(), "received");
                    state.deliver(ChannelEvent::Message(message));
                }
                Err(ProtocolError::UnknownKind(kind)) => {
                    error!(%id, %kind, "relay sent an unknown message kind, dropping");
                }
                Err(e) => {
                    warn!(%id, error = %e, len = data.len(), "malformed frame, dropping");
                }
            },
            Ok(None) => {
                info!(%id, "relay closed the signaling channel");
                break;
            }
            Err(e) => {
                warn!(%id, error = %e, "signaling receive failed");
                break;
            }
        }
    }
    state.end();
}

async fn write_loop<T: Connection, C: Codec>(
    conn: Arc<T>,
    codec: Arc<C>,
    mut outbound: mpsc::UnboundedReceiver<SignalMessage>,
) {
    let id = conn.id();
    while let Some(message) = outbound.recv().await {
        let bytes = match codec.encode(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(%id, kind = message.kind(), error = %e, "encode failed, dropping");
                continue;
            }
        };
        if let Err(e) = conn.send(&bytes).await {
            warn!(%id, kind = message.kind(), error = %e, "signaling send failed");
            break;
        }
    }
    if let Err(e) = conn.close().await {
        debug!(%id, error = %e, "close after flush failed");
    }
    debug!(%id, "signaling writer finished");
}

async fn keepalive_loop(mut heartbeat: Heartbeat, state: Arc<State>) {
    loop {
        let beat = heartbeat.wait_for_beat().await;
        if !state.enqueue(SignalMessage::ping()) {
            heartbeat.stop();
            break;
        }
        trace!(seq = beat.seq, "keep-alive queued");
    }
}
