//! The outbound side of the signaling channel, as the controller sees it.

use std::sync::{Arc, Mutex, PoisonError};

use huddle_protocol::SignalMessage;

/// Where the controller sends signaling messages.
///
/// Sending is fire-and-forget: implementations queue the message and
/// report transport problems through their own logging. Sending on a
/// closed sink is a no-op.
pub trait SignalSink: Send + Sync + 'static {
    fn send(&self, message: SignalMessage);

    /// Flushes anything queued, then closes. Idempotent.
    fn close(&self);

    fn is_open(&self) -> bool;
}

#[derive(Debug, Default)]
struct Recorded {
    sent: Vec<SignalMessage>,
    closed: bool,
}

/// A sink that records what it was given. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent while open, oldest first.
    pub fn sent(&self) -> Vec<SignalMessage> {
        self.lock().sent.clone()
    }

    /// The `kind` of every sent message, oldest first.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.lock().sent.iter().map(SignalMessage::kind).collect()
    }

    /// Drops the record (keeps the open/closed state).
    pub fn clear(&self) {
        self.lock().sent.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SignalSink for RecordingSink {
    fn send(&self, message: SignalMessage) {
        let mut inner = self.lock();
        if inner.closed {
            tracing::warn!(kind = message.kind(), "send on closed sink, dropping");
            return;
        }
        inner.sent.push(message);
    }

    fn close(&self) {
        self.lock().closed = true;
    }

    fn is_open(&self) -> bool {
        !self.lock().closed
    }
}
