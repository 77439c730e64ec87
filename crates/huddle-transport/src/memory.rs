//! In-process connection pair.
//!
//! Each side owns the sender towards its peer. Closing one side drops that
//! sender, so the peer's next `recv` returns `Ok(None)` once queued
//! messages are drained, exactly like a clean WebSocket close.

use std::sync::Mutex as StdMutex;

use tokio::sync::{mpsc, Mutex};

use crate::{Connection, ConnectionId, TransportError};

/// One end of an in-memory connection. Create both ends with
/// [`MemoryConnection::pair`].
pub struct MemoryConnection {
    id: ConnectionId,
    tx: StdMutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MemoryConnection {
    /// Creates two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a = Self {
            id: ConnectionId::next(),
            tx: StdMutex::new(Some(a_tx)),
            rx: Mutex::new(a_rx),
        };
        let b = Self {
            id: ConnectionId::next(),
            tx: StdMutex::new(Some(b_tx)),
            rx: Mutex::new(b_rx),
        };
        (a, b)
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Vec<u8>>> {
        match self.tx.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let tx = self.sender().ok_or_else(|| {
            TransportError::ConnectionClosed(format!("{} closed locally", self.id))
        })?;
        tx.send(data.to_vec()).map_err(|_| {
            TransportError::ConnectionClosed(format!("{} peer gone", self.id))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        let taken = match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if taken.is_some() {
            tracing::trace!(id = %self.id, "memory connection closed");
        }
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_in_both_directions() {
        let (a, b) = MemoryConnection::pair();

        a.send(b"ping").await.unwrap();
        b.send(b"pong").await.unwrap();

        assert_eq!(b.recv().await.unwrap().unwrap(), b"ping");
        assert_eq!(a.recv().await.unwrap().unwrap(), b"pong");
    }

    #[tokio::test]
    async fn test_close_drains_queue_then_returns_none() {
        let (a, b) = MemoryConnection::pair();
        a.send(b"last words").await.unwrap();

        a.close().await.unwrap();

        assert_eq!(b.recv().await.unwrap().unwrap(), b"last words");
        assert!(b.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_twice_is_ok() {
        let (a, _b) = MemoryConnection::pair();
        a.close().await.unwrap();
        a.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (a, _b) = MemoryConnection::pair();
        a.close().await.unwrap();

        let result = a.send(b"too late").await;

        assert!(matches!(result, Err(TransportError::ConnectionClosed(_))));
    }

    #[tokio::test]
    async fn test_send_to_dropped_peer_fails() {
        let (a, b) = MemoryConnection::pair();
        drop(b);

        let result = a.send(b"anyone?").await;

        assert!(matches!(result, Err(TransportError::ConnectionClosed(_))));
    }
}
