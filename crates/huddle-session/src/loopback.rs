//! A scripted, in-process [`MediaNegotiator`].
//!
//! No media moves. Offers are synthetic SDP strings, every call is
//! recorded, and failures can be scripted per peer. Used by the test
//! suites and by the CLI demo's dry-run mode.
//!
//! ```
//! use huddle_session::loopback::{LoopbackNegotiator, LoopbackScript};
//!
//! let backend = LoopbackNegotiator::with_script(LoopbackScript {
//!     fail_offers_for: vec!["mallory".into()],
//!     ..LoopbackScript::default()
//! });
//! assert_eq!(backend.live_handles(), 0);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use huddle_protocol::{IceCandidate, ParticipantName};

use crate::{
    Device, DeviceFlags, Direction, HandleSpec, LocalMedia, MediaNegotiator, NegotiationError,
    NegotiationHandle, PeerEvents,
};

/// What the loopback backend should do.
#[derive(Debug, Clone, Default)]
pub struct LoopbackScript {
    /// Fail `capture()`.
    pub fail_capture: bool,
    /// Peers whose offer generation fails.
    pub fail_offers_for: Vec<ParticipantName>,
    /// Peers whose answer is rejected.
    pub fail_answers_for: Vec<ParticipantName>,
    /// Peers whose remote candidates are rejected.
    pub fail_candidates_for: Vec<ParticipantName>,
    /// Report `Connected` as soon as an answer is applied.
    pub auto_connect: bool,
    /// Number of local candidates reported after each offer.
    pub gather_candidates: usize,
}

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopbackCall {
    Capture(DeviceFlags),
    Create {
        peer: ParticipantName,
        direction: Direction,
        generation: u64,
    },
    Offer {
        peer: ParticipantName,
        generation: u64,
    },
    Answer {
        peer: ParticipantName,
        sdp: String,
    },
    AddCandidate {
        peer: ParticipantName,
        candidate: IceCandidate,
    },
    Dispose {
        peer: ParticipantName,
        generation: u64,
    },
    SetEnabled {
        device: Device,
        enabled: bool,
    },
    Release,
}

#[derive(Debug, Default)]
struct Shared {
    script: Mutex<LoopbackScript>,
    calls: Mutex<Vec<LoopbackCall>>,
    live: AtomicUsize,
}

impl Shared {
    fn script(&self) -> MutexGuard<'_, LoopbackScript> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: LoopbackCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

/// The backend. Cheap to clone; clones share the script and call log.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNegotiator {
    shared: Arc<Shared>,
}

impl LoopbackNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: LoopbackScript) -> Self {
        let backend = Self::default();
        backend.set_script(script);
        backend
    }

    /// Replaces the script. Affects existing handles too.
    pub fn set_script(&self, script: LoopbackScript) {
        *self.shared.script() = script;
    }

    /// Every call so far, oldest first.
    pub fn calls(&self) -> Vec<LoopbackCall> {
        self.shared
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_calls(&self) {
        self.shared
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Handles created and not yet disposed.
    pub fn live_handles(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// How many offers were generated for `peer`.
    pub fn offers_for(&self, peer: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, LoopbackCall::Offer { peer: p, .. } if p.as_str() == peer))
            .count()
    }
}

impl MediaNegotiator for LoopbackNegotiator {
    type Handle = LoopbackHandle;
    type Media = LoopbackMedia;

    fn capture(&self, devices: DeviceFlags) -> Result<LoopbackMedia, NegotiationError> {
        if self.shared.script().fail_capture {
            return Err(NegotiationError::Capture("scripted capture failure".into()));
        }
        self.shared.record(LoopbackCall::Capture(devices));
        Ok(LoopbackMedia {
            shared: Arc::clone(&self.shared),
            devices,
            released: false,
        })
    }

    fn create_handle(
        &self,
        spec: HandleSpec,
        _local: Option<&LoopbackMedia>,
    ) -> Result<LoopbackHandle, NegotiationError> {
        self.shared.record(LoopbackCall::Create {
            peer: spec.peer.clone(),
            direction: spec.direction,
            generation: spec.generation,
        });
        self.shared.live.fetch_add(1, Ordering::SeqCst);
        Ok(LoopbackHandle {
            shared: Arc::clone(&self.shared),
            peer: spec.peer,
            direction: spec.direction,
            generation: spec.generation,
            events: spec.events,
            disposed: false,
        })
    }
}

/// A fake peer connection.
#[derive(Debug)]
pub struct LoopbackHandle {
    shared: Arc<Shared>,
    peer: ParticipantName,
    direction: Direction,
    generation: u64,
    events: PeerEvents,
    disposed: bool,
}

impl LoopbackHandle {
    fn scripted_to_fail(&self, pick: fn(&LoopbackScript) -> &Vec<ParticipantName>) -> bool {
        pick(&self.shared.script()).contains(&self.peer)
    }
}

impl NegotiationHandle for LoopbackHandle {
    async fn generate_offer(&mut self) -> Result<String, NegotiationError> {
        if self.disposed {
            return Err(NegotiationError::Disposed);
        }
        self.shared.record(LoopbackCall::Offer {
            peer: self.peer.clone(),
            generation: self.generation,
        });
        if self.scripted_to_fail(|s| &s.fail_offers_for) {
            return Err(NegotiationError::Offer(format!(
                "scripted offer failure for {}",
                self.peer
            )));
        }

        let gather = self.shared.script().gather_candidates;
        for i in 0..gather {
            self.events.candidate(IceCandidate {
                candidate: format!(
                    "candidate:{i} 1 udp 2122260223 127.0.0.1 {} typ host",
                    50_000 + i
                ),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
            });
        }

        Ok(format!(
            "v=0\r\no=huddle-loopback {} 1 IN IP4 127.0.0.1\r\ns={}\r\na={}\r\n",
            self.generation, self.peer, self.direction
        ))
    }

    async fn process_answer(&mut self, sdp_answer: &str) -> Result<(), NegotiationError> {
        if self.disposed {
            return Err(NegotiationError::Disposed);
        }
        self.shared.record(LoopbackCall::Answer {
            peer: self.peer.clone(),
            sdp: sdp_answer.to_owned(),
        });
        if self.scripted_to_fail(|s| &s.fail_answers_for) {
            return Err(NegotiationError::Answer(format!(
                "scripted answer failure for {}",
                self.peer
            )));
        }
        if self.shared.script().auto_connect {
            self.events.connected();
        }
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), NegotiationError> {
        if self.disposed {
            return Err(NegotiationError::Disposed);
        }
        self.shared.record(LoopbackCall::AddCandidate {
            peer: self.peer.clone(),
            candidate: candidate.clone(),
        });
        if self.scripted_to_fail(|s| &s.fail_candidates_for) {
            return Err(NegotiationError::Candidate(candidate.candidate.clone()));
        }
        Ok(())
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.shared.live.fetch_sub(1, Ordering::SeqCst);
        self.shared.record(LoopbackCall::Dispose {
            peer: self.peer.clone(),
            generation: self.generation,
        });
    }
}

impl Drop for LoopbackHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Fake local capture. Tracks enablement only.
#[derive(Debug)]
pub struct LoopbackMedia {
    shared: Arc<Shared>,
    devices: DeviceFlags,
    released: bool,
}

impl LoopbackMedia {
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl LocalMedia for LoopbackMedia {
    fn set_enabled(&mut self, device: Device, enabled: bool) {
        self.devices.set(device, enabled);
        self.shared.record(LoopbackCall::SetEnabled { device, enabled });
    }

    fn is_enabled(&self, device: Device) -> bool {
        !self.released && self.devices.get(device)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.shared.record(LoopbackCall::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    use crate::{NegotiationEvent, NegotiationEventKind};

    fn spec(
        peer: &str,
        tx: mpsc::UnboundedSender<NegotiationEvent>,
    ) -> HandleSpec {
        HandleSpec {
            peer: peer.into(),
            direction: Direction::SendOnly,
            generation: 4,
            ice_servers: Vec::new(),
            events: PeerEvents::new(peer.into(), 4, tx),
        }
    }

    #[tokio::test]
    async fn test_offer_gathers_scripted_candidates() {
        let backend = LoopbackNegotiator::with_script(LoopbackScript {
            gather_candidates: 2,
            ..LoopbackScript::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = backend.create_handle(spec("me", tx), None).unwrap();

        let offer = handle.generate_offer().await.unwrap();

        assert!(offer.contains("sendonly"));
        for _ in 0..2 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.generation, 4);
            assert!(matches!(event.kind, NegotiationEventKind::LocalCandidate(_)));
        }
    }

    #[tokio::test]
    async fn test_auto_connect_reports_connected() {
        let backend = LoopbackNegotiator::with_script(LoopbackScript {
            auto_connect: true,
            ..LoopbackScript::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = backend.create_handle(spec("a", tx), None).unwrap();
        handle.generate_offer().await.unwrap();

        handle.process_answer("v=0").await.unwrap();

        assert_eq!(rx.recv().await.unwrap().kind, NegotiationEventKind::Connected);
    }

    #[test]
    fn test_drop_counts_as_dispose() {
        let backend = LoopbackNegotiator::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = backend.create_handle(spec("a", tx), None).unwrap();
        assert_eq!(backend.live_handles(), 1);

        drop(handle);

        assert_eq!(backend.live_handles(), 0);
    }

    #[test]
    fn test_media_release_disables_everything() {
        let backend = LoopbackNegotiator::new();
        let mut media = backend.capture(DeviceFlags::all_on()).unwrap();

        media.release();
        media.release();

        assert!(!media.is_enabled(Device::Camera));
        let releases = backend
            .calls()
            .into_iter()
            .filter(|c| *c == LoopbackCall::Release)
            .count();
        assert_eq!(releases, 1);
    }

    #[test]
    fn test_scripted_capture_failure() {
        let backend = LoopbackNegotiator::with_script(LoopbackScript {
            fail_capture: true,
            ..LoopbackScript::default()
        });

        assert!(matches!(
            backend.capture(DeviceFlags::all_on()),
            Err(NegotiationError::Capture(_))
        ));
    }
}
