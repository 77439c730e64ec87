//! The per-peer negotiation engine.
//!
//! [`Negotiation`] wraps one backend [`NegotiationHandle`] and enforces the
//! order of the offer/answer/candidate exchange:
//!
//! ```text
//! Idle ──start()──→ OfferGenerated ──apply_answer()──→ AnswerApplied
//!                        │                                  │
//!                        │ (remote candidates queued)       │ add_remote_candidate()
//!                        │                                  ▼
//!                        │                        CandidatesExchanging
//!                        │                                  │ mark_connected()
//!                        ▼                                  ▼
//!                     Failed ←──── any backend error     Active
//!
//!                 dispose() from anywhere ──→ Disposed (terminal)
//! ```
//!
//! The wrapper owns the handle. Dropping it disposes the handle, so a
//! registry entry going away can never leak a peer connection.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use huddle_protocol::{IceCandidate, ParticipantName};
use tokio::time::Instant;

use crate::{Direction, NegotiationError, NegotiationHandle};

/// Default cap on remote candidates queued per handle (and per orphan name).
pub const DEFAULT_MAX_PENDING_CANDIDATES: usize = 64;

/// Default cap on distinct names the orphan buffer holds candidates for.
pub const DEFAULT_MAX_ORPHAN_NAMES: usize = 16;

/// Where a negotiation is in the offer/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    Idle,
    OfferGenerated,
    AnswerApplied,
    CandidatesExchanging,
    Active,
    Failed,
    Disposed,
}

impl NegotiationState {
    /// Whether the remote answer has been applied, i.e. remote candidates
    /// can go straight to the backend.
    pub fn accepts_candidates(&self) -> bool {
        matches!(
            self,
            Self::AnswerApplied | Self::CandidatesExchanging | Self::Active
        )
    }

    /// Whether the handle is still waiting on the exchange to finish.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::OfferGenerated | Self::AnswerApplied | Self::CandidatesExchanging
        )
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::OfferGenerated => "offer generated",
            Self::AnswerApplied => "answer applied",
            Self::CandidatesExchanging => "exchanging candidates",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

/// What happened to a remote candidate handed to
/// [`Negotiation::add_remote_candidate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Passed to the backend.
    Applied,
    /// Held until the answer is applied.
    Queued,
}

/// One media-negotiation session with a single peer (or the uplink).
pub struct Negotiation<H: NegotiationHandle> {
    peer: ParticipantName,
    direction: Direction,
    generation: u64,
    attempt: u32,
    handle: Option<H>,
    state: NegotiationState,
    pending: VecDeque<IceCandidate>,
    max_pending: usize,
    started_at: Instant,
}

impl<H: NegotiationHandle> Negotiation<H> {
    /// Wraps a freshly created backend handle. `attempt` starts at 1 and
    /// counts re-creations after a stall or failure.
    pub fn new(
        peer: ParticipantName,
        direction: Direction,
        generation: u64,
        attempt: u32,
        handle: H,
    ) -> Self {
        Self {
            peer,
            direction,
            generation,
            attempt,
            handle: Some(handle),
            state: NegotiationState::Idle,
            pending: VecDeque::new(),
            max_pending: DEFAULT_MAX_PENDING_CANDIDATES,
            started_at: Instant::now(),
        }
    }

    /// Overrides the cap on queued remote candidates.
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }

    pub fn peer(&self) -> &ParticipantName {
        &self.peer
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Number of remote candidates waiting for the answer.
    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.state == NegotiationState::Disposed
    }

    /// Generates the local offer. Only valid from `Idle`.
    ///
    /// # Errors
    /// Backend failures move the negotiation to `Failed`.
    pub async fn start(&mut self) -> Result<String, NegotiationError> {
        self.expect_state(NegotiationState::Idle, "generate offer")?;
        let handle = self.handle.as_mut().ok_or(NegotiationError::Disposed)?;

        match handle.generate_offer().await {
            Ok(offer) => {
                self.state = NegotiationState::OfferGenerated;
                self.started_at = Instant::now();
                Ok(offer)
            }
            Err(e) => {
                self.state = NegotiationState::Failed;
                Err(e)
            }
        }
    }

    /// Applies the remote answer, then flushes every queued candidate.
    ///
    /// Returns how many queued candidates the backend accepted. A rejected
    /// queued candidate is logged and skipped; it does not fail the answer.
    pub async fn apply_answer(&mut self, sdp_answer: &str) -> Result<usize, NegotiationError> {
        self.expect_state(NegotiationState::OfferGenerated, "apply answer")?;
        let handle = self.handle.as_mut().ok_or(NegotiationError::Disposed)?;

        if let Err(e) = handle.process_answer(sdp_answer).await {
            self.state = NegotiationState::Failed;
            return Err(e);
        }
        self.state = NegotiationState::AnswerApplied;

        let mut applied = 0;
        while let Some(candidate) = self.pending.pop_front() {
            match handle.add_ice_candidate(&candidate).await {
                Ok(()) => applied += 1,
                Err(e) => tracing::warn!(
                    peer = %self.peer,
                    error = %e,
                    "queued ice candidate rejected"
                ),
            }
        }
        if applied > 0 {
            self.state = NegotiationState::CandidatesExchanging;
        }
        Ok(applied)
    }

    /// Adds one remote candidate, or queues it if the answer is not in yet.
    ///
    /// The queue is bounded; when full the oldest candidate is dropped.
    pub async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<CandidateOutcome, NegotiationError> {
        match self.state {
            NegotiationState::Idle | NegotiationState::OfferGenerated => {
                if self.pending.len() >= self.max_pending {
                    self.pending.pop_front();
                    tracing::warn!(
                        peer = %self.peer,
                        cap = self.max_pending,
                        "candidate queue full, dropping oldest"
                    );
                }
                self.pending.push_back(candidate);
                Ok(CandidateOutcome::Queued)
            }
            state if state.accepts_candidates() => {
                let handle = self.handle.as_mut().ok_or(NegotiationError::Disposed)?;
                handle.add_ice_candidate(&candidate).await?;
                if self.state == NegotiationState::AnswerApplied {
                    self.state = NegotiationState::CandidatesExchanging;
                }
                Ok(CandidateOutcome::Applied)
            }
            NegotiationState::Disposed => Err(NegotiationError::Disposed),
            state => Err(NegotiationError::InvalidState {
                state,
                operation: "add ice candidate",
            }),
        }
    }

    /// Records that media is flowing. Ignored unless the answer has been
    /// applied. Returns `true` if the state changed.
    pub fn mark_connected(&mut self) -> bool {
        if self.state.accepts_candidates() && self.state != NegotiationState::Active {
            self.state = NegotiationState::Active;
            true
        } else {
            false
        }
    }

    /// Records a post-negotiation failure. No-op once disposed.
    pub fn mark_failed(&mut self) {
        if self.state != NegotiationState::Disposed {
            self.state = NegotiationState::Failed;
        }
    }

    /// Releases the backend handle. Idempotent: returns `true` only the
    /// first time.
    pub fn dispose(&mut self) -> bool {
        match self.handle.take() {
            Some(mut handle) => {
                handle.dispose();
                self.pending.clear();
                self.state = NegotiationState::Disposed;
                tracing::debug!(peer = %self.peer, direction = %self.direction, "handle disposed");
                true
            }
            None => false,
        }
    }

    /// Whether the exchange has been pending longer than `timeout`.
    /// Failed handles count as stalled so the sweep retries them.
    pub fn is_stalled(&self, now: Instant, timeout: Duration) -> bool {
        match self.state {
            NegotiationState::Failed => true,
            state if state.is_pending() => now.saturating_duration_since(self.started_at) >= timeout,
            _ => false,
        }
    }

    fn expect_state(
        &self,
        expected: NegotiationState,
        operation: &'static str,
    ) -> Result<(), NegotiationError> {
        match self.state {
            s if s == expected => Ok(()),
            NegotiationState::Disposed => Err(NegotiationError::Disposed),
            state => Err(NegotiationError::InvalidState { state, operation }),
        }
    }
}

impl<H: NegotiationHandle> Drop for Negotiation<H> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<H: NegotiationHandle> fmt::Debug for Negotiation<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiation")
            .field("peer", &self.peer)
            .field("direction", &self.direction)
            .field("generation", &self.generation)
            .field("attempt", &self.attempt)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Orphan candidates
// ---------------------------------------------------------------------------

/// Remote candidates that arrived for a name with no handle yet.
///
/// They are replayed into the handle once it is created. Bounded per name
/// (the oldest candidate goes first) and in the number of names (the name
/// buffered longest goes first), so candidates for names that never
/// arrive cannot pile up.
#[derive(Debug)]
pub struct CandidateBuffer {
    by_name: HashMap<ParticipantName, VecDeque<IceCandidate>>,
    /// Names in the order they were first buffered.
    order: VecDeque<ParticipantName>,
    max_per_name: usize,
    max_names: usize,
}

impl CandidateBuffer {
    pub fn new(max_per_name: usize) -> Self {
        Self {
            by_name: HashMap::new(),
            order: VecDeque::new(),
            max_per_name: max_per_name.max(1),
            max_names: DEFAULT_MAX_ORPHAN_NAMES,
        }
    }

    /// Sets how many distinct names may hold candidates at once.
    pub fn with_max_names(mut self, max_names: usize) -> Self {
        self.max_names = max_names.max(1);
        self
    }

    /// Buffers one candidate. Returns `true` if older candidates were
    /// dropped to make room, either from this name or from the name
    /// buffered longest.
    pub fn push(&mut self, name: ParticipantName, candidate: IceCandidate) -> bool {
        let mut dropped = false;
        if !self.by_name.contains_key(&name) {
            while self.by_name.len() >= self.max_names {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                if self.by_name.remove(&oldest).is_some() {
                    tracing::debug!(peer = %oldest, "evicting orphan candidates");
                    dropped = true;
                }
            }
            self.order.push_back(name.clone());
        }
        let queue = self.by_name.entry(name).or_default();
        if queue.len() >= self.max_per_name {
            queue.pop_front();
            dropped = true;
        }
        queue.push_back(candidate);
        dropped
    }

    /// Removes and returns everything buffered for `name`, oldest first.
    pub fn take(&mut self, name: &ParticipantName) -> Vec<IceCandidate> {
        self.forget(name).map(Vec::from).unwrap_or_default()
    }

    /// Forgets everything buffered for `name`. Returns how many were dropped.
    pub fn discard(&mut self, name: &ParticipantName) -> usize {
        self.forget(name).map_or(0, |q| q.len())
    }

    fn forget(&mut self, name: &ParticipantName) -> Option<VecDeque<IceCandidate>> {
        let queue = self.by_name.remove(name)?;
        self.order.retain(|n| n != name);
        Some(queue)
    }

    /// Total buffered candidates across all names.
    pub fn len(&self) -> usize {
        self.by_name.values().map(VecDeque::len).sum()
    }

    /// Number of names with something buffered.
    pub fn names(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
        self.order.clear();
    }
}

impl Default for CandidateBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING_CANDIDATES)
    }
}
