//! The participant registry: every remote peer in the room and its
//! receive-only negotiation.
//!
//! # Ownership
//!
//! The registry is a plain `HashMap` owned by the session controller and
//! mutated only from its driver task, so it needs no locking. Each entry
//! owns exactly one [`Negotiation`]; removing the entry disposes it. That
//! keeps registry entries and live receive handles 1:1.
//!
//! The local participant is stored separately and never appears in the
//! table, so occupancy is `len() + 1`.
//!
//! ```text
//! insert() ──→ [registered, handle Idle] ──→ renegotiate() ──→ [new generation]
//!                        │                                          │
//!                        ▼                                          ▼
//!                    remove() ──→ handle disposed, entry gone ←─────┘
//! ```

use std::collections::HashMap;
use std::time::Duration;

use huddle_protocol::ParticipantName;
use tokio::time::Instant;

use crate::{Negotiation, NegotiationHandle, Participant, SessionError};

/// One remote peer and its receive handle.
#[derive(Debug)]
pub struct RemoteEntry<H: NegotiationHandle> {
    pub participant: Participant,
    pub negotiation: Negotiation<H>,
    joined_seq: u64,
}

/// All remote participants in the room, keyed by display name.
#[derive(Debug)]
pub struct ParticipantRegistry<H: NegotiationHandle> {
    local: Participant,
    remotes: HashMap<ParticipantName, RemoteEntry<H>>,
    next_seq: u64,
}

impl<H: NegotiationHandle> ParticipantRegistry<H> {
    /// Creates an empty registry for the given local participant.
    pub fn new(local: Participant) -> Self {
        Self {
            local,
            remotes: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn local(&self) -> &Participant {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut Participant {
        &mut self.local
    }

    /// Registers a remote peer with its freshly created negotiation.
    ///
    /// # Errors
    /// - [`SessionError::LocalParticipant`] if the name is ours
    /// - [`SessionError::DuplicateParticipant`] if the name is taken; the
    ///   passed negotiation is dropped (and so disposed)
    pub fn insert(
        &mut self,
        participant: Participant,
        negotiation: Negotiation<H>,
    ) -> Result<&mut RemoteEntry<H>, SessionError> {
        let name = participant.name.clone();
        if name == self.local.name {
            return Err(SessionError::LocalParticipant(name));
        }
        if self.remotes.contains_key(&name) {
            return Err(SessionError::DuplicateParticipant(name));
        }

        self.next_seq += 1;
        tracing::debug!(peer = %name, "participant registered");
        let entry = self.remotes.entry(name).or_insert(RemoteEntry {
            participant,
            negotiation,
            joined_seq: self.next_seq,
        });
        Ok(entry)
    }

    /// Swaps in a new negotiation for an existing peer, disposing the old
    /// one. Returns the old generation.
    ///
    /// # Errors
    /// [`SessionError::UnknownParticipant`] if the peer is not registered.
    pub fn renegotiate(
        &mut self,
        name: &ParticipantName,
        negotiation: Negotiation<H>,
    ) -> Result<u64, SessionError> {
        let entry = self
            .remotes
            .get_mut(name)
            .ok_or_else(|| SessionError::UnknownParticipant(name.clone()))?;
        let mut old = std::mem::replace(&mut entry.negotiation, negotiation);
        old.dispose();
        Ok(old.generation())
    }

    /// Removes a peer, disposing its handle. Returns the participant, or
    /// `None` if the name was not registered.
    pub fn remove(&mut self, name: &ParticipantName) -> Option<Participant> {
        let mut entry = self.remotes.remove(name)?;
        entry.negotiation.dispose();
        tracing::debug!(peer = %name, "participant removed");
        Some(entry.participant)
    }

    pub fn get(&self, name: &ParticipantName) -> Option<&RemoteEntry<H>> {
        self.remotes.get(name)
    }

    pub fn get_mut(&mut self, name: &ParticipantName) -> Option<&mut RemoteEntry<H>> {
        self.remotes.get_mut(name)
    }

    pub fn participant(&self, name: &ParticipantName) -> Option<&Participant> {
        self.remotes.get(name).map(|e| &e.participant)
    }

    pub fn participant_mut(&mut self, name: &ParticipantName) -> Option<&mut Participant> {
        self.remotes.get_mut(name).map(|e| &mut e.participant)
    }

    pub fn negotiation_mut(&mut self, name: &ParticipantName) -> Option<&mut Negotiation<H>> {
        self.remotes.get_mut(name).map(|e| &mut e.negotiation)
    }

    pub fn contains(&self, name: &ParticipantName) -> bool {
        self.remotes.contains_key(name)
    }

    /// Names of peers whose negotiation has stalled or failed.
    pub fn stalled(&self, now: Instant, timeout: Duration) -> Vec<ParticipantName> {
        self.remotes
            .iter()
            .filter(|(_, e)| e.negotiation.is_stalled(now, timeout))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Number of remote participants.
    pub fn len(&self) -> usize {
        self.remotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }

    /// Everyone in the room, counting ourselves.
    pub fn occupancy(&self) -> usize {
        self.remotes.len() + 1
    }

    /// Remote names in join order.
    pub fn names(&self) -> Vec<ParticipantName> {
        self.ordered().into_iter().map(|e| e.participant.name.clone()).collect()
    }

    /// Remote participants in join order.
    pub fn snapshot(&self) -> Vec<Participant> {
        self.ordered().into_iter().map(|e| e.participant.clone()).collect()
    }

    /// Removes every peer, disposing every handle. Returns how many were
    /// removed.
    pub fn clear(&mut self) -> usize {
        let count = self.remotes.len();
        for (_, mut entry) in self.remotes.drain() {
            entry.negotiation.dispose();
        }
        count
    }

    fn ordered(&self) -> Vec<&RemoteEntry<H>> {
        let mut entries: Vec<_> = self.remotes.values().collect();
        entries.sort_by_key(|e| e.joined_seq);
        entries
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackHandle, LoopbackNegotiator};
    use crate::{Direction, HandleSpec, MediaNegotiator, PeerEvents};
    use tokio::sync::mpsc;

    // -- Helpers ----------------------------------------------------------

    struct Fixture {
        backend: LoopbackNegotiator,
        registry: ParticipantRegistry<LoopbackHandle>,
        generation: u64,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                backend: LoopbackNegotiator::new(),
                registry: ParticipantRegistry::new(Participant::named("me".into())),
                generation: 0,
            }
        }

        fn negotiation(&mut self, peer: &str) -> Negotiation<LoopbackHandle> {
            self.generation += 1;
            let (tx, _rx) = mpsc::unbounded_channel();
            let peer = ParticipantName::from(peer);
            let spec = HandleSpec {
                peer: peer.clone(),
                direction: Direction::RecvOnly,
                generation: self.generation,
                ice_servers: Vec::new(),
                events: PeerEvents::new(peer.clone(), self.generation, tx),
            };
            let handle = self.backend.create_handle(spec, None).unwrap();
            Negotiation::new(peer, Direction::RecvOnly, self.generation, 1, handle)
        }

        fn arrive(&mut self, name: &str) -> Result<(), SessionError> {
            let n = self.negotiation(name);
            self.registry
                .insert(Participant::named(name.into()), n)
                .map(|_| ())
        }
    }

    // =====================================================================
    // insert()
    // =====================================================================

    #[test]
    fn test_insert_new_peer_counts_towards_occupancy() {
        let mut fx = Fixture::new();
        assert_eq!(fx.registry.occupancy(), 1);

        fx.arrive("a").unwrap();

        assert_eq!(fx.registry.len(), 1);
        assert_eq!(fx.registry.occupancy(), 2);
        assert!(fx.registry.contains(&"a".into()));
    }

    #[test]
    fn test_insert_duplicate_name_not_double_counted() {
        let mut fx = Fixture::new();
        fx.arrive("a").unwrap();

        let err = fx.arrive("a").unwrap_err();

        assert!(matches!(err, SessionError::DuplicateParticipant(ref n) if n.as_str() == "a"));
        assert_eq!(fx.registry.len(), 1);
        // The rejected negotiation was dropped and disposed.
        assert_eq!(fx.backend.live_handles(), 1);
    }

    #[test]
    fn test_insert_local_name_rejected() {
        let mut fx = Fixture::new();

        let err = fx.arrive("me").unwrap_err();

        assert!(matches!(err, SessionError::LocalParticipant(_)));
        assert!(fx.registry.is_empty());
    }

    // =====================================================================
    // remove()
    // =====================================================================

    #[test]
    fn test_remove_disposes_handle() {
        let mut fx = Fixture::new();
        fx.arrive("a").unwrap();
        fx.arrive("b").unwrap();

        let removed = fx.registry.remove(&"a".into()).unwrap();

        assert_eq!(removed.name.as_str(), "a");
        assert_eq!(fx.registry.names(), vec![ParticipantName::from("b")]);
        assert_eq!(fx.registry.occupancy(), 2);
        assert_eq!(fx.backend.live_handles(), 1);
    }

    #[test]
    fn test_remove_unknown_is_none_and_never_negative() {
        let mut fx = Fixture::new();

        assert!(fx.registry.remove(&"ghost".into()).is_none());
        assert!(fx.registry.remove(&"ghost".into()).is_none());

        assert_eq!(fx.registry.len(), 0);
        assert_eq!(fx.registry.occupancy(), 1);
    }

    #[test]
    fn test_arrivals_minus_departures_matches_len() {
        let mut fx = Fixture::new();
        for name in ["a", "b", "c", "a", "d"] {
            let _ = fx.arrive(name);
        }
        for name in ["b", "b", "x"] {
            fx.registry.remove(&name.into());
        }

        // Distinct arrivals {a,b,c,d} minus distinct departures {b}.
        assert_eq!(fx.registry.len(), 3);
        assert_eq!(fx.backend.live_handles(), 3);
    }

    // =====================================================================
    // renegotiate() / clear() / ordering
    // =====================================================================

    #[test]
    fn test_renegotiate_replaces_and_disposes_old_handle() {
        let mut fx = Fixture::new();
        fx.arrive("a").unwrap();
        let fresh = fx.negotiation("a");
        let fresh_generation = fresh.generation();

        let old = fx.registry.renegotiate(&"a".into(), fresh).unwrap();

        assert_eq!(old, 1);
        assert_eq!(
            fx.registry.get(&"a".into()).unwrap().negotiation.generation(),
            fresh_generation
        );
        assert_eq!(fx.backend.live_handles(), 1);
    }

    #[test]
    fn test_renegotiate_unknown_peer_errors() {
        let mut fx = Fixture::new();
        let n = fx.negotiation("ghost");

        let err = fx.registry.renegotiate(&"ghost".into(), n).unwrap_err();

        assert!(matches!(err, SessionError::UnknownParticipant(_)));
    }

    #[test]
    fn test_snapshot_in_join_order() {
        let mut fx = Fixture::new();
        for name in ["zed", "amy", "kim"] {
            fx.arrive(name).unwrap();
        }

        let names: Vec<_> = fx
            .registry
            .snapshot()
            .into_iter()
            .map(|p| p.name.to_string())
            .collect();

        assert_eq!(names, vec!["zed", "amy", "kim"]);
    }

    #[test]
    fn test_clear_disposes_everything() {
        let mut fx = Fixture::new();
        fx.arrive("a").unwrap();
        fx.arrive("b").unwrap();

        assert_eq!(fx.registry.clear(), 2);

        assert!(fx.registry.is_empty());
        assert_eq!(fx.backend.live_handles(), 0);
    }
}
