//! The session controller: one client's membership in one room.
//!
//! The controller owns everything about the session (registry, uplink,
//! local media, signaling sink) and is driven by a single task. Every
//! input, whether a relay message, a negotiation event, a UI intent or a
//! sweep tick, arrives as a `&mut self` call and runs to completion before
//! the next one, so there is never more than one writer.
//!
//! ```text
//!  acquire_permissions() → resolve_room() → join(sink)
//!                                              │ joinRoom
//!                                              ▼
//!                        existingParticipants ─→ Active ──leave()──→ Closed
//!                                                  │
//!                 handle_message / handle_negotiation_event / expire_stalled
//! ```

use std::collections::HashSet;

use huddle_protocol::{
    IceCandidate, ParticipantName, ParticipantProfile, RoomId, SignalMessage, UserId,
};
use huddle_session::{
    CandidateBuffer, CandidateOutcome, Device, DeviceFlags, Direction, HandleSpec, LocalMedia,
    MediaNegotiator, Negotiation, NegotiationEvent, NegotiationEventKind, NegotiationState,
    Participant, ParticipantRegistry, PeerEvents, PermissionProbe,
};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::devices::{device_message, RemoteDeviceChange};
use crate::{
    CameraPolicy, CloseReason, RoomDirectory, RoomError, RoomEvent, RoomInfo, RoomServiceError,
    RoomSnapshot, SessionConfig, SessionPhase, SignalSink,
};

/// Who we are, and which room we are joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub user_id: UserId,
    pub name: ParticipantName,
    pub room: RoomId,
    pub profile_image: Option<String>,
    /// Device state to join with.
    pub devices: DeviceFlags,
}

impl LocalIdentity {
    pub fn new(
        user_id: impl Into<UserId>,
        name: impl Into<ParticipantName>,
        room: impl Into<RoomId>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            room: room.into(),
            profile_image: None,
            devices: DeviceFlags::all_on(),
        }
    }

    pub fn with_devices(mut self, devices: DeviceFlags) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_profile_image(mut self, url: impl Into<String>) -> Self {
        self.profile_image = Some(url.into());
        self
    }

    fn participant(&self) -> Participant {
        Participant {
            name: self.name.clone(),
            user_id: Some(self.user_id.clone()),
            profile_image: self.profile_image.clone(),
            devices: self.devices,
        }
    }
}

/// Drives one room session. See the module docs for the life cycle.
pub struct SessionController<N: MediaNegotiator, D: RoomDirectory> {
    config: SessionConfig,
    identity: LocalIdentity,
    negotiator: N,
    directory: D,
    phase: SessionPhase,
    room: Option<RoomInfo>,
    registry: ParticipantRegistry<N::Handle>,
    /// Our send-only handle. Lives outside the registry.
    uplink: Option<Negotiation<N::Handle>>,
    media: Option<N::Media>,
    orphans: CandidateBuffer,
    /// Names that left or were given up on. Late candidates for them are
    /// dropped instead of buffered until they arrive again.
    departed: HashSet<ParticipantName>,
    sink: Option<Box<dyn SignalSink>>,
    next_generation: u64,
    negotiation_tx: mpsc::UnboundedSender<NegotiationEvent>,
    negotiation_rx: Option<mpsc::UnboundedReceiver<NegotiationEvent>>,
    events_tx: mpsc::UnboundedSender<RoomEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<RoomEvent>>,
    snapshot_tx: watch::Sender<RoomSnapshot>,
}

impl<N: MediaNegotiator, D: RoomDirectory> SessionController<N, D> {
    pub fn new(config: SessionConfig, identity: LocalIdentity, negotiator: N, directory: D) -> Self {
        let config = config.validated();
        let registry = ParticipantRegistry::new(identity.participant());
        let (negotiation_tx, negotiation_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(RoomSnapshot {
            phase: SessionPhase::Unjoined,
            room: None,
            local: registry.local().clone(),
            remotes: Vec::new(),
            occupancy: registry.occupancy(),
        });

        Self {
            orphans: CandidateBuffer::new(config.max_buffered_candidates)
                .with_max_names(config.max_orphan_names),
            departed: HashSet::new(),
            config,
            identity,
            negotiator,
            directory,
            phase: SessionPhase::Unjoined,
            room: None,
            registry,
            uplink: None,
            media: None,
            sink: None,
            next_generation: 0,
            negotiation_tx,
            negotiation_rx: Some(negotiation_rx),
            events_tx,
            events_rx: Some(events_rx),
            snapshot_tx,
        }
    }

    // -- Accessors --------------------------------------------------------

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn room(&self) -> Option<&RoomInfo> {
        self.room.as_ref()
    }

    pub fn local(&self) -> &Participant {
        self.registry.local()
    }

    /// Everyone in the room, counting ourselves.
    pub fn occupancy(&self) -> usize {
        self.registry.occupancy()
    }

    pub fn remote_names(&self) -> Vec<ParticipantName> {
        self.registry.names()
    }

    pub fn remote(&self, name: &ParticipantName) -> Option<&Participant> {
        self.registry.participant(name)
    }

    /// State of the negotiation for `name` (our own name for the uplink).
    pub fn negotiation_state(&self, name: &ParticipantName) -> Option<NegotiationState> {
        self.negotiation_ref(name).map(Negotiation::state)
    }

    pub fn uplink_state(&self) -> Option<NegotiationState> {
        self.uplink.as_ref().map(Negotiation::state)
    }

    /// Candidates held for names that have no handle yet.
    pub fn buffered_candidates(&self) -> usize {
        self.orphans.len()
    }

    /// Current view of the session.
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            phase: self.phase,
            room: self.room.clone(),
            local: self.registry.local().clone(),
            remotes: self.registry.snapshot(),
            occupancy: self.registry.occupancy(),
        }
    }

    /// A receiver that always holds the latest [`RoomSnapshot`].
    pub fn subscribe(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// The [`RoomEvent`] stream. Can be taken once. Events accumulate until
    /// it is taken.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<RoomEvent>> {
        self.events_rx.take()
    }

    /// Events reported by negotiation handles. The driver forwards each to
    /// [`handle_negotiation_event`](Self::handle_negotiation_event). Can be
    /// taken once.
    pub fn take_negotiation_events(
        &mut self,
    ) -> Option<mpsc::UnboundedReceiver<NegotiationEvent>> {
        self.negotiation_rx.take()
    }

    // -- Entry ------------------------------------------------------------

    /// Asks for camera and microphone access.
    ///
    /// # Errors
    /// - [`RoomError::PermissionDenied`] if either is denied; the session
    ///   is then `Closed` and nothing was sent anywhere
    /// - [`RoomError::InvalidPhase`] unless called first
    pub async fn acquire_permissions<P: PermissionProbe>(
        &mut self,
        probe: &P,
    ) -> Result<(), RoomError> {
        self.transition(SessionPhase::PermissionsPending, "acquire permissions")?;

        let granted = probe.check().await;
        if !granted.all_granted() {
            tracing::warn!(
                camera = granted.camera,
                microphone = granted.microphone,
                "device permission denied"
            );
            self.close(CloseReason::PermissionDenied);
            return Err(RoomError::PermissionDenied {
                camera: granted.camera,
                microphone: granted.microphone,
            });
        }

        tracing::debug!("device permissions granted");
        Ok(())
    }

    /// Fetches the room's metadata. A camera-off room starts our camera
    /// disabled.
    ///
    /// # Errors
    /// [`RoomError::RoomService`] if the room is unknown, full, or the
    /// service failed; the session is then `Closed`.
    pub async fn resolve_room(&mut self) -> Result<RoomInfo, RoomError> {
        self.require(SessionPhase::PermissionsPending, "resolve room")?;
        let room_id = self.identity.room.clone();

        let result = match self.directory.fetch_room(&room_id).await {
            Ok(info) if info.is_full() => Err(RoomServiceError::Full(room_id.clone())),
            other => other,
        };

        match result {
            Ok(info) => {
                if info.camera_policy == CameraPolicy::Off {
                    self.registry.local_mut().devices.camera = false;
                }
                tracing::info!(
                    room = %info.id,
                    title = %info.title,
                    capacity = info.capacity,
                    "room resolved"
                );
                self.room = Some(info.clone());
                self.publish();
                Ok(info)
            }
            Err(e) => {
                tracing::error!(room = %room_id, error = %e, "room lookup failed");
                self.close(CloseReason::RoomUnavailable);
                Err(e.into())
            }
        }
    }

    /// Starts local capture, attaches the signaling sink and sends
    /// `joinRoom`.
    ///
    /// # Errors
    /// - [`RoomError::Media`] if capture fails; the sink is closed and the
    ///   session is `Closed`
    /// - [`RoomError::InvalidPhase`] unless permissions were granted
    pub fn join<S: SignalSink>(&mut self, sink: S) -> Result<(), RoomError> {
        if let Err(e) = self.require(SessionPhase::PermissionsPending, "join") {
            sink.close();
            return Err(e);
        }

        let devices = self.registry.local().devices;
        let media = match self.negotiator.capture(devices) {
            Ok(media) => media,
            Err(e) => {
                tracing::error!(error = %e, "local media capture failed");
                sink.close();
                self.close(CloseReason::MediaUnavailable);
                return Err(e.into());
            }
        };
        self.media = Some(media);

        sink.send(SignalMessage::JoinRoom {
            user_id: self.identity.user_id.clone(),
            name: self.identity.name.clone(),
            room: self.identity.room.clone(),
            cam_enabled: devices.camera,
            mic_enabled: devices.microphone,
            speaker_enabled: devices.speaker,
        });
        self.sink = Some(Box::new(sink));
        self.transition(SessionPhase::Joining, "join")?;

        tracing::info!(
            room = %self.identity.room,
            name = %self.identity.name,
            "joinRoom sent"
        );
        Ok(())
    }

    // -- Inbound ----------------------------------------------------------

    /// Handles one message from the relay.
    pub async fn handle_message(&mut self, message: SignalMessage) {
        match self.phase {
            SessionPhase::Joining => match message {
                SignalMessage::ExistingParticipants { data } => self.bootstrap(data).await,
                SignalMessage::PingPong { message } => {
                    tracing::trace!(%message, "keep-alive reply");
                }
                other => tracing::warn!(
                    kind = other.kind(),
                    "message before existingParticipants, dropping"
                ),
            },
            SessionPhase::Active => self.dispatch(message).await,
            phase => tracing::debug!(kind = message.kind(), %phase, "not in a room, dropping message"),
        }
    }

    async fn dispatch(&mut self, message: SignalMessage) {
        match message {
            SignalMessage::ExistingParticipants { .. } => {
                tracing::warn!("existingParticipants while already in the room, ignoring");
            }
            SignalMessage::NewParticipantArrived(profile) => {
                self.add_remote(Participant::from_profile(&profile)).await;
            }
            SignalMessage::ParticipantLeft { name } => self.remove_remote(&name),
            SignalMessage::ReceiveVideoAnswer {
                profile,
                sdp_answer,
            } => self.apply_answer(profile, &sdp_answer).await,
            SignalMessage::IceCandidate { name, candidate } => {
                self.add_remote_candidate(name, candidate).await;
            }
            msg @ (SignalMessage::IsCamOn { .. } | SignalMessage::IsMicOn { .. }) => {
                self.apply_remote_device(&msg);
            }
            SignalMessage::PingPong { message } => {
                tracing::trace!(%message, "keep-alive reply");
            }
            msg @ (SignalMessage::JoinRoom { .. }
            | SignalMessage::LeaveRoom
            | SignalMessage::ReceiveVideoFrom { .. }
            | SignalMessage::OnIceCandidate { .. }) => {
                tracing::error!(kind = msg.kind(), "relay sent a client-only message, dropping");
            }
        }
    }

    /// `existingParticipants`: start the uplink, then a receive handle per
    /// listed peer.
    async fn bootstrap(&mut self, existing: Vec<ParticipantName>) {
        if self.transition(SessionPhase::Active, "enter room").is_err() {
            return;
        }
        tracing::info!(
            room = %self.identity.room,
            peers = existing.len(),
            "joined room"
        );
        self.emit(RoomEvent::Joined {
            room: self.identity.room.clone(),
            existing: existing.clone(),
        });

        self.start_uplink().await;
        for name in existing {
            self.add_remote(Participant::named(name)).await;
        }
        self.publish();
    }

    async fn start_uplink(&mut self) {
        let name = self.identity.name.clone();
        let Some(negotiation) = self.create_negotiation(&name, Direction::SendOnly, 1) else {
            return;
        };
        self.uplink = Some(negotiation);
        self.replay_orphans(&name).await;
        self.send_offer(&name).await;
    }

    async fn add_remote(&mut self, participant: Participant) {
        let name = participant.name.clone();
        if name == self.identity.name {
            tracing::debug!("relay listed ourselves as a remote, skipping");
            return;
        }
        if self.registry.contains(&name) {
            tracing::debug!(peer = %name, "participant already registered, ignoring");
            return;
        }
        self.departed.remove(&name);
        let Some(negotiation) = self.create_negotiation(&name, Direction::RecvOnly, 1) else {
            return;
        };
        if let Err(e) = self.registry.insert(participant.clone(), negotiation) {
            tracing::warn!(peer = %name, error = %e, "could not register participant");
            return;
        }

        let occupancy = self.registry.occupancy();
        tracing::info!(peer = %name, occupancy, "participant joined");
        self.emit(RoomEvent::ParticipantJoined(participant));
        self.emit(RoomEvent::OccupancyChanged(occupancy));

        self.replay_orphans(&name).await;
        self.send_offer(&name).await;
        self.publish();
    }

    fn remove_remote(&mut self, name: &ParticipantName) {
        let discarded = self.orphans.discard(name);
        match self.registry.remove(name) {
            Some(_) => {
                self.departed.insert(name.clone());
                let occupancy = self.registry.occupancy();
                tracing::info!(peer = %name, occupancy, "participant left");
                self.emit(RoomEvent::ParticipantLeft(name.clone()));
                self.emit(RoomEvent::OccupancyChanged(occupancy));
                self.publish();
            }
            None => tracing::debug!(
                peer = %name,
                discarded,
                "participantLeft for unknown participant"
            ),
        }
    }

    async fn apply_answer(&mut self, profile: ParticipantProfile, sdp_answer: &str) {
        let name = profile.name.clone();
        let is_local = name == self.identity.name;
        if !is_local && !self.registry.contains(&name) {
            tracing::warn!(peer = %name, "answer for unknown participant, dropping");
            return;
        }
        let Some(negotiation) = self.negotiation_mut(&name) else {
            tracing::warn!("answer for the uplink but none is live, dropping");
            return;
        };

        let generation = negotiation.generation();
        let result = negotiation.apply_answer(sdp_answer).await;
        if !self.is_current(&name, generation) {
            tracing::debug!(peer = %name, "answer landed on a replaced handle, discarding");
            return;
        }
        match result {
            Ok(flushed) => tracing::debug!(peer = %name, flushed, "answer applied"),
            Err(e) => tracing::warn!(peer = %name, error = %e, "answer rejected"),
        }

        if !is_local {
            if let Some(participant) = self.registry.participant_mut(&name) {
                participant.apply_profile(&profile);
            }
            self.publish();
        }
    }

    async fn add_remote_candidate(&mut self, name: ParticipantName, candidate: IceCandidate) {
        if self.negotiation_ref(&name).is_none() {
            if self.departed.contains(&name) {
                tracing::debug!(peer = %name, "candidate for a departed participant, dropping");
                return;
            }
            if self.orphans.push(name.clone(), candidate) {
                tracing::warn!(peer = %name, "orphan candidate buffer full, dropped older candidates");
            } else {
                tracing::debug!(peer = %name, "candidate for a handle that does not exist yet, buffering");
            }
            return;
        }
        self.deliver_candidate(&name, candidate).await;
    }

    async fn replay_orphans(&mut self, name: &ParticipantName) {
        let orphans = self.orphans.take(name);
        if orphans.is_empty() {
            return;
        }
        tracing::debug!(peer = %name, count = orphans.len(), "replaying early candidates");
        for candidate in orphans {
            self.deliver_candidate(name, candidate).await;
        }
    }

    async fn deliver_candidate(&mut self, name: &ParticipantName, candidate: IceCandidate) {
        let Some(negotiation) = self.negotiation_mut(name) else {
            return;
        };
        match negotiation.add_remote_candidate(candidate).await {
            Ok(CandidateOutcome::Applied) => tracing::trace!(peer = %name, "candidate applied"),
            Ok(CandidateOutcome::Queued) => {
                tracing::trace!(peer = %name, "candidate queued until answer");
            }
            Err(e) => tracing::warn!(peer = %name, error = %e, "ice candidate rejected"),
        }
    }

    fn apply_remote_device(&mut self, message: &SignalMessage) {
        let Some(change) = RemoteDeviceChange::from_message(message) else {
            return;
        };
        if change.sender == self.identity.name {
            tracing::trace!("own device change echoed back");
            return;
        }
        let Some(participant) = self.registry.participant_mut(&change.sender) else {
            tracing::warn!(peer = %change.sender, "device change for unknown participant, dropping");
            return;
        };
        if change.apply(participant) {
            tracing::debug!(
                peer = %change.sender,
                device = %change.device,
                enabled = change.enabled,
                "remote device changed"
            );
            self.emit(RoomEvent::DeviceChanged {
                name: change.sender,
                device: change.device,
                enabled: change.enabled,
            });
            self.publish();
        }
    }

    // -- Negotiation ------------------------------------------------------

    /// Handles a report from a negotiation handle.
    pub async fn handle_negotiation_event(&mut self, event: NegotiationEvent) {
        if !self.is_current(&event.peer, event.generation) {
            tracing::debug!(
                peer = %event.peer,
                generation = event.generation,
                "event from a replaced handle, ignoring"
            );
            return;
        }

        match event.kind {
            NegotiationEventKind::LocalCandidate(candidate) => {
                self.send(SignalMessage::OnIceCandidate {
                    name: event.peer,
                    candidate,
                });
            }
            NegotiationEventKind::Connected => {
                if let Some(negotiation) = self.negotiation_mut(&event.peer) {
                    if negotiation.mark_connected() {
                        tracing::info!(peer = %event.peer, "media connected");
                    }
                }
            }
            NegotiationEventKind::Failed(reason) => {
                tracing::warn!(peer = %event.peer, %reason, "media connection failed");
                if let Some(negotiation) = self.negotiation_mut(&event.peer) {
                    negotiation.mark_failed();
                }
                self.retry(&event.peer).await;
            }
        }
    }

    /// Re-offers every negotiation that has not reached `Active` within the
    /// offer timeout, giving up after the configured attempts. Returns how
    /// many were stalled.
    pub async fn expire_stalled(&mut self, now: Instant) -> usize {
        if !self.phase.is_active() {
            return 0;
        }
        let timeout = self.config.offer_timeout;
        let mut stalled = Vec::new();
        if self
            .uplink
            .as_ref()
            .is_some_and(|n| n.is_stalled(now, timeout))
        {
            stalled.push(self.identity.name.clone());
        }
        stalled.extend(self.registry.stalled(now, timeout));

        for name in &stalled {
            tracing::warn!(peer = %name, "negotiation stalled");
            self.retry(name).await;
        }
        stalled.len()
    }

    async fn retry(&mut self, name: &ParticipantName) {
        let Some(current) = self.negotiation_ref(name) else {
            return;
        };
        let attempts = current.attempt();
        let direction = current.direction();
        if attempts >= self.config.max_negotiation_attempts {
            self.give_up(name, attempts);
            return;
        }

        let Some(fresh) = self.create_negotiation(name, direction, attempts + 1) else {
            self.give_up(name, attempts);
            return;
        };
        tracing::info!(peer = %name, attempt = attempts + 1, "re-offering");
        if *name == self.identity.name {
            if let Some(mut old) = self.uplink.replace(fresh) {
                old.dispose();
            }
        } else if let Err(e) = self.registry.renegotiate(name, fresh) {
            tracing::warn!(peer = %name, error = %e, "could not replace handle");
            return;
        }
        self.replay_orphans(name).await;
        self.send_offer(name).await;
    }

    fn give_up(&mut self, name: &ParticipantName, attempts: u32) {
        if *name == self.identity.name {
            if let Some(mut uplink) = self.uplink.take() {
                uplink.dispose();
            }
            tracing::error!(attempts, "uplink negotiation failed, no longer publishing");
            self.emit(RoomEvent::NegotiationFailed {
                name: name.clone(),
                attempts,
            });
        } else {
            self.orphans.discard(name);
            self.departed.insert(name.clone());
            self.registry.remove(name);
            let occupancy = self.registry.occupancy();
            tracing::warn!(peer = %name, attempts, occupancy, "negotiation failed, removing participant");
            self.emit(RoomEvent::NegotiationFailed {
                name: name.clone(),
                attempts,
            });
            self.emit(RoomEvent::OccupancyChanged(occupancy));
        }
        self.publish();
    }

    async fn send_offer(&mut self, name: &ParticipantName) {
        let Some(negotiation) = self.negotiation_mut(name) else {
            return;
        };
        let generation = negotiation.generation();
        let result = negotiation.start().await;
        if !self.is_current(name, generation) {
            tracing::debug!(peer = %name, "offer for a replaced handle, discarding");
            return;
        }
        match result {
            Ok(sdp_offer) => {
                tracing::debug!(peer = %name, generation, "offer sent");
                self.send(SignalMessage::ReceiveVideoFrom {
                    sender: name.clone(),
                    sdp_offer,
                });
            }
            Err(e) => tracing::warn!(peer = %name, error = %e, "offer generation failed"),
        }
    }

    fn create_negotiation(
        &mut self,
        name: &ParticipantName,
        direction: Direction,
        attempt: u32,
    ) -> Option<Negotiation<N::Handle>> {
        self.next_generation += 1;
        let generation = self.next_generation;
        let spec = HandleSpec {
            peer: name.clone(),
            direction,
            generation,
            ice_servers: self.config.ice_servers.clone(),
            events: PeerEvents::new(name.clone(), generation, self.negotiation_tx.clone()),
        };
        let local = match direction {
            Direction::SendOnly => self.media.as_ref(),
            Direction::RecvOnly => None,
        };

        match self.negotiator.create_handle(spec, local) {
            Ok(handle) => Some(
                Negotiation::new(name.clone(), direction, generation, attempt, handle)
                    .with_max_pending(self.config.max_buffered_candidates),
            ),
            Err(e) => {
                tracing::warn!(peer = %name, %direction, error = %e, "could not create handle");
                None
            }
        }
    }

    fn negotiation_ref(&self, name: &ParticipantName) -> Option<&Negotiation<N::Handle>> {
        if *name == self.identity.name {
            self.uplink.as_ref()
        } else {
            self.registry.get(name).map(|e| &e.negotiation)
        }
    }

    fn negotiation_mut(&mut self, name: &ParticipantName) -> Option<&mut Negotiation<N::Handle>> {
        if *name == self.identity.name {
            self.uplink.as_mut()
        } else {
            self.registry.negotiation_mut(name)
        }
    }

    /// Whether `name`'s live handle is still the one with `generation`
    /// and we are still in a phase that accepts its results.
    fn is_current(&self, name: &ParticipantName, generation: u64) -> bool {
        self.phase.is_joined()
            && self
                .negotiation_ref(name)
                .is_some_and(|n| n.generation() == generation && !n.is_disposed())
    }

    // -- Local intents ----------------------------------------------------

    /// Sets one of our devices. Flips track enablement (no renegotiation)
    /// and broadcasts camera/microphone changes. Returns `true` if the
    /// flag changed.
    ///
    /// # Errors
    /// [`RoomError::InvalidPhase`] outside `Joining`/`Active`.
    pub fn set_device(&mut self, device: Device, enabled: bool) -> Result<bool, RoomError> {
        if !self.phase.is_joined() {
            return Err(self.phase_error("change device"));
        }
        if let Some(media) = self.media.as_mut() {
            media.set_enabled(device, enabled);
        }
        let changed = self.registry.local_mut().devices.set(device, enabled);
        if let Some(message) = device_message(&self.identity.name, device, enabled) {
            self.send(message);
        }
        if changed {
            tracing::debug!(%device, enabled, "local device changed");
            self.emit(RoomEvent::DeviceChanged {
                name: self.identity.name.clone(),
                device,
                enabled,
            });
            self.publish();
        }
        Ok(changed)
    }

    /// Flips one of our devices. Returns the new state.
    pub fn toggle_device(&mut self, device: Device) -> Result<bool, RoomError> {
        let enabled = !self.registry.local().devices.get(device);
        self.set_device(device, enabled)?;
        Ok(enabled)
    }

    // -- Exit -------------------------------------------------------------

    /// Leaves the room: sends `leaveRoom`, disposes every handle, closes
    /// the channel, releases local media and tells the room directory.
    /// Idempotent.
    pub async fn leave(&mut self) {
        if matches!(self.phase, SessionPhase::Leaving | SessionPhase::Closed) {
            return;
        }
        let was_joined = self.phase.is_joined();
        self.phase = SessionPhase::Leaving;
        self.publish();

        if was_joined {
            self.send(SignalMessage::LeaveRoom);
        }
        self.teardown();

        if was_joined {
            if let Err(e) = self
                .directory
                .leave_room(&self.identity.room, &self.identity.user_id)
                .await
            {
                tracing::warn!(room = %self.identity.room, error = %e, "room service leave failed");
            }
        }

        self.finish(CloseReason::Left);
        tracing::info!(room = %self.identity.room, "left room");
    }

    /// The signaling channel is gone. Tears down without sending anything.
    pub fn on_channel_closed(&mut self) {
        if self.phase.is_closed() {
            return;
        }
        tracing::warn!(phase = %self.phase, "signaling channel lost");
        self.close(CloseReason::ChannelLost);
    }

    fn close(&mut self, reason: CloseReason) {
        self.teardown();
        self.finish(reason);
    }

    fn teardown(&mut self) {
        let mut disposed = self.registry.clear();
        if let Some(mut uplink) = self.uplink.take() {
            disposed += usize::from(uplink.dispose());
        }
        self.orphans.clear();
        self.departed.clear();
        if let Some(sink) = self.sink.take() {
            sink.close();
        }
        if let Some(mut media) = self.media.take() {
            media.release();
        }
        tracing::debug!(disposed, "session resources released");
    }

    fn finish(&mut self, reason: CloseReason) {
        self.phase = SessionPhase::Closed;
        self.emit(RoomEvent::Closed(reason));
        self.publish();
    }

    // -- Helpers ----------------------------------------------------------

    fn transition(&mut self, target: SessionPhase, operation: &'static str) -> Result<(), RoomError> {
        if !self.phase.can_transition_to(target) {
            return Err(self.phase_error(operation));
        }
        tracing::debug!(from = %self.phase, to = %target, "phase change");
        self.phase = target;
        self.publish();
        Ok(())
    }

    fn require(&self, phase: SessionPhase, operation: &'static str) -> Result<(), RoomError> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(self.phase_error(operation))
        }
    }

    fn phase_error(&self, operation: &'static str) -> RoomError {
        if self.phase.is_closed() {
            RoomError::Closed
        } else {
            RoomError::InvalidPhase {
                phase: self.phase,
                operation,
            }
        }
    }

    fn send(&self, message: SignalMessage) {
        match &self.sink {
            Some(sink) => sink.send(message),
            None => tracing::debug!(kind = message.kind(), "no channel attached, dropping"),
        }
    }

    fn emit(&self, event: RoomEvent) {
        let _ = self.events_tx.send(event);
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

impl<N: MediaNegotiator, D: RoomDirectory> Drop for SessionController<N, D> {
    fn drop(&mut self) {
        if self.phase.is_closed() {
            return;
        }
        if self.phase.is_joined() {
            self.send(SignalMessage::LeaveRoom);
        }
        self.close(CloseReason::Dropped);
    }
}

impl<N: MediaNegotiator, D: RoomDirectory> std::fmt::Debug for SessionController<N, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("room", &self.identity.room)
            .field("name", &self.identity.name)
            .field("phase", &self.phase)
            .field("remotes", &self.registry.len())
            .field("uplink", &self.uplink_state())
            .finish()
    }
}
