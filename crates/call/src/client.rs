//! The call orchestrator.
//!
//! [`CallClient`] joins a room through one publishing connection, keeps one
//! consuming connection per remote participant and reports received streams
//! to a [`CallObserver`]. All state lives behind a single lock and every
//! event is handled to completion before the next one is looked at.

use cheenhub_contracts::signaling::{ClientMessage, PeerSummary, ServerMessage};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::CallConfig;
use crate::consumer::ConsumerState;
use crate::directory::{Participant, ParticipantMetadata};
use crate::error::{CallError, Result};
use crate::events::{CallEvent, EventReceiver, EventSender, PeerOwner};
use crate::media::{CaptureDevices, LocalTrack, MediaStatus};
use crate::peer::{IceState, PeerConnectionFactory, PeerEvent};
use crate::publisher::{IceAction, PublisherSnapshot};
use crate::session::{Links, LocalSession};
use crate::signaling::SignalingChannel;
use crate::streams::RemoteStreamEntry;
use crate::types::{ConnectionId, ConsumerId, ParticipantId, RoomId};

/// Receives stream notifications for the UI layer
pub trait CallObserver: Send + Sync {
    /// A stream appeared or its mic/camera flags changed.
    ///
    /// Repeated calls for the same consumer id are updates, not new streams.
    fn on_stream_added(&self, entry: &RemoteStreamEntry);

    /// Fires exactly once per torn-down consumer, including consumers that
    /// never delivered a stream.
    fn on_stream_removed(&self, consumer_id: &ConsumerId);

    /// Relay errors and connection failures that were not recovered locally
    fn on_call_error(&self, _error: &CallError) {}
}

/// External collaborators of a [`CallClient`]
pub struct CallDeps {
    pub devices: Arc<dyn CaptureDevices>,
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub signaling: Arc<dyn SignalingChannel>,
    pub observer: Arc<dyn CallObserver>,
}

/// Handle to one participant device's call orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct CallClient {
    inner: Arc<Inner>,
}

struct Inner {
    local_id: ParticipantId,
    config: CallConfig,
    devices: Arc<dyn CaptureDevices>,
    observer: Arc<dyn CallObserver>,
    links: Links,
    state: Mutex<CallState>,
}

#[derive(Default)]
struct CallState {
    session: Option<LocalSession>,
    /// Set when the signaling channel dropped, so the next connect resyncs
    signaling_lost: bool,
}

impl CallClient {
    /// `events` must be the sending half of the queue later passed to
    /// [`run`](Self::run) or [`drain`](Self::drain).
    pub fn new(local_id: ParticipantId, config: CallConfig, deps: CallDeps, events: EventSender) -> Self {
        Self {
            inner: Arc::new(Inner {
                local_id,
                config,
                devices: deps.devices,
                observer: deps.observer,
                links: Links::new(deps.signaling, deps.peers, events),
                state: Mutex::new(CallState::default()),
            }),
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.inner.local_id
    }

    /// Acquire capture devices and open the publishing connection.
    ///
    /// The first offer goes out once the connection asks for negotiation.
    /// Device failures are returned as [`CallError::MediaAccess`] and leave
    /// no session behind.
    pub async fn connect(&self, room_id: impl Into<RoomId>) -> Result<()> {
        let room_id = room_id.into();
        let mut state = self.inner.state.lock().await;
        if state.session.is_some() {
            return Err(CallError::AlreadyInCall);
        }

        info!("Joining room {} as {}", room_id, self.inner.local_id);
        let capture = self
            .inner
            .devices
            .open_user_media(&self.inner.config.capture)
            .await?;

        let mut session = LocalSession::new(room_id, capture, self.inner.config.max_publisher_rebuilds);
        let tracks = session.outbound_tracks();
        if let Err(e) = session.publisher.open(&self.inner.links, &tracks).await {
            error!("Failed to open publisher: {}", e);
            session.publisher.close().await;
            session.stop_capture();
            return Err(e);
        }

        state.session = Some(session);
        Ok(())
    }

    /// Leave the call and release everything it holds.
    ///
    /// Capture tracks are stopped, every connection is closed and all
    /// bookkeeping is cleared before this returns. Events still queued for
    /// the old connections are ignored afterwards. Leaving when not in a call
    /// is a no-op.
    pub async fn leave(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let Some(mut session) = state.session.take() else {
            return Ok(());
        };

        info!("Leaving room {}", session.room_id);
        session.stop_capture();
        session.publisher.close().await;
        for consumer_id in session.consumers.ids() {
            session
                .consumers
                .teardown(
                    &consumer_id,
                    &mut session.directory,
                    &mut session.streams,
                    self.inner.observer.as_ref(),
                )
                .await;
        }
        session.directory.clear();
        session.streams.clear();

        if let Err(e) = self.inner.links.send(ClientMessage::Leave {
            room_id: session.room_id.to_string(),
        }) {
            warn!("Could not tell the relay we left: {}", e);
        }
        Ok(())
    }

    /// Mute or unmute. A muted microphone is detached from the publisher, so
    /// each toggle renegotiates. Returns the new mic state.
    pub async fn toggle_microphone(&self) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        let session = state.session.as_mut().ok_or(CallError::NotInCall)?;
        let audio = session
            .capture
            .audio
            .clone()
            .ok_or_else(|| CallError::MediaAccess("no microphone in this call".to_string()))?;

        let enabled = !session.status.mic_enabled;
        audio.set_enabled(enabled);
        session.status.mic_enabled = enabled;

        let result = if enabled {
            session.publisher.attach_audio(&audio).await
        } else {
            session.publisher.detach_audio().await
        };
        if let Err(e) = result {
            self.publisher_fault(session, e).await;
        }

        info!("Microphone {}", if enabled { "unmuted" } else { "muted" });
        self.broadcast_status(session);
        Ok(enabled)
    }

    /// Turn the camera on or off. The track stays attached, only its enabled
    /// flag flips, so no renegotiation happens. Returns the new camera state.
    pub async fn toggle_camera(&self) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        let session = state.session.as_mut().ok_or(CallError::NotInCall)?;
        let video = session
            .capture
            .video
            .clone()
            .ok_or_else(|| CallError::MediaAccess("no camera in this call".to_string()))?;

        let enabled = !session.status.camera_enabled;
        video.set_enabled(enabled);
        session.status.camera_enabled = enabled;

        info!("Camera {}", if enabled { "on" } else { "off" });
        self.broadcast_status(session);
        Ok(enabled)
    }

    /// Send the screen instead of the camera. The camera comes back when the
    /// share is stopped or the screen track ends on its own.
    pub async fn start_screen_share(&self) -> Result<()> {
        {
            let state = self.inner.state.lock().await;
            let session = state.session.as_ref().ok_or(CallError::NotInCall)?;
            if session.screen.is_some() {
                return Ok(());
            }
        }

        // The device picker may take a while, keep the event loop running meanwhile
        let screen = self.inner.devices.open_display_media().await?;

        let mut state = self.inner.state.lock().await;
        let Some(session) = state.session.as_mut() else {
            screen.stop();
            return Err(CallError::NotInCall);
        };
        if session.screen.is_some() {
            screen.stop();
            return Ok(());
        }

        session.screen = Some(screen.clone());
        if let Err(e) = session.publisher.send_video(&screen).await {
            self.publisher_fault(session, e).await;
        }
        self.watch_screen_share(screen);
        info!("Screen share started");
        Ok(())
    }

    pub async fn stop_screen_share(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let session = state.session.as_mut().ok_or(CallError::NotInCall)?;
        self.restore_camera(session).await;
        Ok(())
    }

    /// Process events until the queue closes
    pub async fn run(&self, mut events: EventReceiver) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("Call event loop finished");
    }

    /// Process only the events already queued. Returns how many were handled.
    pub async fn drain(&self, events: &mut EventReceiver) -> usize {
        let mut handled = 0;
        while let Some(event) = events.try_next() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    pub async fn handle_event(&self, event: CallEvent) {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        match event {
            CallEvent::SignalingConnected => {
                let resync = std::mem::take(&mut state.signaling_lost);
                if let (true, Some(session)) = (resync, state.session.as_mut()) {
                    self.resync(session).await;
                }
            }
            CallEvent::SignalingDisconnected => {
                warn!("Signaling channel lost");
                state.signaling_lost = true;
            }
            CallEvent::Signal(message) => match state.session.as_mut() {
                Some(session) => self.handle_signal(session, message).await,
                None => match message {
                    ServerMessage::SignalingError { message } => {
                        self.report(&CallError::Signaling(message));
                    }
                    other => debug!("Not in a call, ignoring {}", other.event_name()),
                },
            },
            CallEvent::Peer {
                owner,
                connection,
                event,
            } => {
                let Some(session) = state.session.as_mut() else {
                    debug!("Not in a call, ignoring event from {}", connection);
                    return;
                };
                match owner {
                    PeerOwner::Publisher => {
                        self.handle_publisher_event(session, connection, event).await
                    }
                    PeerOwner::Consumer(consumer_id) => {
                        self.handle_consumer_event(session, consumer_id, connection, event)
                            .await
                    }
                }
            }
            CallEvent::ScreenShareEnded { track_id } => {
                let Some(session) = state.session.as_mut() else {
                    return;
                };
                if session
                    .screen
                    .as_ref()
                    .is_some_and(|screen| screen.id() == track_id)
                {
                    info!("Screen share ended, resuming camera");
                    self.restore_camera(session).await;
                }
            }
        }
    }

    pub async fn is_in_call(&self) -> bool {
        self.inner.state.lock().await.session.is_some()
    }

    pub async fn publisher(&self) -> Option<PublisherSnapshot> {
        let state = self.inner.state.lock().await;
        state.session.as_ref().map(|session| session.publisher.snapshot())
    }

    pub async fn media_status(&self) -> Option<MediaStatus> {
        let state = self.inner.state.lock().await;
        state.session.as_ref().map(|session| session.status)
    }

    pub async fn remote_streams(&self) -> Vec<RemoteStreamEntry> {
        let state = self.inner.state.lock().await;
        state
            .session
            .as_ref()
            .map(|session| session.streams.entries().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn participant(&self, remote_id: &ParticipantId) -> Option<Participant> {
        let state = self.inner.state.lock().await;
        state
            .session
            .as_ref()
            .and_then(|session| session.directory.get(remote_id).cloned())
    }

    pub async fn consumer_state(&self, consumer_id: &ConsumerId) -> Option<ConsumerState> {
        let state = self.inner.state.lock().await;
        state
            .session
            .as_ref()
            .and_then(|session| session.consumers.get(consumer_id))
            .map(|consumer| consumer.state())
    }

    /// Publisher plus consumer connections currently open
    pub async fn live_connections(&self) -> usize {
        let state = self.inner.state.lock().await;
        state
            .session
            .as_ref()
            .map(LocalSession::live_connections)
            .unwrap_or(0)
    }

    async fn handle_signal(&self, session: &mut LocalSession, message: ServerMessage) {
        let links = &self.inner.links;
        debug!("Handling {}", message.event_name());

        match message {
            ServerMessage::Answer { answer } => {
                match session.publisher.on_answer(links, answer).await {
                    Ok(true) => {
                        self.send(ClientMessage::RequestPeers {});
                        self.broadcast_status(session);
                    }
                    Ok(false) => {}
                    Err(e) => self.publisher_fault(session, e).await,
                }
            }
            ServerMessage::Peers { list } => {
                info!("Relay reported {} participants", list.len());
                if std::mem::take(&mut session.roster_resync) {
                    self.prune_departed(session, &list).await;
                }
                for peer in list {
                    self.ensure_consumer(session, peer).await;
                }
            }
            ServerMessage::NewProducer(peer) => self.ensure_consumer(session, peer).await,
            ServerMessage::ConsumerReady {
                answer,
                consumer_id,
            } => {
                let consumer_id = ConsumerId::from(consumer_id);
                let result = match session.consumers.get_mut(&consumer_id) {
                    Some(consumer) => consumer
                        .on_ready(answer)
                        .await
                        .map(|()| consumer.remote_id().clone()),
                    None => {
                        debug!("Answer for unknown consumer {}", consumer_id);
                        return;
                    }
                };
                match result {
                    Ok(remote_id) => {
                        if let Some(participant) = session.directory.get_mut(&remote_id) {
                            participant.consumer_retries = 0;
                        }
                    }
                    Err(e) => self.consumer_fault(session, &consumer_id, e).await,
                }
            }
            ServerMessage::RelayCandidate { candidate } => {
                if let Err(e) = session.publisher.on_remote_candidate(candidate).await {
                    warn!("Publisher rejected relay candidate: {}", e);
                }
            }
            ServerMessage::ConsumerCandidate {
                candidate,
                consumer_id,
            } => {
                let consumer_id = ConsumerId::from(consumer_id);
                match session.consumers.get_mut(&consumer_id) {
                    Some(consumer) => {
                        if let Err(e) = consumer.on_remote_candidate(candidate).await {
                            warn!("Consumer {} rejected candidate: {}", consumer_id, e);
                        }
                    }
                    None => debug!("Candidate for unknown consumer {}", consumer_id),
                }
            }
            ServerMessage::ParticipantLeft { remote_id } => {
                session
                    .consumers
                    .remove_participant(
                        &ParticipantId::from(remote_id),
                        &mut session.directory,
                        &mut session.streams,
                        self.inner.observer.as_ref(),
                    )
                    .await;
            }
            ServerMessage::StatusUpdated {
                remote_id,
                mic_enabled,
                camera_enabled,
            } => {
                let remote_id = ParticipantId::from(remote_id);
                let Some(participant) = session.directory.get_mut(&remote_id) else {
                    debug!("Status for unknown participant {}", remote_id);
                    return;
                };
                let status = MediaStatus {
                    mic_enabled,
                    camera_enabled,
                };
                participant.status = status;
                if let Some(consumer_id) = participant.consumer_id.clone() {
                    if let Some(entry) = session.streams.update_status(&consumer_id, status) {
                        self.inner.observer.on_stream_added(entry);
                    }
                }
            }
            ServerMessage::SignalingError { message } => {
                warn!("Relay reported an error: {}", message);
                self.report(&CallError::Signaling(message));
            }
        }
    }

    async fn handle_publisher_event(
        &self,
        session: &mut LocalSession,
        connection: ConnectionId,
        event: PeerEvent,
    ) {
        if !session.publisher.is_current(connection) {
            debug!("Ignoring event from stale publisher {}", connection);
            return;
        }

        match event {
            PeerEvent::NegotiationNeeded => {
                if let Err(e) = session
                    .publisher
                    .on_negotiation_needed(&self.inner.links)
                    .await
                {
                    self.publisher_fault(session, e).await;
                }
            }
            PeerEvent::LocalCandidate(candidate) => {
                self.send(ClientMessage::LocalCandidate { candidate });
            }
            PeerEvent::IceStateChanged(ice) => match session.publisher.on_ice_state(ice) {
                IceAction::Ignore => {}
                IceAction::Rebuild => self.rebuild_publisher(session).await,
                IceAction::GiveUp => {
                    let err = CallError::IceFailure(format!("publisher in room {}", session.room_id));
                    self.fail_publisher(session, err).await;
                }
            },
            PeerEvent::Track(track) => {
                debug!("Publisher ignoring inbound track {}", track.id);
            }
        }
    }

    async fn handle_consumer_event(
        &self,
        session: &mut LocalSession,
        consumer_id: ConsumerId,
        connection: ConnectionId,
        event: PeerEvent,
    ) {
        let remote_id = match session.consumers.routed(&consumer_id, connection) {
            Some(consumer) => consumer.remote_id().clone(),
            None => {
                debug!("Ignoring event from stale consumer {}", connection);
                return;
            }
        };

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                self.send(ClientMessage::ConsumerCandidate {
                    candidate,
                    consumer_id: consumer_id.to_string(),
                });
            }
            PeerEvent::Track(track) => {
                let Some(participant) = session.directory.get(&remote_id) else {
                    return;
                };
                let entry = session.streams.install_track(&consumer_id, participant, track);
                info!(
                    "Stream from {} available on consumer {} ({} tracks)",
                    entry.remote_id,
                    consumer_id,
                    entry.stream.tracks.len()
                );
                self.inner.observer.on_stream_added(entry);
            }
            PeerEvent::IceStateChanged(IceState::Failed) => {
                warn!("Consumer {} ICE failed, dropping it", consumer_id);
                session
                    .consumers
                    .teardown(
                        &consumer_id,
                        &mut session.directory,
                        &mut session.streams,
                        self.inner.observer.as_ref(),
                    )
                    .await;
                self.report(&CallError::IceFailure(format!("consumer {consumer_id}")));
            }
            PeerEvent::IceStateChanged(ice) => {
                debug!("Consumer {} ICE {:?}", consumer_id, ice);
            }
            // Consumers offer once, when they are created
            PeerEvent::NegotiationNeeded => {}
        }
    }

    async fn ensure_consumer(&self, session: &mut LocalSession, peer: PeerSummary) {
        let remote_id = ParticipantId::from(peer.remote_id);
        let metadata = ParticipantMetadata {
            display_name: peer.display_name,
            contact: peer.contact,
        };

        if let Err(e) = session
            .consumers
            .ensure_consumer(
                &self.inner.links,
                &self.inner.local_id,
                &mut session.directory,
                remote_id.clone(),
                metadata,
            )
            .await
        {
            warn!("Could not consume participant {}: {}", remote_id, e);
            self.report(&e);
        }
    }

    /// Negotiation error on a consumer: tear it down and try again while the
    /// participant still has retries left.
    async fn consumer_fault(&self, session: &mut LocalSession, consumer_id: &ConsumerId, err: CallError) {
        warn!("Consumer {} negotiation failed: {}", consumer_id, err);
        let remote_id = session
            .consumers
            .get(consumer_id)
            .map(|consumer| consumer.remote_id().clone());
        session
            .consumers
            .teardown(
                consumer_id,
                &mut session.directory,
                &mut session.streams,
                self.inner.observer.as_ref(),
            )
            .await;

        let Some(participant) = remote_id.and_then(|id| session.directory.get_mut(&id)) else {
            return;
        };
        if participant.consumer_retries >= self.inner.config.max_consumer_retries {
            self.report(&err);
            return;
        }

        participant.consumer_retries += 1;
        let peer = PeerSummary {
            remote_id: participant.remote_id.to_string(),
            display_name: participant.display_name.clone(),
            contact: participant.contact.clone(),
        };
        info!("Recreating consumer for {}", peer.remote_id);
        self.ensure_consumer(session, peer).await;
    }

    async fn publisher_fault(&self, session: &mut LocalSession, err: CallError) {
        warn!("Publisher negotiation failed: {}", err);
        if session.publisher.can_rebuild() {
            self.rebuild_publisher(session).await;
        } else {
            self.fail_publisher(session, err).await;
        }
    }

    async fn rebuild_publisher(&self, session: &mut LocalSession) {
        info!("Rebuilding publisher for room {}", session.room_id);
        let tracks = session.outbound_tracks();
        if let Err(e) = session.publisher.rebuild(&self.inner.links, &tracks).await {
            self.fail_publisher(session, e).await;
        }
    }

    async fn fail_publisher(&self, session: &mut LocalSession, err: CallError) {
        error!("Publisher for room {} failed: {}", session.room_id, err);
        session.publisher.fail().await;
        self.report(&err);
    }

    /// After the signaling channel comes back: re-offer, drop consumers whose
    /// offers may have been lost and ask the relay for the current roster.
    async fn resync(&self, session: &mut LocalSession) {
        info!("Signaling restored, resynchronising room {}", session.room_id);
        if let Err(e) = session
            .publisher
            .restart_negotiation(&self.inner.links)
            .await
        {
            self.publisher_fault(session, e).await;
        }

        for consumer_id in session.consumers.negotiating_ids() {
            session
                .consumers
                .teardown(
                    &consumer_id,
                    &mut session.directory,
                    &mut session.streams,
                    self.inner.observer.as_ref(),
                )
                .await;
        }
        session.roster_resync = true;
        self.send(ClientMessage::RequestPeers {});
    }

    /// Remove participants whose `participant-left` was lost with the channel
    async fn prune_departed(&self, session: &mut LocalSession, roster: &[PeerSummary]) {
        let departed: Vec<ParticipantId> = session
            .directory
            .iter()
            .map(|participant| participant.remote_id.clone())
            .filter(|remote_id| !roster.iter().any(|peer| peer.remote_id == remote_id.as_str()))
            .collect();

        for remote_id in departed {
            info!("Participant {} missing from roster, removing", remote_id);
            session
                .consumers
                .remove_participant(
                    &remote_id,
                    &mut session.directory,
                    &mut session.streams,
                    self.inner.observer.as_ref(),
                )
                .await;
        }
    }

    async fn restore_camera(&self, session: &mut LocalSession) {
        let Some(screen) = session.screen.take() else {
            return;
        };
        screen.stop();

        let result = match session.capture.video.clone() {
            Some(camera) => session.publisher.send_video(&camera).await,
            None => session.publisher.detach_video().await,
        };
        if let Err(e) = result {
            self.publisher_fault(session, e).await;
        }
        info!("Screen share stopped");
    }

    fn watch_screen_share(&self, screen: LocalTrack) {
        let events = self.inner.links.events.clone();
        tokio::spawn(async move {
            screen.ended().await;
            events.send(CallEvent::ScreenShareEnded {
                track_id: screen.id().to_string(),
            });
        });
    }

    fn broadcast_status(&self, session: &LocalSession) {
        self.send(ClientMessage::StatusUpdate {
            mic_enabled: session.status.mic_enabled,
            camera_enabled: session.status.camera_enabled,
        });
    }

    fn send(&self, message: ClientMessage) {
        if let Err(e) = self.inner.links.send(message) {
            warn!("Signaling send failed: {}", e);
        }
    }

    fn report(&self, err: &CallError) {
        self.inner.observer.on_call_error(err);
    }
}
