//! In-memory collaborators for driving a `CallClient` without a network.

#![allow(dead_code)]

use async_trait::async_trait;
use cheenhub_call::{
    CallClient, CallConfig, CallDeps, CallError, CallEvent, CallObserver, CaptureConstraints,
    CaptureDevices, ClientMessage, ConnectionId, ConsumerId, EventReceiver, IceCandidate,
    LocalMediaStream, LocalTrack, ParticipantId, PeerConnection, PeerConnectionFactory, PeerEvent,
    PeerEventSink, PeerOwner, PeerRole, PeerSummary, RemoteStreamEntry, RemoteTrack, Result,
    SenderId, ServerMessage, SessionDescription, SignalingChannel, TrackKind, TrackSource,
    event_channel,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct FakeCapture {
    pub deny: bool,
    opened: Mutex<Vec<LocalTrack>>,
}

impl FakeCapture {
    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    /// Every track handed out so far, screen shares included
    pub fn tracks(&self) -> Vec<LocalTrack> {
        self.opened.lock().unwrap().clone()
    }

    pub fn track(&self, source: TrackSource) -> Option<LocalTrack> {
        self.tracks()
            .into_iter()
            .filter(|track| track.source() == source)
            .last()
    }
}

#[async_trait]
impl CaptureDevices for FakeCapture {
    async fn open_user_media(&self, constraints: &CaptureConstraints) -> Result<LocalMediaStream> {
        if self.deny {
            return Err(CallError::MediaAccess("permission denied".to_string()));
        }
        let audio = constraints
            .audio
            .then(|| LocalTrack::new(TrackSource::Microphone, "local-stream"));
        let video = constraints
            .video
            .then(|| LocalTrack::new(TrackSource::Camera, "local-stream"));

        let mut opened = self.opened.lock().unwrap();
        opened.extend(audio.iter().cloned());
        opened.extend(video.iter().cloned());

        Ok(LocalMediaStream {
            id: "local-stream".to_string(),
            audio,
            video,
        })
    }

    async fn open_display_media(&self) -> Result<LocalTrack> {
        let screen = LocalTrack::new(TrackSource::Screen, "screen-stream");
        self.opened.lock().unwrap().push(screen.clone());
        Ok(screen)
    }
}

#[derive(Default)]
struct FakePeerState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    candidates: Vec<IceCandidate>,
    tracks: HashMap<SenderId, LocalTrack>,
    next_sender: u64,
    offers: u32,
    negotiation_flagged: bool,
    closed: bool,
}

/// Peer connection that records what the orchestrator did to it
pub struct FakePeer {
    pub role: PeerRole,
    sink: PeerEventSink,
    replace_in_place: bool,
    fail_remote: AtomicBool,
    state: Mutex<FakePeerState>,
}

impl FakePeer {
    pub fn emit(&self, event: PeerEvent) {
        self.sink.emit(event);
    }

    pub fn connection(&self) -> ConnectionId {
        self.sink.connection()
    }

    pub fn consumer_id(&self) -> Option<ConsumerId> {
        match self.sink.owner() {
            PeerOwner::Consumer(id) => Some(id.clone()),
            PeerOwner::Publisher => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().unwrap().remote.clone()
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .candidates
            .iter()
            .map(|candidate| candidate.candidate.clone())
            .collect()
    }

    pub fn attached(&self, kind: TrackKind) -> Vec<LocalTrack> {
        self.state
            .lock()
            .unwrap()
            .tracks
            .values()
            .filter(|track| track.kind() == kind)
            .cloned()
            .collect()
    }

    /// The next `set_remote_description` fails
    pub fn fail_next_remote_description(&self) {
        self.fail_remote.store(true, Ordering::SeqCst);
    }

    /// Deliver a remote track the way a transport would
    pub fn deliver_track(&self, kind: TrackKind) {
        let owner = self
            .consumer_id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "publisher".to_string());
        self.emit(PeerEvent::Track(RemoteTrack {
            id: format!("{owner}-{kind:?}"),
            stream_id: format!("stream-{owner}"),
            kind,
            media: None,
        }));
    }

    fn flag_negotiation(&self, state: &mut FakePeerState) {
        if !state.negotiation_flagged {
            state.negotiation_flagged = true;
            self.sink.emit(PeerEvent::NegotiationNeeded);
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(CallError::Negotiation("connection closed".to_string()));
        }
        state.negotiation_flagged = false;
        state.offers += 1;
        Ok(SessionDescription::offer(format!(
            "offer {} #{}",
            self.connection(),
            state.offers
        )))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.state.lock().unwrap().local = Some(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if self.fail_remote.swap(false, Ordering::SeqCst) {
            return Err(CallError::Negotiation("answer does not match offer".to_string()));
        }
        self.state.lock().unwrap().remote = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.remote.is_none() {
            return Err(CallError::Negotiation("no remote description".to_string()));
        }
        state.candidates.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<SenderId> {
        let mut state = self.state.lock().unwrap();
        state.next_sender += 1;
        let sender = SenderId(state.next_sender);
        state.tracks.insert(sender, track.clone());
        self.flag_negotiation(&mut state);
        Ok(sender)
    }

    async fn remove_track(&self, sender: SenderId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.tracks.remove(&sender).is_none() {
            return Err(CallError::Negotiation("unknown sender".to_string()));
        }
        self.flag_negotiation(&mut state);
        Ok(())
    }

    async fn replace_track(&self, sender: SenderId, track: &LocalTrack) -> Result<bool> {
        if !self.replace_in_place {
            return Ok(false);
        }
        let mut state = self.state.lock().unwrap();
        match state.tracks.get_mut(&sender) {
            Some(slot) => {
                *slot = track.clone();
                Ok(true)
            }
            None => Err(CallError::Negotiation("unknown sender".to_string())),
        }
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

pub struct FakePeers {
    replace_in_place: bool,
    created: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakePeers {
    pub fn new() -> Self {
        Self {
            replace_in_place: true,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Transport without in-place track replacement
    pub fn without_replace() -> Self {
        Self {
            replace_in_place: false,
            ..Self::new()
        }
    }

    pub fn all(&self) -> Vec<Arc<FakePeer>> {
        self.created.lock().unwrap().clone()
    }

    pub fn publishers(&self) -> Vec<Arc<FakePeer>> {
        self.all()
            .into_iter()
            .filter(|peer| peer.role == PeerRole::Publisher)
            .collect()
    }

    /// Most recently created publisher connection
    pub fn publisher(&self) -> Arc<FakePeer> {
        self.publishers().pop().expect("no publisher connection created")
    }

    pub fn consumers(&self) -> Vec<Arc<FakePeer>> {
        self.all()
            .into_iter()
            .filter(|peer| peer.role == PeerRole::Consumer)
            .collect()
    }

    /// Most recently created connection for `consumer_id`
    pub fn consumer(&self, consumer_id: &ConsumerId) -> Arc<FakePeer> {
        self.consumers()
            .into_iter()
            .filter(|peer| peer.consumer_id().as_ref() == Some(consumer_id))
            .last()
            .expect("no connection for consumer")
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeers {
    async fn create(&self, role: PeerRole, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>> {
        let peer = Arc::new(FakePeer {
            role,
            sink: events,
            replace_in_place: self.replace_in_place,
            fail_remote: AtomicBool::new(false),
            state: Mutex::new(FakePeerState::default()),
        });
        self.created.lock().unwrap().push(Arc::clone(&peer));
        Ok(peer)
    }
}

#[derive(Default)]
pub struct RecordingSignaling {
    sent: Mutex<Vec<ClientMessage>>,
}

impl RecordingSignaling {
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&ClientMessage) -> bool) -> usize {
        self.sent.lock().unwrap().iter().filter(|m| predicate(m)).count()
    }

    pub fn offers(&self) -> usize {
        self.count(|m| matches!(m, ClientMessage::Join { .. }))
    }

    pub fn consume_requests(&self) -> usize {
        self.count(|m| matches!(m, ClientMessage::Consume { .. }))
    }

    pub fn last(&self) -> Option<ClientMessage> {
        self.sent.lock().unwrap().last().cloned()
    }
}

impl SignalingChannel for RecordingSignaling {
    fn send(&self, message: ClientMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub added: Mutex<Vec<RemoteStreamEntry>>,
    pub removed: Mutex<Vec<ConsumerId>>,
    pub errors: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn added(&self) -> Vec<RemoteStreamEntry> {
        self.added.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<ConsumerId> {
        self.removed.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl CallObserver for RecordingObserver {
    fn on_stream_added(&self, entry: &RemoteStreamEntry) {
        self.added.lock().unwrap().push(entry.clone());
    }

    fn on_stream_removed(&self, consumer_id: &ConsumerId) {
        self.removed.lock().unwrap().push(consumer_id.clone());
    }

    fn on_call_error(&self, error: &CallError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

pub fn peer(remote_id: &str) -> PeerSummary {
    PeerSummary {
        remote_id: remote_id.to_string(),
        display_name: remote_id.to_uppercase(),
        contact: format!("{remote_id}@example.com"),
    }
}

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate::new(format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000 typ host"))
}

/// A client wired to fakes, with helpers that play the relay's part
pub struct Harness {
    pub local_id: ParticipantId,
    pub client: CallClient,
    pub events: EventReceiver,
    pub capture: Arc<FakeCapture>,
    pub peers: Arc<FakePeers>,
    pub signaling: Arc<RecordingSignaling>,
    pub observer: Arc<RecordingObserver>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeCapture::default(), FakePeers::new(), CallConfig::default())
    }

    pub fn with(capture: FakeCapture, peers: FakePeers, config: CallConfig) -> Self {
        let local_id = ParticipantId::from("alice");
        let capture = Arc::new(capture);
        let peers = Arc::new(peers);
        let signaling = Arc::new(RecordingSignaling::default());
        let observer = Arc::new(RecordingObserver::default());
        let (events_tx, events) = event_channel();

        let client = CallClient::new(
            local_id.clone(),
            config,
            CallDeps {
                devices: capture.clone(),
                peers: peers.clone(),
                signaling: signaling.clone(),
                observer: observer.clone(),
            },
            events_tx,
        );

        Self {
            local_id,
            client,
            events,
            capture,
            peers,
            signaling,
            observer,
        }
    }

    /// Handle everything queued so far
    pub async fn settle(&mut self) {
        self.client.drain(&mut self.events).await;
    }

    pub async fn deliver(&mut self, message: ServerMessage) {
        self.client.handle_event(CallEvent::Signal(message)).await;
        self.settle().await;
    }

    /// Connect and complete the first publisher negotiation
    pub async fn join(&mut self) {
        self.client.connect("room-1").await.unwrap();
        self.settle().await;
        self.answer_publisher().await;
    }

    pub async fn answer_publisher(&mut self) {
        self.deliver(ServerMessage::Answer {
            answer: SessionDescription::answer("relay answer"),
        })
        .await;
    }

    pub fn consumer_id(&self, remote_id: &str) -> ConsumerId {
        ConsumerId::derive(&self.local_id, &ParticipantId::from(remote_id))
    }

    pub async fn announce(&mut self, remote_id: &str) {
        self.deliver(ServerMessage::NewProducer(peer(remote_id))).await;
    }

    pub async fn consumer_ready(&mut self, remote_id: &str) {
        let consumer_id = self.consumer_id(remote_id);
        self.deliver(ServerMessage::ConsumerReady {
            answer: SessionDescription::answer(format!("answer for {consumer_id}")),
            consumer_id: consumer_id.to_string(),
        })
        .await;
    }

    /// Announce, answer and deliver audio and video for a participant
    pub async fn add_remote(&mut self, remote_id: &str) {
        self.announce(remote_id).await;
        self.consumer_ready(remote_id).await;
        let peer = self.peers.consumer(&self.consumer_id(remote_id));
        peer.deliver_track(TrackKind::Audio);
        peer.deliver_track(TrackKind::Video);
        self.settle().await;
    }
}
