use cheenhub_contracts::signaling::ClientMessage;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::consumer::ConsumerRegistry;
use crate::directory::ParticipantDirectory;
use crate::error::Result;
use crate::events::{EventSender, PeerOwner};
use crate::media::{LocalMediaStream, LocalTrack, MediaStatus};
use crate::peer::{PeerConnection, PeerConnectionFactory, PeerRole};
use crate::publisher::{OutboundTracks, Publisher};
use crate::signaling::SignalingChannel;
use crate::streams::RemoteStreamTable;
use crate::types::{ConnectionId, RoomId};

/// Collaborators shared by the publisher and every consumer
pub(crate) struct Links {
    pub(crate) signaling: Arc<dyn SignalingChannel>,
    pub(crate) peers: Arc<dyn PeerConnectionFactory>,
    pub(crate) events: EventSender,
    next_connection: AtomicU64,
}

impl Links {
    pub(crate) fn new(
        signaling: Arc<dyn SignalingChannel>,
        peers: Arc<dyn PeerConnectionFactory>,
        events: EventSender,
    ) -> Self {
        Self {
            signaling,
            peers,
            events,
            next_connection: AtomicU64::new(1),
        }
    }

    fn next_connection(&self) -> ConnectionId {
        ConnectionId::new(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a connection whose callbacks are stamped with `owner` and a fresh connection id
    pub(crate) async fn open_peer(
        &self,
        role: PeerRole,
        owner: PeerOwner,
    ) -> Result<(ConnectionId, Arc<dyn PeerConnection>)> {
        let connection = self.next_connection();
        let sink = self.events.peer_sink(owner, connection);
        let peer = self.peers.create(role, sink).await?;
        Ok((connection, peer))
    }

    pub(crate) fn send(&self, message: ClientMessage) -> Result<()> {
        self.signaling.send(message)
    }
}

/// Everything that exists for the duration of one call attempt
pub(crate) struct LocalSession {
    pub(crate) room_id: RoomId,
    pub(crate) capture: LocalMediaStream,
    pub(crate) screen: Option<LocalTrack>,
    pub(crate) status: MediaStatus,
    pub(crate) publisher: Publisher,
    pub(crate) consumers: ConsumerRegistry,
    pub(crate) directory: ParticipantDirectory,
    pub(crate) streams: RemoteStreamTable,
    /// The next `peers` list is authoritative: anyone missing from it left
    /// while signaling was down
    pub(crate) roster_resync: bool,
}

impl LocalSession {
    pub(crate) fn new(room_id: RoomId, capture: LocalMediaStream, max_publisher_rebuilds: u32) -> Self {
        let status = MediaStatus {
            mic_enabled: capture.audio.is_some(),
            camera_enabled: capture.video.is_some(),
        };
        Self {
            publisher: Publisher::new(room_id.clone(), max_publisher_rebuilds),
            room_id,
            capture,
            screen: None,
            status,
            consumers: ConsumerRegistry::new(),
            directory: ParticipantDirectory::new(),
            streams: RemoteStreamTable::new(),
            roster_resync: false,
        }
    }

    /// Tracks the publisher should currently be sending. A muted microphone
    /// is left out entirely and a screen share takes the camera's place.
    pub(crate) fn outbound_tracks(&self) -> OutboundTracks {
        OutboundTracks {
            audio: self
                .capture
                .audio
                .clone()
                .filter(|_| self.status.mic_enabled),
            video: self.screen.clone().or_else(|| self.capture.video.clone()),
        }
    }

    pub(crate) fn stop_capture(&mut self) {
        self.capture.stop();
        if let Some(screen) = self.screen.take() {
            screen.stop();
        }
    }

    pub(crate) fn live_connections(&self) -> usize {
        usize::from(self.publisher.has_connection()) + self.consumers.len()
    }
}
