use cheenhub_contracts::signaling::ClientMessage;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::candidates::PendingCandidates;
use crate::error::{CallError, Result};
use crate::events::PeerOwner;
use crate::media::LocalTrack;
use crate::peer::{IceCandidate, IceState, PeerConnection, PeerRole, SenderId, SessionDescription};
use crate::session::Links;
use crate::types::{ConnectionId, RoomId};

/// Lifecycle of the publishing connection.
///
/// `Idle -> Negotiating -> Connected <-> Negotiating`, and on ICE loss
/// `Disconnected -> Rebuilding -> Negotiating -> Connected`, or `Failed` once
/// the rebuild budget is spent. `Failed` is terminal for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Idle,
    Negotiating,
    Connected,
    Disconnected,
    Rebuilding,
    Failed,
}

/// What the orchestrator should do after an ICE transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IceAction {
    Ignore,
    Rebuild,
    GiveUp,
}

/// Tracks the publisher should be sending
#[derive(Debug, Clone, Default)]
pub(crate) struct OutboundTracks {
    pub(crate) audio: Option<LocalTrack>,
    pub(crate) video: Option<LocalTrack>,
}

/// Point-in-time view of the publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherSnapshot {
    pub state: PublisherState,
    /// Offers sent to the relay this session, first negotiation included
    pub offers_sent: u32,
    pub rebuilds: u32,
    pub audio_attached: bool,
    pub video_attached: bool,
}

/// The single connection sending the local stream to the relay
pub(crate) struct Publisher {
    room_id: RoomId,
    state: PublisherState,
    connection: Option<(ConnectionId, Arc<dyn PeerConnection>)>,
    candidates: PendingCandidates,
    audio_sender: Option<SenderId>,
    video_sender: Option<SenderId>,
    /// Negotiation requested while an offer was outstanding
    renegotiate_pending: bool,
    announced: bool,
    offers_sent: u32,
    rebuilds: u32,
    max_rebuilds: u32,
}

impl Publisher {
    pub(crate) fn new(room_id: RoomId, max_rebuilds: u32) -> Self {
        Self {
            room_id,
            state: PublisherState::Idle,
            connection: None,
            candidates: PendingCandidates::new(),
            audio_sender: None,
            video_sender: None,
            renegotiate_pending: false,
            announced: false,
            offers_sent: 0,
            rebuilds: 0,
            max_rebuilds,
        }
    }

    pub(crate) fn snapshot(&self) -> PublisherSnapshot {
        PublisherSnapshot {
            state: self.state,
            offers_sent: self.offers_sent,
            rebuilds: self.rebuilds,
            audio_attached: self.audio_sender.is_some(),
            video_attached: self.video_sender.is_some(),
        }
    }

    pub(crate) fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Whether `connection` is the live publisher connection
    pub(crate) fn is_current(&self, connection: ConnectionId) -> bool {
        self.connection.as_ref().is_some_and(|(id, _)| *id == connection)
    }

    pub(crate) fn can_rebuild(&self) -> bool {
        self.rebuilds < self.max_rebuilds
    }

    fn peer(&self) -> Option<Arc<dyn PeerConnection>> {
        self.connection.as_ref().map(|(_, peer)| Arc::clone(peer))
    }

    /// Create the connection and attach the outbound tracks.
    ///
    /// No offer is sent here; the connection raises negotiation-needed once
    /// tracks are attached and the first offer follows from that.
    pub(crate) async fn open(&mut self, links: &Links, tracks: &OutboundTracks) -> Result<()> {
        let (connection, peer) = links
            .open_peer(PeerRole::Publisher, PeerOwner::Publisher)
            .await?;
        self.connection = Some((connection, Arc::clone(&peer)));
        self.candidates = PendingCandidates::new();

        if let Some(audio) = &tracks.audio {
            self.audio_sender = Some(peer.add_track(audio).await?);
        }
        if let Some(video) = &tracks.video {
            self.video_sender = Some(peer.add_track(video).await?);
        }

        info!("Publisher {} opened for room {}", connection, self.room_id);
        Ok(())
    }

    pub(crate) async fn on_negotiation_needed(&mut self, links: &Links) -> Result<()> {
        match self.state {
            PublisherState::Negotiating => {
                debug!("Publisher negotiation already in flight, queueing another");
                self.renegotiate_pending = true;
                Ok(())
            }
            PublisherState::Failed => Ok(()),
            _ => self.negotiate(links).await,
        }
    }

    /// Send a fresh offer even if one is outstanding. Used after the
    /// signaling channel comes back, when the last offer may have been lost.
    pub(crate) async fn restart_negotiation(&mut self, links: &Links) -> Result<()> {
        if self.state == PublisherState::Failed || self.connection.is_none() {
            return Ok(());
        }
        self.negotiate(links).await
    }

    async fn negotiate(&mut self, links: &Links) -> Result<()> {
        let Some(peer) = self.peer() else {
            return Ok(());
        };

        self.state = PublisherState::Negotiating;
        self.renegotiate_pending = false;

        let offer = peer.create_offer().await?;
        peer.set_local_description(offer.clone()).await?;
        links.send(ClientMessage::Join {
            room_id: self.room_id.to_string(),
            offer,
        })?;

        self.offers_sent += 1;
        info!(
            "Publisher sent offer #{} for room {}",
            self.offers_sent, self.room_id
        );
        Ok(())
    }

    /// Apply the relay's answer.
    ///
    /// Returns `true` the first time the publisher becomes connected in this session.
    pub(crate) async fn on_answer(&mut self, links: &Links, answer: SessionDescription) -> Result<bool> {
        if self.state != PublisherState::Negotiating {
            warn!("Publisher ignoring answer in state {:?}", self.state);
            return Ok(false);
        }
        let Some(peer) = self.peer() else {
            return Ok(false);
        };

        peer.set_remote_description(answer).await?;
        for candidate in self.candidates.mark_remote_description_set() {
            if let Err(e) = peer.add_ice_candidate(candidate).await {
                warn!("Publisher failed to apply queued candidate: {}", e);
            }
        }

        self.state = PublisherState::Connected;
        let first = !self.announced;
        self.announced = true;
        info!("Publisher connected to room {}", self.room_id);

        if self.renegotiate_pending {
            self.negotiate(links).await?;
        }
        Ok(first)
    }

    pub(crate) async fn on_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        let Some(peer) = self.peer() else {
            debug!("Publisher has no connection, dropping relay candidate");
            return Ok(());
        };
        match self.candidates.accept(candidate) {
            Some(candidate) => peer.add_ice_candidate(candidate).await,
            None => {
                debug!(
                    "Publisher queued relay candidate ({} pending)",
                    self.candidates.len()
                );
                Ok(())
            }
        }
    }

    pub(crate) fn on_ice_state(&mut self, state: IceState) -> IceAction {
        match state {
            IceState::Disconnected | IceState::Failed => {
                if matches!(self.state, PublisherState::Failed | PublisherState::Rebuilding) {
                    return IceAction::Ignore;
                }
                warn!("Publisher ICE {:?} in room {}", state, self.room_id);
                self.state = PublisherState::Disconnected;
                if self.can_rebuild() {
                    IceAction::Rebuild
                } else {
                    IceAction::GiveUp
                }
            }
            _ => {
                debug!("Publisher ICE {:?}", state);
                IceAction::Ignore
            }
        }
    }

    /// Replace the connection with a new one carrying the same tracks
    pub(crate) async fn rebuild(&mut self, links: &Links, tracks: &OutboundTracks) -> Result<()> {
        if !self.can_rebuild() {
            return Err(CallError::IceFailure("publisher rebuild budget spent".to_string()));
        }
        self.rebuilds += 1;
        self.state = PublisherState::Rebuilding;
        self.renegotiate_pending = false;
        self.close_connection().await;
        self.open(links, tracks).await
    }

    pub(crate) async fn fail(&mut self) {
        self.state = PublisherState::Failed;
        self.close_connection().await;
    }

    pub(crate) async fn close(&mut self) {
        self.close_connection().await;
        self.state = PublisherState::Idle;
    }

    async fn close_connection(&mut self) {
        if let Some((connection, peer)) = self.connection.take() {
            if let Err(e) = peer.close().await {
                warn!("Publisher {} close failed: {}", connection, e);
            }
            info!("Publisher {} closed", connection);
        }
        self.audio_sender = None;
        self.video_sender = None;
        self.candidates = PendingCandidates::new();
    }

    /// Stop sending audio altogether. Triggers renegotiation.
    pub(crate) async fn detach_audio(&mut self) -> Result<()> {
        let (Some(peer), Some(sender)) = (self.peer(), self.audio_sender) else {
            return Ok(());
        };
        peer.remove_track(sender).await?;
        self.audio_sender = None;
        Ok(())
    }

    /// Start sending audio again. Triggers renegotiation.
    pub(crate) async fn attach_audio(&mut self, track: &LocalTrack) -> Result<()> {
        if self.audio_sender.is_some() {
            return Ok(());
        }
        let Some(peer) = self.peer() else {
            return Ok(());
        };
        self.audio_sender = Some(peer.add_track(track).await?);
        Ok(())
    }

    /// Send `track` as the outgoing video, in place when the transport allows it
    pub(crate) async fn send_video(&mut self, track: &LocalTrack) -> Result<()> {
        let Some(peer) = self.peer() else {
            return Ok(());
        };
        if let Some(sender) = self.video_sender {
            if peer.replace_track(sender, track).await? {
                debug!("Publisher swapped video track in place");
                return Ok(());
            }
            peer.remove_track(sender).await?;
            self.video_sender = None;
        }
        self.video_sender = Some(peer.add_track(track).await?);
        Ok(())
    }

    pub(crate) async fn detach_video(&mut self) -> Result<()> {
        let (Some(peer), Some(sender)) = (self.peer(), self.video_sender) else {
            return Ok(());
        };
        peer.remove_track(sender).await?;
        self.video_sender = None;
        Ok(())
    }
}
