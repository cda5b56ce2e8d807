use cheenhub_contracts::signaling::ClientMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::candidates::PendingCandidates;
use crate::client::CallObserver;
use crate::directory::{ParticipantDirectory, ParticipantMetadata};
use crate::error::Result;
use crate::events::PeerOwner;
use crate::peer::{IceCandidate, PeerConnection, PeerRole, SessionDescription};
use crate::session::Links;
use crate::streams::RemoteStreamTable;
use crate::types::{ConnectionId, ConsumerId, ParticipantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Offer sent, waiting for `consumer-ready`
    Negotiating,
    Connected,
    Closed,
}

/// Receive-only connection for one remote participant
pub(crate) struct Consumer {
    id: ConsumerId,
    remote_id: ParticipantId,
    state: ConsumerState,
    connection: ConnectionId,
    peer: Arc<dyn PeerConnection>,
    candidates: PendingCandidates,
}

impl Consumer {
    /// Create the connection and send the `consume` request
    async fn open(links: &Links, id: ConsumerId, remote_id: ParticipantId) -> Result<Self> {
        let (connection, peer) = links
            .open_peer(PeerRole::Consumer, PeerOwner::Consumer(id.clone()))
            .await?;

        let mut consumer = Consumer {
            id,
            remote_id,
            state: ConsumerState::Negotiating,
            connection,
            peer,
            candidates: PendingCandidates::new(),
        };

        if let Err(e) = consumer.send_offer(links).await {
            consumer.close().await;
            return Err(e);
        }

        info!(
            "Consumer {} ({}) created for participant {}",
            consumer.id, consumer.connection, consumer.remote_id
        );
        Ok(consumer)
    }

    async fn send_offer(&self, links: &Links) -> Result<()> {
        let offer = self.peer.create_offer().await?;
        self.peer.set_local_description(offer.clone()).await?;
        links.send(ClientMessage::Consume {
            remote_id: self.remote_id.to_string(),
            offer,
            consumer_id: self.id.to_string(),
        })
    }

    pub(crate) fn remote_id(&self) -> &ParticipantId {
        &self.remote_id
    }

    pub(crate) fn state(&self) -> ConsumerState {
        self.state
    }

    /// Apply the relay's answer and release queued candidates
    pub(crate) async fn on_ready(&mut self, answer: SessionDescription) -> Result<()> {
        if self.state != ConsumerState::Negotiating {
            warn!("Consumer {} ignoring answer in state {:?}", self.id, self.state);
            return Ok(());
        }

        self.peer.set_remote_description(answer).await?;
        for candidate in self.candidates.mark_remote_description_set() {
            if let Err(e) = self.peer.add_ice_candidate(candidate).await {
                warn!("Consumer {} failed to apply queued candidate: {}", self.id, e);
            }
        }

        self.state = ConsumerState::Connected;
        info!("Consumer {} answer set successfully", self.id);
        Ok(())
    }

    pub(crate) async fn on_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        match self.candidates.accept(candidate) {
            Some(candidate) => {
                self.peer.add_ice_candidate(candidate).await?;
                debug!("Consumer {} added ICE candidate", self.id);
            }
            None => debug!(
                "Consumer {} queued ICE candidate ({} pending)",
                self.id,
                self.candidates.len()
            ),
        }
        Ok(())
    }

    async fn close(&mut self) {
        if self.state == ConsumerState::Closed {
            return;
        }
        self.state = ConsumerState::Closed;
        if let Err(e) = self.peer.close().await {
            warn!("Consumer {} close failed: {}", self.id, e);
        }
        info!("Consumer {} closed", self.id);
    }
}

/// Owns every consuming connection, keyed by consumer id
#[derive(Default)]
pub(crate) struct ConsumerRegistry {
    consumers: HashMap<ConsumerId, Consumer>,
}

impl ConsumerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.consumers.len()
    }

    pub(crate) fn ids(&self) -> Vec<ConsumerId> {
        self.consumers.keys().cloned().collect()
    }

    pub(crate) fn get(&self, id: &ConsumerId) -> Option<&Consumer> {
        self.consumers.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &ConsumerId) -> Option<&mut Consumer> {
        self.consumers.get_mut(id)
    }

    /// The consumer, only if `connection` is its live connection
    pub(crate) fn routed(&mut self, id: &ConsumerId, connection: ConnectionId) -> Option<&mut Consumer> {
        self.consumers
            .get_mut(id)
            .filter(|consumer| consumer.connection == connection)
    }

    pub(crate) fn negotiating_ids(&self) -> Vec<ConsumerId> {
        self.consumers
            .values()
            .filter(|consumer| consumer.state == ConsumerState::Negotiating)
            .map(|consumer| consumer.id.clone())
            .collect()
    }

    /// Make sure `remote_id` is served by exactly one consumer.
    ///
    /// The participant directory is the only thing consulted: if the
    /// participant already has a consumer this is a no-op, which absorbs the
    /// overlapping `peers`/`new-producer` announcements the relay sends.
    /// Returns the id of a newly created consumer.
    pub(crate) async fn ensure_consumer(
        &mut self,
        links: &Links,
        local_id: &ParticipantId,
        directory: &mut ParticipantDirectory,
        remote_id: ParticipantId,
        metadata: ParticipantMetadata,
    ) -> Result<Option<ConsumerId>> {
        if remote_id == *local_id {
            debug!("Ignoring announcement of ourselves");
            return Ok(None);
        }

        let participant = directory.upsert(remote_id.clone(), metadata);
        if let Some(existing) = &participant.consumer_id {
            debug!("Participant {} already consumed by {}", remote_id, existing);
            return Ok(None);
        }

        let consumer_id = ConsumerId::derive(local_id, &remote_id);
        // Claimed before any await so a concurrent announcement sees it
        participant.consumer_id = Some(consumer_id.clone());

        match Consumer::open(links, consumer_id.clone(), remote_id.clone()).await {
            Ok(consumer) => {
                self.consumers.insert(consumer_id.clone(), consumer);
                Ok(Some(consumer_id))
            }
            Err(e) => {
                if let Some(participant) = directory.get_mut(&remote_id) {
                    participant.consumer_id = None;
                }
                Err(e)
            }
        }
    }

    /// Tear one consumer down: close its connection, drop its stream, clear
    /// the participant's back-reference and notify the observer.
    ///
    /// Every teardown path goes through here. Unknown ids are a no-op.
    pub(crate) async fn teardown(
        &mut self,
        id: &ConsumerId,
        directory: &mut ParticipantDirectory,
        streams: &mut RemoteStreamTable,
        observer: &dyn CallObserver,
    ) -> bool {
        let Some(mut consumer) = self.consumers.remove(id) else {
            return false;
        };

        consumer.close().await;
        streams.remove(id);
        if let Some(participant) = directory.get_mut(&consumer.remote_id) {
            if participant.consumer_id.as_ref() == Some(id) {
                participant.consumer_id = None;
            }
        }

        observer.on_stream_removed(id);
        true
    }

    /// Forget a departed participant and tear down its consumer.
    ///
    /// Unknown or already removed participants are a no-op.
    pub(crate) async fn remove_participant(
        &mut self,
        remote_id: &ParticipantId,
        directory: &mut ParticipantDirectory,
        streams: &mut RemoteStreamTable,
        observer: &dyn CallObserver,
    ) -> bool {
        let Some(participant) = directory.remove(remote_id) else {
            debug!("Participant {} not known, nothing to remove", remote_id);
            return false;
        };
        info!("Participant {} left", remote_id);

        match participant.consumer_id {
            Some(consumer_id) => self.teardown(&consumer_id, directory, streams, observer).await,
            None => false,
        }
    }
}
