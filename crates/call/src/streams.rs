use std::collections::HashMap;

use crate::directory::Participant;
use crate::media::MediaStatus;
use crate::peer::RemoteTrack;
use crate::types::{ConsumerId, ParticipantId};

/// Media received from one remote participant
#[derive(Debug, Clone)]
pub struct RemoteStream {
    pub id: String,
    pub tracks: Vec<RemoteTrack>,
}

/// What the UI layer gets for each consumed participant
#[derive(Debug, Clone)]
pub struct RemoteStreamEntry {
    pub consumer_id: ConsumerId,
    pub remote_id: ParticipantId,
    pub display_name: String,
    pub stream: RemoteStream,
    pub mic_enabled: bool,
    pub camera_enabled: bool,
}

/// Streams received on consuming connections, keyed by consumer
#[derive(Debug, Default)]
pub struct RemoteStreamTable {
    entries: HashMap<ConsumerId, RemoteStreamEntry>,
}

impl RemoteStreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a received track to the consumer's stream, creating the entry on
    /// first sight. A track id already present is replaced.
    pub fn install_track(
        &mut self,
        consumer_id: &ConsumerId,
        participant: &Participant,
        track: RemoteTrack,
    ) -> &RemoteStreamEntry {
        let entry = self
            .entries
            .entry(consumer_id.clone())
            .or_insert_with(|| RemoteStreamEntry {
                consumer_id: consumer_id.clone(),
                remote_id: participant.remote_id.clone(),
                display_name: participant.display_name.clone(),
                stream: RemoteStream {
                    id: track.stream_id.clone(),
                    tracks: Vec::new(),
                },
                mic_enabled: participant.status.mic_enabled,
                camera_enabled: participant.status.camera_enabled,
            });

        entry.stream.tracks.retain(|existing| existing.id != track.id);
        entry.stream.tracks.push(track);
        entry
    }

    /// Update mic/camera flags in place
    pub fn update_status(&mut self, consumer_id: &ConsumerId, status: MediaStatus) -> Option<&RemoteStreamEntry> {
        let entry = self.entries.get_mut(consumer_id)?;
        entry.mic_enabled = status.mic_enabled;
        entry.camera_enabled = status.camera_enabled;
        Some(entry)
    }

    pub fn get(&self, consumer_id: &ConsumerId) -> Option<&RemoteStreamEntry> {
        self.entries.get(consumer_id)
    }

    pub fn remove(&mut self, consumer_id: &ConsumerId) -> Option<RemoteStreamEntry> {
        self.entries.remove(consumer_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RemoteStreamEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
