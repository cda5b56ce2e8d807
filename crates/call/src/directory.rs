use std::collections::HashMap;

use crate::media::MediaStatus;
use crate::types::{ConsumerId, ParticipantId};

/// Descriptive data the relay sends about a participant
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParticipantMetadata {
    pub display_name: String,
    pub contact: String,
}

/// A remote participant currently in the call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub remote_id: ParticipantId,
    pub display_name: String,
    pub contact: String,
    /// Consumer currently serving this participant. Back-reference only,
    /// the consumer itself lives in the registry.
    pub consumer_id: Option<ConsumerId>,
    /// Last mic/camera flags reported by the relay
    pub status: MediaStatus,
    /// Consumer recreations spent since the last successful negotiation
    pub consumer_retries: u32,
}

/// Source of truth for "is this remote participant being consumed"
#[derive(Debug, Default)]
pub struct ParticipantDirectory {
    entries: HashMap<ParticipantId, Participant>,
}

impl ParticipantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a participant or refresh its metadata.
    ///
    /// An existing entry keeps its consumer association and status.
    pub fn upsert(&mut self, remote_id: ParticipantId, metadata: ParticipantMetadata) -> &mut Participant {
        let participant = self
            .entries
            .entry(remote_id.clone())
            .or_insert_with(|| Participant {
                remote_id,
                display_name: String::new(),
                contact: String::new(),
                consumer_id: None,
                status: MediaStatus::default(),
                consumer_retries: 0,
            });
        participant.display_name = metadata.display_name;
        participant.contact = metadata.contact;
        participant
    }

    pub fn get(&self, remote_id: &ParticipantId) -> Option<&Participant> {
        self.entries.get(remote_id)
    }

    pub fn get_mut(&mut self, remote_id: &ParticipantId) -> Option<&mut Participant> {
        self.entries.get_mut(remote_id)
    }

    pub fn remove(&mut self, remote_id: &ParticipantId) -> Option<Participant> {
        self.entries.remove(remote_id)
    }

    pub fn is_consumed(&self, remote_id: &ParticipantId) -> bool {
        self.entries
            .get(remote_id)
            .is_some_and(|participant| participant.consumer_id.is_some())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
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
