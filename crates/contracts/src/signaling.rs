//! Signaling messages exchanged with the media relay.
//!
//! Every frame is a JSON object of the form `{ "event": "<name>", "data": {...} }`.
//! Event names are kebab-case and payload fields are camelCase.

use serde::{Deserialize, Serialize};

/// Kind of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// SDP offer or answer as carried over the signaling channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Trickled ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Remote participant as announced by the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub remote_id: String,
    pub display_name: String,
    #[serde(default)]
    pub contact: String,
}

/// Messages sent by the client to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Publisher offer, sent for the first negotiation and every renegotiation
    Join {
        room_id: String,
        offer: SessionDescription,
    },
    RequestPeers {},
    Consume {
        remote_id: String,
        offer: SessionDescription,
        consumer_id: String,
    },
    /// Publisher-side trickle candidate
    LocalCandidate { candidate: IceCandidate },
    ConsumerCandidate {
        candidate: IceCandidate,
        consumer_id: String,
    },
    StatusUpdate {
        mic_enabled: bool,
        camera_enabled: bool,
    },
    Leave { room_id: String },
}

/// Messages pushed by the relay to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Answer to the latest publisher offer
    Answer {
        #[serde(alias = "offer")]
        answer: SessionDescription,
    },
    Peers { list: Vec<PeerSummary> },
    ConsumerReady {
        answer: SessionDescription,
        consumer_id: String,
    },
    /// Relay-side candidate for the publisher connection
    RelayCandidate { candidate: IceCandidate },
    ConsumerCandidate {
        candidate: IceCandidate,
        consumer_id: String,
    },
    NewProducer(PeerSummary),
    ParticipantLeft { remote_id: String },
    StatusUpdated {
        remote_id: String,
        mic_enabled: bool,
        camera_enabled: bool,
    },
    SignalingError { message: String },
}

impl ServerMessage {
    /// Event name as it appears on the wire, for logging
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Answer { .. } => "answer",
            ServerMessage::Peers { .. } => "peers",
            ServerMessage::ConsumerReady { .. } => "consumer-ready",
            ServerMessage::RelayCandidate { .. } => "relay-candidate",
            ServerMessage::ConsumerCandidate { .. } => "consumer-candidate",
            ServerMessage::NewProducer(_) => "new-producer",
            ServerMessage::ParticipantLeft { .. } => "participant-left",
            ServerMessage::StatusUpdated { .. } => "status-updated",
            ServerMessage::SignalingError { .. } => "signaling-error",
        }
    }
}
