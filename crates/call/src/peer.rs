//! Transport seam between the orchestrator and a WebRTC stack

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use webrtc::track::track_remote::TrackRemote;

pub use cheenhub_contracts::signaling::{IceCandidate, SdpKind, SessionDescription};

use crate::error::Result;
use crate::events::PeerEventSink;
use crate::media::{LocalTrack, TrackKind};

/// What a connection is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Sends the local stream
    Publisher,
    /// Receive-only, accepts audio and video but never sends
    Consumer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Opaque handle for a track attached to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId(pub u64);

/// Track received on a consuming connection
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    /// Underlying RTP source when the transport is webrtc-rs
    pub media: Option<Arc<TrackRemote>>,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .field("media", &self.media.is_some())
            .finish()
    }
}

/// Callbacks raised by a connection
#[derive(Debug, Clone)]
pub enum PeerEvent {
    NegotiationNeeded,
    /// Locally gathered candidate to trickle to the relay
    LocalCandidate(IceCandidate),
    IceStateChanged(IceState),
    Track(RemoteTrack),
}

/// A single peer connection
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn add_track(&self, track: &LocalTrack) -> Result<SenderId>;

    async fn remove_track(&self, sender: SenderId) -> Result<()>;

    /// Swap the track behind `sender` without renegotiating.
    ///
    /// Returns `false` when the transport cannot replace in place.
    async fn replace_track(&self, sender: SenderId, track: &LocalTrack) -> Result<bool>;

    async fn close(&self) -> Result<()>;
}

/// Creates connections wired to the orchestrator's event queue
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, role: PeerRole, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>>;
}
