//! CheenHub group call client.
//!
//! Joins a group call routed through a star-topology media relay: one
//! publishing connection sends the local camera and microphone, and one
//! receive-only connection per remote participant brings their stream back.
//!
//! ## Architecture
//!
//! - **`CallClient`**: the orchestrator and public API (connect, leave, media controls)
//! - **`Publisher`**: the single outbound connection with its negotiation state machine
//! - **`ConsumerRegistry`**: one consuming connection per remote participant
//! - **`ParticipantDirectory`**: who is in the call and which consumer serves them
//! - **`RemoteStreamTable`**: received streams handed to the UI through `CallObserver`
//!
//! Connections, capture devices and the signaling channel are injected through
//! [`CallDeps`], with webrtc-rs ([`rtc`]) and WebSocket ([`signaling::WsSignaling`])
//! implementations for production use.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let (events_tx, events_rx) = event_channel();
//! let client = CallClient::new(local_id, config, deps, events_tx);
//! tokio::spawn({
//!     let client = client.clone();
//!     async move { client.run(events_rx).await }
//! });
//! client.connect("room-42").await?;
//! ```

mod candidates;
mod client;
mod config;
mod consumer;
mod directory;
mod error;
mod events;
mod media;
mod peer;
mod publisher;
pub mod rtc;
mod session;
pub mod signaling;
mod streams;
mod types;

pub use candidates::PendingCandidates;
pub use client::{CallClient, CallDeps, CallObserver};
pub use config::{CallConfig, IceServerConfig};
pub use consumer::ConsumerState;
pub use directory::{Participant, ParticipantDirectory, ParticipantMetadata};
pub use error::{CallError, Result};
pub use events::{CallEvent, EventReceiver, EventSender, PeerEventSink, PeerOwner, event_channel};
pub use media::{
    CaptureConstraints, CaptureDevices, LocalMediaStream, LocalTrack, MediaStatus, SyntheticCapture,
    TrackKind, TrackSource,
};
pub use peer::{
    IceCandidate, IceState, PeerConnection, PeerConnectionFactory, PeerEvent, PeerRole, RemoteTrack,
    SdpKind, SenderId, SessionDescription,
};
pub use publisher::{PublisherSnapshot, PublisherState};
pub use signaling::SignalingChannel;
pub use streams::{RemoteStream, RemoteStreamEntry, RemoteStreamTable};
pub use types::{ConnectionId, ConsumerId, ParticipantId, RoomId};

pub use cheenhub_contracts::signaling::{ClientMessage, PeerSummary, ServerMessage};
