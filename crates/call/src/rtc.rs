//! webrtc-rs implementation of the transport seam

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::config::IceServerConfig;
use crate::error::{CallError, Result};
use crate::events::PeerEventSink;
use crate::media::{LocalTrack, TrackKind};
use crate::peer::{
    IceCandidate, IceState, PeerConnection, PeerConnectionFactory, PeerEvent, PeerRole,
    RemoteTrack, SdpKind, SenderId, SessionDescription,
};

/// Builds webrtc-rs peer connections
pub struct RtcPeerFactory {
    ice_servers: Vec<RTCIceServer>,
}

impl RtcPeerFactory {
    pub fn new(ice_servers: &[IceServerConfig]) -> Self {
        Self {
            ice_servers: ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone(),
                    credential: server.credential.clone(),
                    ..Default::default()
                })
                .collect(),
        }
    }
}

#[async_trait]
impl PeerConnectionFactory for RtcPeerFactory {
    async fn create(&self, role: PeerRole, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>> {
        // Register default codecs (Opus, VP8, H264 ...)
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(config).await?);
        let connection = events.connection();

        let sink = events.clone();
        peer_connection.on_negotiation_needed(Box::new(move || {
            let sink = sink.clone();
            Box::pin(async move {
                sink.emit(PeerEvent::NegotiationNeeded);
            })
        }));

        let sink = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = sink.clone();
            Box::pin(async move {
                // `None` marks the end of gathering
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => sink.emit(PeerEvent::LocalCandidate(candidate_from_init(init))),
                    Err(e) => tracing::warn!("Failed to serialize local candidate: {}", e),
                }
            })
        }));

        let sink = events.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |state: RTCIceConnectionState| {
                let sink = sink.clone();
                Box::pin(async move {
                    tracing::debug!("{} ICE state: {}", sink.connection(), state);
                    sink.emit(PeerEvent::IceStateChanged(ice_state(state)));
                })
            },
        ));

        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                Box::pin(async move {
                    tracing::info!("{} peer connection state: {}", connection, state);
                })
            },
        ));

        let sink = events;
        peer_connection.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let sink = sink.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    other => {
                        tracing::warn!("Ignoring remote track of kind {:?}", other);
                        return;
                    }
                };
                tracing::info!("{} received {:?} track {}", sink.connection(), kind, track.id());
                sink.emit(PeerEvent::Track(RemoteTrack {
                    id: track.id().to_string(),
                    stream_id: track.stream_id().to_string(),
                    kind,
                    media: Some(track),
                }));
            })
        }));

        if role == PeerRole::Consumer {
            // Receive-only: one audio and one video section, nothing sent back
            for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
                peer_connection
                    .add_transceiver_from_kind(
                        kind,
                        Some(RTCRtpTransceiverInit {
                            direction: RTCRtpTransceiverDirection::Recvonly,
                            send_encodings: vec![],
                        }),
                    )
                    .await?;
            }
        }

        tracing::info!("Created {:?} peer connection {}", role, connection);

        Ok(Arc::new(RtcPeer {
            peer_connection,
            senders: Mutex::new(HashMap::new()),
            samples: Mutex::new(HashMap::new()),
            next_sender: AtomicU64::new(1),
        }))
    }
}

/// webrtc-rs connection plus the local tracks attached to it
pub struct RtcPeer {
    peer_connection: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<SenderId, Arc<RTCRtpSender>>>,
    samples: Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>,
    next_sender: AtomicU64,
}

impl RtcPeer {
    /// Sample sink for a local track, for the capture pipeline to write into
    pub async fn sample_track(&self, track_id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.samples.lock().await.get(track_id).cloned()
    }

    async fn sample_track_for(&self, track: &LocalTrack) -> Arc<TrackLocalStaticSample> {
        let mut samples = self.samples.lock().await;
        Arc::clone(samples.entry(track.id().to_string()).or_insert_with(|| {
            let mime_type = match track.kind() {
                TrackKind::Audio => MIME_TYPE_OPUS,
                TrackKind::Video => MIME_TYPE_VP8,
            };
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime_type.to_owned(),
                    ..Default::default()
                },
                track.id().to_string(),
                track.stream_id().to_string(),
            ))
        }))
    }

    async fn sender(&self, sender: SenderId) -> Result<Arc<RTCRtpSender>> {
        self.senders
            .lock()
            .await
            .get(&sender)
            .cloned()
            .ok_or_else(|| CallError::Negotiation(format!("unknown sender {}", sender.0)))
    }
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.peer_connection.create_offer(None).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc(description)?)
            .await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc(description)?)
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(candidate_to_init(candidate))
            .await?;
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<SenderId> {
        let local = self.sample_track_for(track).await;
        let rtp_sender = self
            .peer_connection
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // Drain RTCP so interceptors keep running
        let rtcp_sender = Arc::clone(&rtp_sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        let id = SenderId(self.next_sender.fetch_add(1, Ordering::Relaxed));
        self.senders.lock().await.insert(id, rtp_sender);
        Ok(id)
    }

    async fn remove_track(&self, sender: SenderId) -> Result<()> {
        let rtp_sender = self.sender(sender).await?;
        self.peer_connection.remove_track(&rtp_sender).await?;
        self.senders.lock().await.remove(&sender);
        Ok(())
    }

    async fn replace_track(&self, sender: SenderId, track: &LocalTrack) -> Result<bool> {
        let rtp_sender = self.sender(sender).await?;
        let local = self.sample_track_for(track).await;
        rtp_sender
            .replace_track(Some(local as Arc<dyn TrackLocal + Send + Sync>))
            .await?;
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection.close().await?;
        self.senders.lock().await.clear();
        self.samples.lock().await.clear();
        Ok(())
    }
}

fn candidate_from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn candidate_to_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription> {
    Ok(match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp)?,
    })
}

fn ice_state(state: RTCIceConnectionState) -> IceState {
    match state {
        RTCIceConnectionState::Checking => IceState::Checking,
        RTCIceConnectionState::Connected => IceState::Connected,
        RTCIceConnectionState::Completed => IceState::Completed,
        RTCIceConnectionState::Disconnected => IceState::Disconnected,
        RTCIceConnectionState::Failed => IceState::Failed,
        RTCIceConnectionState::Closed => IceState::Closed,
        _ => IceState::New,
    }
}
