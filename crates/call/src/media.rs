//! Local capture: tracks, streams and the device seam

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{CallError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
}

impl TrackSource {
    pub fn kind(self) -> TrackKind {
        match self {
            TrackSource::Microphone => TrackKind::Audio,
            TrackSource::Camera | TrackSource::Screen => TrackKind::Video,
        }
    }
}

/// Which devices to open when joining
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Mic/camera flags as broadcast to the other participants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStatus {
    pub mic_enabled: bool,
    pub camera_enabled: bool,
}

impl Default for MediaStatus {
    fn default() -> Self {
        Self {
            mic_enabled: true,
            camera_enabled: true,
        }
    }
}

/// Handle to one captured track.
///
/// Clones share the enabled flag and the ended signal.
#[derive(Debug, Clone)]
pub struct LocalTrack {
    inner: Arc<LocalTrackInner>,
}

#[derive(Debug)]
struct LocalTrackInner {
    id: String,
    stream_id: String,
    source: TrackSource,
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
}

impl LocalTrack {
    pub fn new(source: TrackSource, stream_id: impl Into<String>) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(LocalTrackInner {
                id: Uuid::new_v4().to_string(),
                stream_id: stream_id.into(),
                source,
                enabled: AtomicBool::new(true),
                ended,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn stream_id(&self) -> &str {
        &self.inner.stream_id
    }

    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.source.kind()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Disabled tracks stay attached but the capture pipeline sends silence/black.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Release the underlying device. Idempotent.
    pub fn stop(&self) {
        self.inner.ended.send_replace(true);
    }

    pub fn is_ended(&self) -> bool {
        *self.inner.ended.borrow()
    }

    /// Resolves once the track has been stopped, locally or by the device.
    pub async fn ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }
}

/// Camera and microphone captured together
#[derive(Debug, Clone)]
pub struct LocalMediaStream {
    pub id: String,
    pub audio: Option<LocalTrack>,
    pub video: Option<LocalTrack>,
}

impl LocalMediaStream {
    pub fn tracks(&self) -> impl Iterator<Item = &LocalTrack> {
        self.audio.iter().chain(self.video.iter())
    }

    pub fn stop(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }
}

/// Access to capture hardware
#[async_trait]
pub trait CaptureDevices: Send + Sync {
    /// Open camera and/or microphone. Fails with [`CallError::MediaAccess`].
    async fn open_user_media(&self, constraints: &CaptureConstraints) -> Result<LocalMediaStream>;

    /// Open a screen-share video track
    async fn open_display_media(&self) -> Result<LocalTrack>;
}

/// Capture source that hands out tracks without touching hardware.
///
/// Samples for these tracks are written by whoever drives the transport's
/// local tracks (see [`crate::rtc::RtcPeer::sample_track`]).
#[derive(Debug, Default)]
pub struct SyntheticCapture;

#[async_trait]
impl CaptureDevices for SyntheticCapture {
    async fn open_user_media(&self, constraints: &CaptureConstraints) -> Result<LocalMediaStream> {
        if !constraints.audio && !constraints.video {
            return Err(CallError::MediaAccess("no capture devices requested".to_string()));
        }

        let stream_id = format!("stream-{}", Uuid::new_v4());
        Ok(LocalMediaStream {
            audio: constraints
                .audio
                .then(|| LocalTrack::new(TrackSource::Microphone, stream_id.clone())),
            video: constraints
                .video
                .then(|| LocalTrack::new(TrackSource::Camera, stream_id.clone())),
            id: stream_id,
        })
    }

    async fn open_display_media(&self) -> Result<LocalTrack> {
        Ok(LocalTrack::new(
            TrackSource::Screen,
            format!("screen-{}", Uuid::new_v4()),
        ))
    }
}
