use anyhow::Context;
use cheenhub_call::rtc::RtcPeerFactory;
use cheenhub_call::signaling::WsSignaling;
use cheenhub_call::{
    CallClient, CallConfig, CallDeps, CallError, CallObserver, CaptureConstraints, ConsumerId,
    IceServerConfig, ParticipantId, RemoteStreamEntry, SyntheticCapture, event_channel,
};
use clap::{ArgAction, Parser};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cheenhub-call")]
#[command(about = "Join a CheenHub group call with synthetic media", long_about = None)]
struct Args {
    /// Room to join
    #[arg(default_value = "lobby")]
    room: String,

    /// Participant id to join as, random when omitted
    local_id: Option<String>,

    /// WebSocket endpoint of the relay's signaling server
    #[arg(long, env = "CHEENHUB_SIGNALING_URL", default_value = "ws://localhost:8080/ws")]
    signaling_url: String,

    /// STUN/TURN urls, comma separated
    #[arg(
        long,
        env = "CHEENHUB_ICE_SERVERS",
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302"
    )]
    ice_servers: Vec<String>,

    /// Username for every ICE server
    #[arg(long, env = "CHEENHUB_ICE_USERNAME")]
    ice_username: Option<String>,

    /// Credential for every ICE server
    #[arg(long, env = "CHEENHUB_ICE_CREDENTIAL")]
    ice_credential: Option<String>,

    /// Request a microphone when joining
    #[arg(long, env = "CHEENHUB_CAPTURE_AUDIO", default_value_t = true, action = ArgAction::Set)]
    capture_audio: bool,

    /// Request a camera when joining
    #[arg(long, env = "CHEENHUB_CAPTURE_VIDEO", default_value_t = true, action = ArgAction::Set)]
    capture_video: bool,

    /// Automatic publisher rebuilds before giving up
    #[arg(long, env = "CHEENHUB_MAX_PUBLISHER_REBUILDS", default_value_t = 1)]
    max_publisher_rebuilds: u32,

    /// Recreations of one consumer after a negotiation error
    #[arg(long, env = "CHEENHUB_MAX_CONSUMER_RETRIES", default_value_t = 1)]
    max_consumer_retries: u32,

    /// Delay between signaling reconnect attempts, in milliseconds
    #[arg(long, env = "CHEENHUB_SIGNALING_RECONNECT_MS", default_value_t = 2_000)]
    signaling_reconnect_ms: u64,
}

impl Args {
    fn call_config(&self) -> CallConfig {
        let urls: Vec<String> = self
            .ice_servers
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .map(str::to_owned)
            .collect();
        let ice_servers = if urls.is_empty() {
            Vec::new()
        } else {
            vec![IceServerConfig {
                urls,
                username: self.ice_username.clone().unwrap_or_default(),
                credential: self.ice_credential.clone().unwrap_or_default(),
            }]
        };

        CallConfig {
            signaling_url: self.signaling_url.clone(),
            ice_servers,
            capture: CaptureConstraints {
                audio: self.capture_audio,
                video: self.capture_video,
            },
            max_publisher_rebuilds: self.max_publisher_rebuilds,
            max_consumer_retries: self.max_consumer_retries,
            signaling_reconnect_delay_ms: self.signaling_reconnect_ms,
        }
    }
}

/// Logs stream changes instead of rendering them
struct LogObserver;

impl CallObserver for LogObserver {
    fn on_stream_added(&self, entry: &RemoteStreamEntry) {
        info!(
            "Stream {} from {} ({}): {} tracks, mic {}, camera {}",
            entry.consumer_id,
            entry.display_name,
            entry.remote_id,
            entry.stream.tracks.len(),
            entry.mic_enabled,
            entry.camera_enabled
        );
    }

    fn on_stream_removed(&self, consumer_id: &ConsumerId) {
        info!("Stream {} removed", consumer_id);
    }

    fn on_call_error(&self, error: &CallError) {
        warn!("Call error: {}", error);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.call_config();
    let room = args.room;
    let local_id = args
        .local_id
        .map(ParticipantId::from)
        .unwrap_or_else(ParticipantId::generate);

    let (events_tx, events_rx) = event_channel();
    let signaling = Arc::new(WsSignaling::spawn(
        config.signaling_url.clone(),
        config.signaling_reconnect_delay(),
        events_tx.clone(),
    ));

    let deps = CallDeps {
        devices: Arc::new(SyntheticCapture),
        peers: Arc::new(RtcPeerFactory::new(&config.ice_servers)),
        signaling,
        observer: Arc::new(LogObserver),
    };
    let client = CallClient::new(local_id.clone(), config, deps, events_tx);

    let event_loop = tokio::spawn({
        let client = client.clone();
        async move { client.run(events_rx).await }
    });

    info!("Connecting to room {} as {}", room, local_id);
    client
        .connect(room.as_str())
        .await
        .context("failed to join the call")?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    client.leave().await?;
    event_loop.abort();
    Ok(())
}
