//! Call configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::media::CaptureConstraints;

/// STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

/// Call configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// WebSocket endpoint of the relay's signaling server
    pub signaling_url: String,
    pub ice_servers: Vec<IceServerConfig>,
    /// Devices requested when joining
    pub capture: CaptureConstraints,
    /// Automatic publisher rebuilds allowed per session before giving up
    pub max_publisher_rebuilds: u32,
    /// Recreations of a single consumer after a negotiation error
    pub max_consumer_retries: u32,
    /// Delay between signaling reconnect attempts, in milliseconds
    pub signaling_reconnect_delay_ms: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080/ws".to_string(),
            ice_servers: vec![IceServerConfig {
                urls: vec!["stun:stun.l.google.com:19302".to_owned()],
                username: String::new(),
                credential: String::new(),
            }],
            capture: CaptureConstraints::default(),
            max_publisher_rebuilds: 1,
            max_consumer_retries: 1,
            signaling_reconnect_delay_ms: 2_000,
        }
    }
}

impl CallConfig {
    pub fn signaling_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.signaling_reconnect_delay_ms)
    }
}
