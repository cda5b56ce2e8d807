use thiserror::Error;

/// Errors surfaced by the call orchestrator
#[derive(Debug, Error)]
pub enum CallError {
    /// Device permission denied or no capture hardware
    #[error("media access failed: {0}")]
    MediaAccess(String),

    /// Offer, answer or description could not be created or applied
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// A connection's ICE transport reached a terminal state
    #[error("ICE failed on {0}")]
    IceFailure(String),

    /// Business error reported by the relay
    #[error("relay error: {0}")]
    Signaling(String),

    #[error("signaling channel unavailable: {0}")]
    ChannelClosed(String),

    #[error("already in a call")]
    AlreadyInCall,

    #[error("not in a call")]
    NotInCall,
}

impl From<webrtc::Error> for CallError {
    fn from(err: webrtc::Error) -> Self {
        CallError::Negotiation(err.to_string())
    }
}

pub type Result<T, E = CallError> = std::result::Result<T, E>;
