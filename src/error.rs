use crate::media::TrackKind;
use thiserror::Error;

/// Ошибки доступа к камере и микрофону
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaAccessError {
    #[error("permission to use the {0} device was denied")]
    PermissionDenied(TrackKind),

    #[error("no {0} device available")]
    NotFound(TrackKind),
}

/// Ошибки нижележащего peer connection
#[derive(Debug, Clone, Error)]
pub enum PeerError {
    #[error("failed to create peer connection: {0}")]
    Create(String),

    #[error("failed to add local track: {0}")]
    AddTrack(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("failed to add ICE candidate: {0}")]
    Candidate(String),

    #[error("failed to write media sample: {0}")]
    WriteSample(String),

    #[error("data channel error: {0}")]
    DataChannel(String),

    #[error("failed to close peer connection: {0}")]
    Close(String),
}

#[derive(Debug, Clone, Error)]
pub enum SignalingError {
    #[error("signaling channel closed")]
    Closed,

    #[error("malformed signaling message: {0}")]
    Malformed(String),

    #[error("signaling token exceeds {0} bytes")]
    TooLarge(u64),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("ICE server {id}: {reason}")]
    InvalidServer { id: String, reason: &'static str },

    #[error("at least one ICE server must be configured")]
    NoServers,
}

/// Ошибки звонка, видимые UI
#[derive(Debug, Error)]
pub enum Error {
    #[error("media access failed: {0}")]
    MediaAccess(#[from] MediaAccessError),

    #[error("negotiation failed: {0}")]
    Negotiation(PeerError),

    #[error("candidate rejected: {0}")]
    Candidate(PeerError),

    #[error("connection lost")]
    ConnectionLost,

    #[error("signaling failed: {0}")]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no active session")]
    NoActiveSession,

    #[error("a session is already active")]
    SessionActive,

    #[error("session is not connected")]
    NotConnected,

    #[error("call controller has stopped")]
    ControllerClosed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
