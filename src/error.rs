use thiserror::Error;

/// Capture failures reported by a media device
///
/// All of these surface to the presentation layer as a single
/// human-readable string; the variants exist so callers can log and test
/// the cause.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Permission to use the camera or microphone was denied")]
    PermissionDenied,

    #[error("No capture device available: {0}")]
    NoDevice(String),

    #[error("Capture device is busy: {0}")]
    DeviceBusy(String),

    #[error("Capture failed: {0}")]
    Other(String),
}

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum CallError {
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    #[error("A call is already in progress ({0})")]
    CallInProgress(String),

    #[error("No active call")]
    NoActiveCall,

    #[error("No incoming call")]
    NoIncomingCall,

    #[error("Invalid call state: {0}")]
    InvalidState(String),

    #[error("Call controller is not running")]
    ControllerClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CallError {
    /// Whether this error came from local capture (permission, device)
    pub fn is_media(&self) -> bool {
        matches!(self, CallError::Media(_))
    }
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, CallError>;
