use serde::{Deserialize, Serialize};

use crate::media::FacingMode;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// ICE servers used for every peer connection
    pub ice: IceConfig,
    /// Call state machine settings
    pub call: CallSettings,
    /// Local media settings
    pub media: MediaConfig,
    /// Signaling server settings
    pub signaling: SignalingConfig,
}

/// ICE server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
    /// mDNS candidate mode: "disabled", "query_only" or "query_and_gather"
    pub mdns_mode: Option<String>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: vec![],
            mdns_mode: None,
        }
    }
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN server URLs (e.g., ["turn:turn.example.com:3478?transport=udp", "turn:turn.example.com:3478?transport=tcp"])
    pub urls: Vec<String>,
    /// Username for TURN authentication
    pub username: String,
    /// Credential for TURN authentication
    pub credential: String,
}

impl TurnServer {
    /// Create a TurnServer with a single URL
    pub fn new(url: String, username: String, credential: String) -> Self {
        Self {
            urls: vec![url],
            username,
            credential,
        }
    }
}

/// Call state machine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallSettings {
    /// Upper bound for ringing and connecting, in seconds (0 disables)
    pub setup_timeout_secs: u64,
    /// Re-open the previous camera when a camera switch fails
    pub camera_switch_fallback: bool,
    /// Reject incoming calls with reason `busy` while a call is in progress
    pub reject_when_busy: bool,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            setup_timeout_secs: 45,
            camera_switch_fallback: true,
            reject_when_busy: true,
        }
    }
}

/// Local media settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Camera used when a call starts
    pub facing_mode: FacingMode,
    /// Video codec offered by the WebRTC backend
    pub video_codec: VideoCodec,
}

/// Video codec preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    #[default]
    VP8,
    VP9,
}

impl VideoCodec {
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/H264",
            VideoCodec::VP8 => "video/VP8",
            VideoCodec::VP9 => "video/VP9",
        }
    }

    pub fn sdp_fmtp(&self) -> &'static str {
        match self {
            VideoCodec::H264 => {
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
            }
            VideoCodec::VP8 => "",
            VideoCodec::VP9 => "profile-id=0",
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "H.264"),
            VideoCodec::VP8 => write!(f, "VP8"),
            VideoCodec::VP9 => write!(f, "VP9"),
        }
    }
}

/// Signaling server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// WebSocket URL of the signaling server
    pub url: Option<String>,
    /// Ping interval in seconds
    pub heartbeat_secs: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: None,
            heartbeat_secs: 30,
        }
    }
}
