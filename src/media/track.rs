//! Local and remote media tracks
//!
//! A [`MediaTrack`] is a cheap, cloneable handle. Disabling a track keeps the
//! underlying device open; stopping it releases the device for good.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::call::CallType;

/// Track media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Camera facing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera
    #[default]
    User,
    /// Rear camera
    Environment,
}

impl FacingMode {
    pub fn opposite(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }
}

impl std::fmt::Display for FacingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FacingMode::User => write!(f, "user"),
            FacingMode::Environment => write!(f, "environment"),
        }
    }
}

/// Settings reported by a capture track
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackSettings {
    /// Device label, if known
    pub device: Option<String>,
    /// Facing mode (video tracks only)
    pub facing_mode: Option<FacingMode>,
}

/// Requested video capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    pub facing_mode: FacingMode,
}

/// Capture request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: Option<VideoConstraints>,
}

impl MediaConstraints {
    /// Microphone, plus camera for video calls
    pub fn for_call(call_type: CallType, facing_mode: FacingMode) -> Self {
        Self {
            audio: true,
            video: call_type
                .has_video()
                .then_some(VideoConstraints { facing_mode }),
        }
    }

    /// Camera only (camera switch)
    pub fn video_only(facing_mode: FacingMode) -> Self {
        Self {
            audio: false,
            video: Some(VideoConstraints { facing_mode }),
        }
    }
}

type StopHook = Box<dyn Fn(&MediaTrack) + Send + Sync>;

struct TrackInner {
    id: String,
    kind: TrackKind,
    settings: TrackSettings,
    enabled: AtomicBool,
    stopped: AtomicBool,
    on_stop: Option<StopHook>,
}

/// Handle to one audio or video track
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, settings: TrackSettings) -> Self {
        Self::build(uuid::Uuid::new_v4().to_string(), kind, settings, None)
    }

    /// Track whose stop releases a capture device
    ///
    /// `on_stop` runs exactly once, on the first call to [`MediaTrack::stop`].
    pub fn with_stop_hook<F>(kind: TrackKind, settings: TrackSettings, on_stop: F) -> Self
    where
        F: Fn(&MediaTrack) + Send + Sync + 'static,
    {
        Self::build(
            uuid::Uuid::new_v4().to_string(),
            kind,
            settings,
            Some(Box::new(on_stop)),
        )
    }

    /// Track received from the remote peer
    pub fn remote(id: impl Into<String>, kind: TrackKind) -> Self {
        Self::build(id.into(), kind, TrackSettings::default(), None)
    }

    fn build(id: String, kind: TrackKind, settings: TrackSettings, on_stop: Option<StopHook>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id,
                kind,
                settings,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
                on_stop,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn settings(&self) -> &TrackSettings {
        &self.inner.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable without releasing the device
    ///
    /// Has no effect on a stopped track.
    pub fn set_enabled(&self, enabled: bool) {
        if !self.is_stopped() {
            self.inner.enabled.store(enabled, Ordering::SeqCst);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Release the track; returns false if it was already stopped
    pub fn stop(&self) -> bool {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.enabled.store(false, Ordering::SeqCst);
        if let Some(ref hook) = self.inner.on_stop {
            hook(self);
        }
        true
    }

    /// Whether two handles refer to the same track
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("settings", &self.inner.settings)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Audio and/or video tracks captured or received together
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    audio: Option<MediaTrack>,
    video: Option<MediaTrack>,
}

impl MediaStream {
    pub fn new(audio: Option<MediaTrack>, video: Option<MediaTrack>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            audio,
            video,
        }
    }

    /// Stream with an explicit id (remote streams)
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            audio: None,
            video: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.audio.as_ref()
    }

    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.video.as_ref()
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.audio.iter().chain(self.video.iter()).cloned().collect()
    }

    /// Put a track in its kind's slot, returning the one it replaces
    pub fn add_track(&mut self, track: MediaTrack) -> Option<MediaTrack> {
        match track.kind() {
            TrackKind::Audio => self.audio.replace(track),
            TrackKind::Video => self.video.replace(track),
        }
    }

    pub fn remove_video_track(&mut self) -> Option<MediaTrack> {
        self.video.take()
    }

    /// Stop every track; returns how many were actually stopped
    pub fn stop_all(&self) -> usize {
        self.tracks().iter().filter(|t| t.stop()).count()
    }
}
