//! Synthetic capture device
//!
//! Hands out tracks without touching hardware. Used by the demo binary and
//! by tests that need to observe acquisition and release.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::capture::MediaCapture;
use super::track::{FacingMode, MediaConstraints, MediaStream, MediaTrack, TrackKind, TrackSettings};
use crate::error::MediaError;

#[derive(Default)]
struct Counters {
    acquisitions: AtomicUsize,
    tracks_opened: AtomicUsize,
    tracks_released: AtomicUsize,
}

/// Virtual camera + microphone
#[derive(Clone)]
pub struct VirtualCamera {
    name: String,
    counters: Arc<Counters>,
    failures: Arc<Mutex<VecDeque<MediaError>>>,
    unavailable_facing: Arc<Mutex<Option<FacingMode>>>,
}

impl VirtualCamera {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counters: Arc::new(Counters::default()),
            failures: Arc::new(Mutex::new(VecDeque::new())),
            unavailable_facing: Arc::new(Mutex::new(None)),
        }
    }

    /// Fail the next acquisition with `error`
    ///
    /// Failures queue up and are consumed one per call.
    pub fn fail_next(&self, error: MediaError) {
        self.failures.lock().push_back(error);
    }

    /// Pretend the camera facing `facing` does not exist
    pub fn set_unavailable_facing(&self, facing: Option<FacingMode>) {
        *self.unavailable_facing.lock() = facing;
    }

    /// Number of `acquire` calls, successful or not
    pub fn acquire_count(&self) -> usize {
        self.counters.acquisitions.load(Ordering::SeqCst)
    }

    /// Tracks handed out so far
    pub fn tracks_opened(&self) -> usize {
        self.counters.tracks_opened.load(Ordering::SeqCst)
    }

    /// Tracks stopped so far
    pub fn tracks_released(&self) -> usize {
        self.counters.tracks_released.load(Ordering::SeqCst)
    }

    /// Tracks opened and not yet stopped
    pub fn live_tracks(&self) -> usize {
        self.tracks_opened() - self.tracks_released()
    }

    fn open_track(&self, kind: TrackKind, facing_mode: Option<FacingMode>) -> MediaTrack {
        self.counters.tracks_opened.fetch_add(1, Ordering::SeqCst);
        let counters = self.counters.clone();
        let settings = TrackSettings {
            device: Some(format!("{} {}", self.name, kind)),
            facing_mode,
        };

        MediaTrack::with_stop_hook(kind, settings, move |track| {
            counters.tracks_released.fetch_add(1, Ordering::SeqCst);
            debug!("Virtual {} track {} released", track.kind(), track.id());
        })
    }
}

#[async_trait]
impl MediaCapture for VirtualCamera {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError> {
        self.counters.acquisitions.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        if let Some(video) = constraints.video {
            if *self.unavailable_facing.lock() == Some(video.facing_mode) {
                return Err(MediaError::NoDevice(format!("{} camera", video.facing_mode)));
            }
        }

        let audio = constraints
            .audio
            .then(|| self.open_track(TrackKind::Audio, None));
        let video = constraints
            .video
            .map(|v| self.open_track(TrackKind::Video, Some(v.facing_mode)));

        Ok(MediaStream::new(audio, video))
    }
}
