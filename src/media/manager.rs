//! Media device manager
//!
//! Owns the local capture stream of one call: acquisition, mute/video-off,
//! camera switch and release. Knows nothing about signaling.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::capture::MediaCapture;
use super::surface::RenderSurface;
use super::track::{FacingMode, MediaConstraints, MediaStream, MediaTrack};
use crate::call::CallType;
use crate::error::{CallError, MediaError, Result};

/// Result of a camera switch that left a usable video track
#[derive(Debug)]
pub enum CameraSwitch {
    /// The opposite camera is now live
    Switched(MediaTrack),
    /// The opposite camera failed; the previous facing mode was re-acquired
    Restored { track: MediaTrack, error: MediaError },
}

impl CameraSwitch {
    pub fn track(&self) -> &MediaTrack {
        match self {
            CameraSwitch::Switched(track) => track,
            CameraSwitch::Restored { track, .. } => track,
        }
    }
}

/// Local capture for one call session
pub struct MediaDeviceManager {
    capture: Arc<dyn MediaCapture>,
    preview: RenderSurface,
    stream: Option<MediaStream>,
    facing: FacingMode,
}

impl MediaDeviceManager {
    pub fn new(capture: Arc<dyn MediaCapture>, preview: RenderSurface, facing: FacingMode) -> Self {
        Self {
            capture,
            preview,
            stream: None,
            facing,
        }
    }

    /// Acquire microphone (and camera for video calls) and show the preview
    ///
    /// Returns the existing stream if capture is already open.
    pub async fn acquire(&mut self, call_type: CallType) -> Result<MediaStream> {
        if let Some(ref stream) = self.stream {
            return Ok(stream.clone());
        }

        let constraints = MediaConstraints::for_call(call_type, self.facing);
        let stream = self.capture.acquire(&constraints).await.map_err(|e| {
            warn!("Local media acquisition failed: {}", e);
            CallError::Media(e)
        })?;

        info!(
            "Local media acquired: {} call, {} track(s)",
            call_type,
            stream.tracks().len()
        );
        self.preview.attach(stream.clone());
        self.stream = Some(stream.clone());
        Ok(stream)
    }

    pub fn stream(&self) -> Option<&MediaStream> {
        self.stream.as_ref()
    }

    pub fn has_media(&self) -> bool {
        self.stream.is_some()
    }

    pub fn facing_mode(&self) -> FacingMode {
        self.facing
    }

    /// Microphone disabled (false when there is no audio track)
    pub fn is_muted(&self) -> bool {
        self.stream
            .as_ref()
            .and_then(|s| s.audio_track())
            .map(|t| !t.is_enabled())
            .unwrap_or(false)
    }

    /// Camera disabled (false when there is no video track)
    pub fn is_video_off(&self) -> bool {
        self.stream
            .as_ref()
            .and_then(|s| s.video_track())
            .map(|t| !t.is_enabled())
            .unwrap_or(false)
    }

    /// Flip the microphone; returns the new muted flag
    pub fn toggle_mute(&self) -> bool {
        if let Some(track) = self.stream.as_ref().and_then(|s| s.audio_track()) {
            track.set_enabled(!track.is_enabled());
            debug!("Microphone {}", if track.is_enabled() { "unmuted" } else { "muted" });
        }
        self.is_muted()
    }

    /// Flip the camera; returns the new video-off flag
    pub fn toggle_video(&self) -> bool {
        if let Some(track) = self.stream.as_ref().and_then(|s| s.video_track()) {
            track.set_enabled(!track.is_enabled());
            debug!("Camera {}", if track.is_enabled() { "on" } else { "off" });
        }
        self.is_video_off()
    }

    /// Replace the camera with the one facing the other way
    ///
    /// The current video track is stopped before the new one is requested.
    /// If the new camera cannot be opened and `fallback` is set, the previous
    /// facing mode is re-acquired and reported as [`CameraSwitch::Restored`].
    /// On `Err` the stream has no video track left.
    pub async fn switch_camera(&mut self, fallback: bool) -> Result<CameraSwitch> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CallError::InvalidState("no local media".to_string()))?;
        let old = stream
            .video_track()
            .cloned()
            .ok_or_else(|| CallError::InvalidState("no local video track".to_string()))?;

        let current = old.settings().facing_mode.unwrap_or(self.facing);
        let target = current.opposite();
        let was_enabled = old.is_enabled();

        old.stop();
        stream.remove_video_track();

        let result = match open_video(self.capture.as_ref(), target).await {
            Ok(track) => {
                info!("Camera switched: {} -> {}", current, target);
                self.facing = target;
                Ok(CameraSwitch::Switched(track))
            }
            Err(error) if fallback => {
                warn!("Camera switch to {} failed: {}, restoring {}", target, error, current);
                match open_video(self.capture.as_ref(), current).await {
                    Ok(track) => Ok(CameraSwitch::Restored { track, error }),
                    Err(e) => {
                        warn!("Restoring {} camera failed: {}", current, e);
                        Err(CallError::Media(error))
                    }
                }
            }
            Err(error) => {
                warn!("Camera switch to {} failed: {}", target, error);
                Err(CallError::Media(error))
            }
        };

        if let Ok(ref switch) = result {
            let track = switch.track();
            track.set_enabled(was_enabled);
            stream.add_track(track.clone());
        }
        self.preview.attach(stream.clone());

        result
    }

    /// Stop every local track and clear the preview
    ///
    /// Returns the number of tracks stopped; calling again is a no-op.
    pub fn release(&mut self) -> usize {
        let stopped = self.stream.take().map(|s| s.stop_all()).unwrap_or(0);
        self.preview.detach();
        if stopped > 0 {
            info!("Local media released ({} track(s))", stopped);
        }
        stopped
    }
}

impl Drop for MediaDeviceManager {
    fn drop(&mut self) {
        if self.stream.is_some() {
            self.release();
        }
    }
}

async fn open_video(
    capture: &dyn MediaCapture,
    facing: FacingMode,
) -> std::result::Result<MediaTrack, MediaError> {
    let stream = capture.acquire(&MediaConstraints::video_only(facing)).await?;
    stream
        .video_track()
        .cloned()
        .ok_or_else(|| MediaError::NoDevice(format!("{} camera", facing)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::VirtualCamera;

    fn manager(camera: &VirtualCamera) -> (MediaDeviceManager, RenderSurface) {
        let preview = RenderSurface::new("local");
        (
            MediaDeviceManager::new(Arc::new(camera.clone()), preview.clone(), FacingMode::User),
            preview,
        )
    }

    #[tokio::test]
    async fn test_acquire_attaches_preview() {
        let camera = VirtualCamera::new("test");
        let (mut media, preview) = manager(&camera);

        let stream = media.acquire(CallType::Video).await.unwrap();
        assert!(stream.audio_track().is_some());
        assert!(stream.video_track().is_some());
        assert!(preview.is_attached());

        // Second acquire reuses the stream
        media.acquire(CallType::Video).await.unwrap();
        assert_eq!(camera.acquire_count(), 1);
    }

    #[tokio::test]
    async fn test_acquire_failure() {
        let camera = VirtualCamera::new("test");
        camera.fail_next(MediaError::DeviceBusy("mic".to_string()));
        let (mut media, preview) = manager(&camera);

        let err = media.acquire(CallType::Audio).await.unwrap_err();
        assert!(err.is_media());
        assert!(!media.has_media());
        assert!(!preview.is_attached());
    }

    #[tokio::test]
    async fn test_mute_round_trip() {
        let camera = VirtualCamera::new("test");
        let (mut media, _preview) = manager(&camera);
        let stream = media.acquire(CallType::Audio).await.unwrap();
        let audio = stream.audio_track().unwrap().clone();

        assert!(media.toggle_mute());
        assert!(!audio.is_enabled());
        assert!(!media.toggle_mute());
        assert!(audio.is_enabled());
        assert!(!audio.is_stopped());
        assert_eq!(camera.acquire_count(), 1);
    }

    #[tokio::test]
    async fn test_toggles_without_media() {
        let camera = VirtualCamera::new("test");
        let (media, _preview) = manager(&camera);
        assert!(!media.toggle_mute());
        assert!(!media.toggle_video());
    }

    #[tokio::test]
    async fn test_switch_camera_keeps_video_off() {
        let camera = VirtualCamera::new("test");
        let (mut media, preview) = manager(&camera);
        let stream = media.acquire(CallType::Video).await.unwrap();
        let old = stream.video_track().unwrap().clone();

        assert!(media.toggle_video());
        let switch = media.switch_camera(true).await.unwrap();
        let new = switch.track().clone();

        assert!(matches!(switch, CameraSwitch::Switched(_)));
        assert!(old.is_stopped());
        assert_eq!(new.settings().facing_mode, Some(FacingMode::Environment));
        assert!(media.is_video_off());
        assert_eq!(media.facing_mode(), FacingMode::Environment);

        let shown = preview.current().unwrap();
        assert!(shown.video_track().unwrap().same_track(&new));
    }

    #[tokio::test]
    async fn test_switch_camera_fallback() {
        let camera = VirtualCamera::new("test");
        let (mut media, _preview) = manager(&camera);
        media.acquire(CallType::Video).await.unwrap();
        camera.set_unavailable_facing(Some(FacingMode::Environment));

        match media.switch_camera(true).await.unwrap() {
            CameraSwitch::Restored { track, error } => {
                assert_eq!(track.settings().facing_mode, Some(FacingMode::User));
                assert!(matches!(error, MediaError::NoDevice(_)));
            }
            other => panic!("unexpected switch result: {:?}", other),
        }
        assert_eq!(media.facing_mode(), FacingMode::User);
        assert!(media.stream().unwrap().video_track().is_some());
    }

    #[tokio::test]
    async fn test_switch_camera_without_fallback_loses_video() {
        let camera = VirtualCamera::new("test");
        let (mut media, _preview) = manager(&camera);
        media.acquire(CallType::Video).await.unwrap();
        camera.set_unavailable_facing(Some(FacingMode::Environment));

        assert!(media.switch_camera(false).await.is_err());
        assert!(media.stream().unwrap().video_track().is_none());
        assert_eq!(camera.live_tracks(), 1);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let camera = VirtualCamera::new("test");
        let (mut media, preview) = manager(&camera);
        media.acquire(CallType::Video).await.unwrap();

        assert_eq!(media.release(), 2);
        assert_eq!(media.release(), 0);
        assert_eq!(camera.tracks_released(), 2);
        assert!(!preview.is_attached());
    }
}
