//! Capture facility contract

use async_trait::async_trait;

use super::track::{MediaConstraints, MediaStream};
use crate::error::MediaError;

/// Source of local audio/video streams (camera + microphone)
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Open capture for the requested tracks
    ///
    /// May suspend on a permission prompt. Fails with
    /// [`MediaError::PermissionDenied`], [`MediaError::NoDevice`] or
    /// [`MediaError::DeviceBusy`].
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError>;
}
