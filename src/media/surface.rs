//! Rendering surface handles
//!
//! The presentation layer holds a [`RenderSurface`] and watches it; the call
//! core attaches and detaches streams.

use std::sync::Arc;

use tokio::sync::watch;

use super::track::MediaStream;

/// A place a stream is rendered (local preview, remote view)
#[derive(Clone)]
pub struct RenderSurface {
    name: &'static str,
    tx: Arc<watch::Sender<Option<MediaStream>>>,
}

impl RenderSurface {
    pub fn new(name: &'static str) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            name,
            tx: Arc::new(tx),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Show `stream` on this surface
    pub fn attach(&self, stream: MediaStream) {
        self.tx.send_replace(Some(stream));
    }

    /// Clear the surface
    pub fn detach(&self) {
        self.tx.send_replace(None);
    }

    pub fn current(&self) -> Option<MediaStream> {
        self.tx.borrow().clone()
    }

    pub fn is_attached(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Watch for attach/detach
    pub fn watch(&self) -> watch::Receiver<Option<MediaStream>> {
        self.tx.subscribe()
    }
}

impl std::fmt::Debug for RenderSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSurface")
            .field("name", &self.name)
            .field("attached", &self.is_attached())
            .finish()
    }
}
