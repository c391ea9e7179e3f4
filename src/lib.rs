//! callcore - one-to-one call session core
//!
//! This crate drives a single audio or video call between two users:
//! the signaling state machine, ICE candidate buffering and the local and
//! remote media track lifecycle. The presentation layer talks to it through
//! [`call::CallHandle`].

pub mod call;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod peer;
pub mod signaling;

pub use error::{CallError, MediaError, Result};
