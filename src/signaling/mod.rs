//! Signaling: wire types, the transport contract and its implementations
//!
//! ```text
//! CallController ── send(SignalingMessage) ──> SignalingTransport ──> backend
//!       ^                                            |
//!       └──────── Subscription<SignalingEvent> <─────┘
//! ```
//!
//! - [`memory::SignalingHub`]: in-process backend (demo, tests)
//! - [`websocket::WsSignalingClient`]: WebSocket connection to a real backend

pub mod memory;
pub mod messages;
pub mod transport;
pub mod websocket;

pub use memory::{HubClient, SignalingHub};
pub use messages::{
    CallEnd, CallRef, CallSignal, IceCandidate, IncomingCall, InitiateCall, Registration,
    RejectCall, SignalKind, SignalingEvent, SignalingMessage,
};
pub use transport::{SignalingTransport, SubscriberSet, Subscription};
pub use websocket::WsSignalingClient;
