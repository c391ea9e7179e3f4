//! Peer connection negotiation
//!
//! ```text
//! CallController
//!     └── PeerConnectionManager   (offer/answer, candidate queue)
//!             └── dyn PeerTransport
//!                     └── RtcPeerTransport (webrtc-rs) | test doubles
//! ```

pub mod candidates;
pub mod manager;
pub mod mdns;
pub mod rtc;

pub use candidates::PendingCandidateQueue;
pub use manager::{
    CandidateOutcome, ConnectionState, PeerConnectionManager, PeerEvent, PeerEventSink,
    PeerTransport, PeerTransportFactory, SdpType, SessionDescription, TaggedPeerEvent,
};
pub use rtc::{RtcPeerFactory, RtcPeerTransport};
