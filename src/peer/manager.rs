//! Peer connection manager
//!
//! Owns one negotiation session: the connection object, offer/answer
//! sequencing and the queue-then-flush discipline for remote candidates.
//! The connection object itself sits behind [`PeerTransport`] so the call
//! state machine can run against the WebRTC backend or a test double.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::candidates::PendingCandidateQueue;
use crate::config::IceConfig;
use crate::error::{CallError, Result};
use crate::media::{MediaStream, MediaTrack};
use crate::signaling::IceCandidate;

/// Connection state reported by the connection object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States that end the call
    pub fn is_failure(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Disconnected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// SDP type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description handed to the connection object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Event raised by a connection object
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Local network candidate to trickle to the remote side
    LocalCandidate(IceCandidate),
    /// Connection state transition
    StateChanged(ConnectionState),
    /// Remote media arrived
    RemoteTrack(MediaTrack),
}

/// Peer event tagged with the session that produced it
#[derive(Debug, Clone)]
pub struct TaggedPeerEvent {
    pub session: u64,
    pub event: PeerEvent,
}

/// Sending half handed to a connection object at creation
///
/// Every event is tagged with the session generation so the controller can
/// discard events from a connection that has already been torn down.
#[derive(Clone)]
pub struct PeerEventSink {
    session: u64,
    tx: mpsc::UnboundedSender<TaggedPeerEvent>,
}

impl PeerEventSink {
    pub fn new(session: u64, tx: mpsc::UnboundedSender<TaggedPeerEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Returns false once the receiving side is gone
    pub fn emit(&self, event: PeerEvent) -> bool {
        self.tx
            .send(TaggedPeerEvent {
                session: self.session,
                event,
            })
            .is_ok()
    }
}

/// The connection object of one call
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Create an offer and install it as the local description
    async fn create_offer(&self) -> Result<String>;

    /// Create an answer and install it as the local description
    async fn create_answer(&self) -> Result<String>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Swap the outbound video track without renegotiation (`None` sends nothing)
    async fn replace_video_track(&self, track: Option<&MediaTrack>) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Builds connection objects with local tracks attached
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(
        &self,
        ice: &IceConfig,
        local: &MediaStream,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerTransport>>;
}

/// What happened to a remote candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    Applied,
    Queued,
    /// Rejected by the connection object; the call continues
    Failed,
    /// Connection already closed
    Dropped,
}

/// Negotiation state for one call
pub struct PeerConnectionManager {
    transport: Box<dyn PeerTransport>,
    pending: PendingCandidateQueue,
    remote_description_set: bool,
    offer_created: bool,
    closed: bool,
}

impl PeerConnectionManager {
    /// Create the connection object with `local` tracks attached
    pub async fn create(
        factory: &dyn PeerTransportFactory,
        ice: &IceConfig,
        local: &MediaStream,
        events: PeerEventSink,
    ) -> Result<Self> {
        let session = events.session();
        let transport = factory.create(ice, local, events).await?;
        info!(
            "Peer connection created (session {}, {} local track(s))",
            session,
            local.tracks().len()
        );
        Ok(Self::from_transport(transport))
    }

    pub fn from_transport(transport: Box<dyn PeerTransport>) -> Self {
        Self {
            transport,
            pending: PendingCandidateQueue::new(),
            remote_description_set: false,
            offer_created: false,
            closed: false,
        }
    }

    /// Create the one offer of this session
    pub async fn create_offer(&mut self) -> Result<String> {
        self.ensure_open()?;
        if self.offer_created {
            return Err(CallError::Negotiation("offer already created".to_string()));
        }
        self.offer_created = true;

        let sdp = self.transport.create_offer().await?;
        debug!("Local offer created ({} bytes)", sdp.len());
        Ok(sdp)
    }

    /// Apply the remote offer, flush buffered candidates and return the answer
    pub async fn accept_offer(&mut self, sdp: String) -> Result<String> {
        self.set_remote(SessionDescription::offer(sdp)).await?;
        let answer = self.transport.create_answer().await?;
        debug!("Local answer created ({} bytes)", answer.len());
        Ok(answer)
    }

    /// Apply the remote answer and flush buffered candidates
    pub async fn accept_answer(&mut self, sdp: String) -> Result<()> {
        self.set_remote(SessionDescription::answer(sdp)).await
    }

    async fn set_remote(&mut self, description: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        let sdp_type = description.sdp_type;
        self.transport.set_remote_description(description).await?;
        self.remote_description_set = true;
        debug!("Remote {:?} applied", sdp_type);

        self.flush_pending().await;
        Ok(())
    }

    async fn flush_pending(&mut self) -> usize {
        let queued = self.pending.drain();
        if queued.is_empty() {
            return 0;
        }

        let count = queued.len();
        for candidate in queued {
            self.apply(candidate).await;
        }
        debug!("Flushed {} buffered remote candidate(s)", count);
        count
    }

    /// Apply a remote candidate now, or queue it until the remote description is set
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> CandidateOutcome {
        if self.closed {
            return CandidateOutcome::Dropped;
        }
        if !self.remote_description_set {
            self.pending.push(candidate);
            debug!("Remote candidate queued ({} pending)", self.pending.len());
            return CandidateOutcome::Queued;
        }
        self.apply(candidate).await
    }

    async fn apply(&self, candidate: IceCandidate) -> CandidateOutcome {
        match self.transport.add_ice_candidate(candidate).await {
            Ok(()) => CandidateOutcome::Applied,
            Err(e) => {
                warn!("Failed to apply remote candidate: {}", e);
                CandidateOutcome::Failed
            }
        }
    }

    pub async fn replace_video_track(&self, track: Option<&MediaTrack>) -> Result<()> {
        self.ensure_open()?;
        self.transport.replace_video_track(track).await
    }

    /// Close the connection and drop buffered candidates
    ///
    /// Returns false if it was already closed.
    pub async fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.pending.clear();

        if let Err(e) = self.transport.close().await {
            warn!("Error closing peer connection: {}", e);
        }
        info!("Peer connection closed");
        true
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(CallError::InvalidState("peer connection closed".to_string()))
        } else {
            Ok(())
        }
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    pub fn offer_created(&self) -> bool {
        self.offer_created
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Offer,
        Answer,
        Remote(SdpType),
        Candidate(String),
        Replace(Option<String>),
        Close,
    }

    #[derive(Clone, Default)]
    struct Recorder {
        ops: Arc<Mutex<Vec<Op>>>,
        reject_candidate: Arc<Mutex<Option<String>>>,
    }

    #[async_trait]
    impl PeerTransport for Recorder {
        async fn create_offer(&self) -> Result<String> {
            self.ops.lock().push(Op::Offer);
            Ok("v=0 offer".to_string())
        }

        async fn create_answer(&self) -> Result<String> {
            self.ops.lock().push(Op::Answer);
            Ok("v=0 answer".to_string())
        }

        async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
            self.ops.lock().push(Op::Remote(description.sdp_type));
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
            if self.reject_candidate.lock().as_deref() == Some(candidate.candidate.as_str()) {
                return Err(CallError::WebRtcError("bad candidate".to_string()));
            }
            self.ops.lock().push(Op::Candidate(candidate.candidate));
            Ok(())
        }

        async fn replace_video_track(&self, track: Option<&MediaTrack>) -> Result<()> {
            self.ops
                .lock()
                .push(Op::Replace(track.map(|t| t.id().to_string())));
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.ops.lock().push(Op::Close);
            Ok(())
        }
    }

    fn manager() -> (PeerConnectionManager, Recorder) {
        let recorder = Recorder::default();
        (
            PeerConnectionManager::from_transport(Box::new(recorder.clone())),
            recorder,
        )
    }

    fn candidate(n: usize) -> IceCandidate {
        IceCandidate::new(format!("candidate:{}", n)).with_mid("0", 0)
    }

    #[tokio::test]
    async fn test_candidates_before_and_after_description() {
        let (mut peer, recorder) = manager();

        for i in 0..3 {
            assert_eq!(peer.add_remote_candidate(candidate(i)).await, CandidateOutcome::Queued);
        }
        assert_eq!(peer.pending_candidates(), 3);
        assert!(recorder.ops.lock().is_empty());

        peer.accept_answer("v=0 answer".to_string()).await.unwrap();
        assert_eq!(peer.pending_candidates(), 0);

        for i in 3..5 {
            assert_eq!(peer.add_remote_candidate(candidate(i)).await, CandidateOutcome::Applied);
        }

        let ops = recorder.ops.lock().clone();
        assert_eq!(ops[0], Op::Remote(SdpType::Answer));
        let applied: Vec<Op> = ops[1..].to_vec();
        let expected: Vec<Op> = (0..5)
            .map(|i| Op::Candidate(format!("candidate:{}", i)))
            .collect();
        assert_eq!(applied, expected);
    }

    #[tokio::test]
    async fn test_accept_offer_flushes_before_answer() {
        let (mut peer, recorder) = manager();
        peer.add_remote_candidate(candidate(0)).await;

        let answer = peer.accept_offer("v=0 offer".to_string()).await.unwrap();
        assert_eq!(answer, "v=0 answer");
        assert!(peer.has_remote_description());

        assert_eq!(
            *recorder.ops.lock(),
            vec![
                Op::Remote(SdpType::Offer),
                Op::Candidate("candidate:0".to_string()),
                Op::Answer,
            ]
        );
    }

    #[tokio::test]
    async fn test_candidate_failure_is_not_fatal() {
        let (mut peer, recorder) = manager();
        *recorder.reject_candidate.lock() = Some("candidate:1".to_string());
        peer.accept_answer("v=0".to_string()).await.unwrap();

        assert_eq!(peer.add_remote_candidate(candidate(1)).await, CandidateOutcome::Failed);
        assert_eq!(peer.add_remote_candidate(candidate(2)).await, CandidateOutcome::Applied);
    }

    #[tokio::test]
    async fn test_single_offer() {
        let (mut peer, recorder) = manager();
        peer.create_offer().await.unwrap();
        assert!(matches!(peer.create_offer().await, Err(CallError::Negotiation(_))));

        let offers = recorder
            .ops
            .lock()
            .iter()
            .filter(|op| **op == Op::Offer)
            .count();
        assert_eq!(offers, 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut peer, recorder) = manager();
        peer.add_remote_candidate(candidate(0)).await;

        assert!(peer.close().await);
        assert!(!peer.close().await);
        assert_eq!(peer.pending_candidates(), 0);
        assert_eq!(peer.add_remote_candidate(candidate(1)).await, CandidateOutcome::Dropped);
        assert!(peer.accept_answer("v=0".to_string()).await.is_err());

        let closes = recorder
            .ops
            .lock()
            .iter()
            .filter(|op| **op == Op::Close)
            .count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_event_sink_tags_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = PeerEventSink::new(7, tx);

        assert!(sink.emit(PeerEvent::StateChanged(ConnectionState::Connected)));
        let tagged = rx.try_recv().unwrap();
        assert_eq!(tagged.session, 7);
        assert!(matches!(
            tagged.event,
            PeerEvent::StateChanged(ConnectionState::Connected)
        ));

        drop(rx);
        assert!(!sink.emit(PeerEvent::StateChanged(ConnectionState::Closed)));
    }
}
