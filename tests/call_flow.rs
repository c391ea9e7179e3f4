//! Two controllers talking through the in-process signaling hub

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_test::assert_ok;

use callcore::call::{
    CallController, CallHandle, CallService, CallStatus, CallType, Counterpart, EndReason,
};
use callcore::config::{CallConfig, ConfigStore, IceConfig};
use callcore::events::{CallEvent, EventBus};
use callcore::media::{FacingMode, MediaStream, MediaTrack, TrackKind, VirtualCamera};
use callcore::peer::{
    ConnectionState, PeerEvent, PeerEventSink, PeerTransport, PeerTransportFactory,
    SessionDescription,
};
use callcore::signaling::{IceCandidate, SignalKind, SignalingHub, SignalingMessage};
use callcore::Result;

/// Connection object that "connects" as soon as it learns the remote description
struct LoopbackPeer {
    events: PeerEventSink,
    video: bool,
    replaced: Arc<Mutex<Vec<Option<String>>>>,
}

#[async_trait]
impl PeerTransport for LoopbackPeer {
    async fn create_offer(&self) -> Result<String> {
        Ok("v=0 loopback offer".to_string())
    }

    async fn create_answer(&self) -> Result<String> {
        Ok("v=0 loopback answer".to_string())
    }

    async fn set_remote_description(&self, _description: SessionDescription) -> Result<()> {
        self.events.emit(PeerEvent::LocalCandidate(
            IceCandidate::new("candidate:1 1 udp 2130706431 127.0.0.1 40000 typ host")
                .with_mid("0", 0),
        ));
        self.events
            .emit(PeerEvent::RemoteTrack(MediaTrack::remote("remote-audio", TrackKind::Audio)));
        if self.video {
            self.events
                .emit(PeerEvent::RemoteTrack(MediaTrack::remote("remote-video", TrackKind::Video)));
        }
        self.events
            .emit(PeerEvent::StateChanged(ConnectionState::Connected));
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<()> {
        Ok(())
    }

    async fn replace_video_track(&self, track: Option<&MediaTrack>) -> Result<()> {
        self.replaced.lock().push(track.map(|t| t.id().to_string()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct LoopbackPeers {
    replaced: Arc<Mutex<Vec<Option<String>>>>,
}

#[async_trait]
impl PeerTransportFactory for LoopbackPeers {
    async fn create(
        &self,
        _ice: &IceConfig,
        local: &MediaStream,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerTransport>> {
        Ok(Box::new(LoopbackPeer {
            events,
            video: local.video_track().is_some(),
            replaced: self.replaced.clone(),
        }))
    }
}

struct Party {
    handle: CallHandle,
    camera: VirtualCamera,
    peers: LoopbackPeers,
}

fn join(hub: &SignalingHub, id: &str, name: &str) -> Party {
    let camera = VirtualCamera::new(id);
    let peers = LoopbackPeers::default();
    let (controller, inbox) = CallController::new(
        ConfigStore::in_memory(CallConfig::default()),
        Arc::new(hub.connect(Counterpart::new(id, name))),
        Arc::new(camera.clone()),
        Arc::new(peers.clone()),
        Arc::new(EventBus::new()),
    );
    Party {
        handle: CallService::spawn(controller, inbox),
        camera,
        peers,
    }
}

async fn wait_status(handle: &CallHandle, status: CallStatus) {
    tokio::time::timeout(
        Duration::from_secs(5),
        handle.wait_for(|s| s.status() == status),
    )
    .await
    .expect("timed out waiting for status")
    .unwrap();
}

fn offers_from(hub: &SignalingHub, user: &str) -> usize {
    hub.messages_from(user)
        .iter()
        .filter(|m| matches!(m, SignalingMessage::Signal(s) if s.kind == SignalKind::Offer))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_video_call_end_to_end() {
    let hub = SignalingHub::with_first_call_id(42);
    let alice = join(&hub, "alice", "Alice");
    let bob = join(&hub, "bob", "Bob");
    let mut bob_events = bob.handle.events();

    alice
        .handle
        .start_call("bob", CallType::Video, Some("conv-1".to_string()))
        .await
        .unwrap();
    assert!(alice.handle.local_preview().is_attached());

    wait_status(&bob.handle, CallStatus::IncomingRinging).await;
    let incoming = bob.handle.snapshot().incoming_call.unwrap();
    assert_eq!(incoming.id.as_ref().map(|id| id.as_str()), Some("42"));
    assert_eq!(incoming.counterpart.id, "alice");
    // Nothing is captured before the callee picks up
    assert_eq!(bob.camera.acquire_count(), 0);

    assert_ok!(bob.handle.answer_call().await);

    wait_status(&alice.handle, CallStatus::Active).await;
    wait_status(&bob.handle, CallStatus::Active).await;

    assert_eq!(offers_from(&hub, "alice"), 1);
    assert_eq!(offers_from(&hub, "bob"), 0);
    assert!(alice.handle.remote_view().is_attached());
    assert!(bob.handle.remote_view().is_attached());
    assert_eq!(alice.camera.live_tracks(), 2);
    assert_eq!(bob.camera.live_tracks(), 2);

    tokio::time::sleep(Duration::from_millis(3500)).await;
    let state = alice.handle.snapshot();
    assert_eq!(state.call_duration_secs, 3);
    assert_eq!(state.formatted_duration(), "00:03");

    alice.handle.end_call().await.unwrap();

    let ended = tokio::time::timeout(
        Duration::from_secs(5),
        bob.handle.wait_for(|s| s.last_ended.is_some()),
    )
    .await
    .unwrap()
    .unwrap();
    let last = ended.last_ended.unwrap();
    assert_eq!(last.reason, EndReason::Hangup);
    assert_eq!(last.status, CallStatus::Ended);
    assert_eq!(last.duration_secs, 3);
    assert!(ended.active_call.is_none());

    assert_eq!(alice.camera.live_tracks(), 0);
    assert_eq!(bob.camera.live_tracks(), 0);
    assert!(!alice.handle.remote_view().is_attached());
    assert_eq!(hub.active_calls(), 0);

    let mut saw_incoming = false;
    let mut saw_ended = false;
    while let Ok(event) = bob_events.try_recv() {
        match event {
            CallEvent::Incoming { caller, .. } => {
                assert_eq!(caller.display_name.as_deref(), Some("Alice"));
                saw_incoming = true;
            }
            CallEvent::Ended { reason, .. } => {
                assert_eq!(reason, EndReason::Hangup);
                saw_ended = true;
            }
            _ => {}
        }
    }
    assert!(saw_incoming);
    assert!(saw_ended);
}

#[tokio::test]
async fn test_declined_call() {
    let hub = SignalingHub::new();
    let alice = join(&hub, "alice", "Alice");
    let bob = join(&hub, "bob", "Bob");

    alice
        .handle
        .start_call("bob", CallType::Audio, None)
        .await
        .unwrap();
    wait_status(&bob.handle, CallStatus::IncomingRinging).await;

    assert_ok!(bob.handle.decline_call().await);

    let state = tokio::time::timeout(
        Duration::from_secs(5),
        alice.handle.wait_for(|s| s.last_ended.is_some()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(state.last_ended.unwrap().reason, EndReason::Declined);
    assert_eq!(alice.camera.live_tracks(), 0);
    assert_eq!(bob.camera.acquire_count(), 0);
    assert_eq!(offers_from(&hub, "alice"), 0);
}

#[tokio::test]
async fn test_camera_switch_mid_call_keeps_negotiation() {
    let hub = SignalingHub::new();
    let alice = join(&hub, "alice", "Alice");
    let bob = join(&hub, "bob", "Bob");

    alice
        .handle
        .start_call("bob", CallType::Video, None)
        .await
        .unwrap();
    wait_status(&bob.handle, CallStatus::IncomingRinging).await;
    bob.handle.answer_call().await.unwrap();
    wait_status(&alice.handle, CallStatus::Active).await;

    let facing = assert_ok!(alice.handle.switch_camera().await);
    assert_eq!(facing, FacingMode::Environment);

    assert_eq!(offers_from(&hub, "alice"), 1);
    let replaced = alice.peers.replaced.lock().clone();
    assert_eq!(replaced.len(), 1);
    assert!(replaced[0].is_some());
    // Old camera track stopped, new one live
    assert_eq!(alice.camera.live_tracks(), 2);
    assert_eq!(alice.handle.snapshot().status(), CallStatus::Active);

    alice.handle.end_call().await.unwrap();
    assert_eq!(alice.camera.live_tracks(), 0);
}
