//! Call session controller
//!
//! The state machine of one-to-one calls. Every reaction runs on `&mut self`
//! from a single task (see [`super::service`]), so transitions never
//! interleave; async completions from devices, signaling and the peer
//! connection are delivered back as ordinary method calls.
//!
//! The current call lives in a single owned slot. Everything that belongs to
//! the call (local media, peer connection, candidate queue, timers) hangs off
//! that slot and is released by [`CallController::teardown`], which takes the
//! slot first so a second teardown, or a late message for the same call, finds
//! nothing to act on.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::timer::DurationTimer;
use super::types::{
    CallId, CallRole, CallSession, CallState, CallStatus, CallType, Counterpart, EndReason,
    EndedCall,
};
use crate::config::ConfigStore;
use crate::error::{CallError, Result};
use crate::events::{CallEvent, EventBus};
use crate::media::{
    CameraSwitch, FacingMode, MediaCapture, MediaDeviceManager, MediaStream, RenderSurface,
};
use crate::peer::{
    ConnectionState, PeerConnectionManager, PeerEvent, PeerEventSink, PeerTransportFactory,
    TaggedPeerEvent,
};
use crate::signaling::{
    CallEnd, CallRef, CallSignal, IncomingCall, InitiateCall, Registration, RejectCall,
    SignalKind, SignalingEvent, SignalingMessage, SignalingTransport, Subscription,
};

/// Receivers the controller's owner must drain and feed back
pub struct ControllerInbox {
    /// Events from the current (or a stale) peer connection
    pub peer_events: mpsc::UnboundedReceiver<TaggedPeerEvent>,
    /// Setup deadlines that fired, by session key
    pub timeouts: mpsc::UnboundedReceiver<u64>,
}

/// Resources owned by the one live call
struct ActiveSession {
    /// Generation used to recognise events from this session's tasks
    key: u64,
    /// Sent with `initiate` on outgoing calls
    request_id: Option<String>,
    record: CallSession,
    media: MediaDeviceManager,
    peer: Option<PeerConnectionManager>,
    remote_stream: Option<MediaStream>,
    timer: Option<DurationTimer>,
    setup_deadline: Option<JoinHandle<()>>,
}

impl ActiveSession {
    fn disarm_deadline(&mut self) {
        if let Some(handle) = self.setup_deadline.take() {
            handle.abort();
        }
    }
}

/// One-to-one call state machine
pub struct CallController {
    config: ConfigStore,
    signaling: Arc<dyn SignalingTransport>,
    capture: Arc<dyn MediaCapture>,
    peers: Arc<dyn PeerTransportFactory>,
    events: Arc<EventBus>,
    state: Arc<watch::Sender<CallState>>,
    local_preview: RenderSurface,
    remote_view: RenderSurface,
    slot: Option<ActiveSession>,
    next_key: u64,
    peer_tx: mpsc::UnboundedSender<TaggedPeerEvent>,
    timeout_tx: mpsc::UnboundedSender<u64>,
    /// Request ids of outgoing calls hung up before the backend assigned their id
    abandoned: VecDeque<String>,
    /// The backend echoes request ids in `callRegistered`
    correlated_registrations: bool,
    acquiring: bool,
    speaker_on: bool,
    error: Option<String>,
    last_ended: Option<EndedCall>,
}

impl CallController {
    pub fn new(
        config: ConfigStore,
        signaling: Arc<dyn SignalingTransport>,
        capture: Arc<dyn MediaCapture>,
        peers: Arc<dyn PeerTransportFactory>,
        events: Arc<EventBus>,
    ) -> (Self, ControllerInbox) {
        let (peer_tx, peer_events) = mpsc::unbounded_channel();
        let (timeout_tx, timeouts) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(CallState::default());

        let controller = Self {
            config,
            signaling,
            capture,
            peers,
            events,
            state: Arc::new(state),
            local_preview: RenderSurface::new("local"),
            remote_view: RenderSurface::new("remote"),
            slot: None,
            next_key: 1,
            peer_tx,
            timeout_tx,
            abandoned: VecDeque::new(),
            correlated_registrations: false,
            acquiring: false,
            speaker_on: false,
            error: None,
            last_ended: None,
        };

        (
            controller,
            ControllerInbox {
                peer_events,
                timeouts,
            },
        )
    }

    // ========================================================================
    // Presentation-facing accessors
    // ========================================================================

    pub fn state(&self) -> watch::Receiver<CallState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> CallState {
        let mut state = CallState {
            is_connecting: self.acquiring,
            error: self.error.clone(),
            is_speaker_on: self.speaker_on,
            last_ended: self.last_ended.clone(),
            ..Default::default()
        };

        if let Some(ref session) = self.slot {
            let elapsed = session.timer.as_ref().map(|t| t.elapsed_secs()).unwrap_or(0);
            let mut record = session.record.clone();
            record.duration_secs = elapsed;

            state.call_duration_secs = elapsed;
            state.is_connecting |= record.status == CallStatus::Connecting;
            state.is_muted = session.media.is_muted();
            state.is_video_off = session.media.is_video_off();

            if record.role == CallRole::Callee && record.status == CallStatus::IncomingRinging {
                state.incoming_call = Some(record);
            } else {
                state.active_call = Some(record);
            }
        }

        state
    }

    pub fn local_preview(&self) -> RenderSurface {
        self.local_preview.clone()
    }

    pub fn remote_view(&self) -> RenderSurface {
        self.remote_view.clone()
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Open a subscription on the signaling transport
    pub fn subscribe_signaling(&self) -> Subscription {
        self.signaling.subscribe()
    }

    pub fn status(&self) -> CallStatus {
        self.slot
            .as_ref()
            .map(|s| s.record.status)
            .unwrap_or(CallStatus::Idle)
    }

    // ========================================================================
    // Local actions
    // ========================================================================

    /// Acquire local media and ring `counterpart_id`
    pub async fn start_call(
        &mut self,
        counterpart_id: &str,
        call_type: CallType,
        conversation_id: Option<String>,
    ) -> Result<()> {
        if let Some(ref session) = self.slot {
            return Err(CallError::CallInProgress(session.record.status.to_string()));
        }
        // Without request ids a late registration could not be told apart
        // from the new call's
        if !self.abandoned.is_empty() && !self.correlated_registrations {
            return Err(CallError::CallInProgress(
                "previous call not yet registered".to_string(),
            ));
        }

        let facing = self.config.get().media.facing_mode;
        let mut media =
            MediaDeviceManager::new(self.capture.clone(), self.local_preview.clone(), facing);

        self.error = None;
        self.acquiring = true;
        self.publish_state();
        let acquired = media.acquire(call_type).await;
        self.acquiring = false;

        if let Err(e) = acquired {
            self.set_error(&e);
            self.publish_state();
            return Err(e);
        }

        let key = self.allocate_key();
        let request_id = uuid::Uuid::new_v4().to_string();
        let record = CallSession::outgoing(
            Counterpart::from_id(counterpart_id),
            call_type,
            conversation_id.clone(),
        );
        self.slot = Some(ActiveSession {
            key,
            request_id: Some(request_id.clone()),
            record,
            media,
            peer: None,
            remote_stream: None,
            timer: None,
            setup_deadline: None,
        });

        let initiate = SignalingMessage::Initiate(InitiateCall {
            callee_id: counterpart_id.to_string(),
            call_type,
            conversation_id,
            request_id: Some(request_id),
        });
        if let Err(e) = self.send(initiate) {
            self.set_error(&e);
            self.teardown(EndReason::Failed, false, None).await;
            return Err(e);
        }

        info!("Calling {} ({} call)", counterpart_id, call_type);
        self.arm_setup_deadline();
        self.publish_transition();
        Ok(())
    }

    /// Answer the ringing incoming call
    pub async fn answer_call(&mut self) -> Result<()> {
        let session = self
            .slot
            .as_ref()
            .filter(|s| s.record.status == CallStatus::IncomingRinging)
            .ok_or(CallError::NoIncomingCall)?;
        let Some(call_id) = session.record.id.clone() else {
            return Err(CallError::NoIncomingCall);
        };
        let call_type = session.record.call_type;

        self.error = None;
        self.acquiring = true;
        self.publish_state();

        let acquired = match self.slot.as_mut() {
            Some(session) => session.media.acquire(call_type).await,
            None => Err(CallError::NoIncomingCall),
        };
        self.acquiring = false;

        if let Err(e) = acquired {
            warn!("Cannot answer call {}: {}", call_id, e);
            self.set_error(&e);
            let _ = self.send(SignalingMessage::Reject(RejectCall {
                call_id,
                reason: Some(EndReason::Failed),
            }));
            self.teardown(EndReason::Failed, false, None).await;
            return Err(e);
        }

        if let Some(session) = self.slot.as_mut() {
            session.record.status = CallStatus::Connecting;
        }
        self.publish_transition();

        if let Err(e) = self.open_peer().await {
            self.fail_call(&e).await;
            return Err(e);
        }

        if let Err(e) = self.send(SignalingMessage::Accept(CallRef {
            call_id: call_id.clone(),
        })) {
            self.set_error(&e);
            self.teardown(EndReason::Failed, false, None).await;
            return Err(e);
        }

        info!("Answered call {}", call_id);
        self.arm_setup_deadline();
        Ok(())
    }

    /// Refuse the ringing incoming call
    pub async fn decline_call(&mut self) -> Result<()> {
        let call_id = self
            .slot
            .as_ref()
            .filter(|s| s.record.status == CallStatus::IncomingRinging)
            .and_then(|s| s.record.id.clone())
            .ok_or(CallError::NoIncomingCall)?;

        let _ = self.send(SignalingMessage::Reject(RejectCall {
            call_id: call_id.clone(),
            reason: Some(EndReason::Declined),
        }));
        info!("Declined call {}", call_id);
        self.teardown(EndReason::Declined, false, None).await;
        Ok(())
    }

    /// Hang up the current call in whatever state it is in
    pub async fn end_call(&mut self) -> Result<()> {
        if self.slot.is_none() {
            return Err(CallError::NoActiveCall);
        }
        self.teardown(EndReason::Hangup, true, None).await;
        Ok(())
    }

    /// Flip the microphone; returns the new muted flag
    pub fn toggle_mute(&mut self) -> Result<bool> {
        let session = self.slot.as_ref().ok_or(CallError::NoActiveCall)?;
        let muted = session.media.toggle_mute();
        self.publish_state();
        Ok(muted)
    }

    /// Flip the camera; returns the new video-off flag
    pub fn toggle_video(&mut self) -> Result<bool> {
        let session = self.slot.as_ref().ok_or(CallError::NoActiveCall)?;
        let video_off = session.media.toggle_video();
        self.publish_state();
        Ok(video_off)
    }

    /// Flip the loudspeaker flag; returns the new value
    pub fn toggle_speaker(&mut self) -> bool {
        self.speaker_on = !self.speaker_on;
        debug!("Speaker {}", if self.speaker_on { "on" } else { "off" });
        self.publish_state();
        self.speaker_on
    }

    /// Switch to the camera facing the other way
    ///
    /// The new track replaces the old one on the existing sender; no new
    /// offer/answer round is started. Returns the facing mode now in use.
    pub async fn switch_camera(&mut self) -> Result<FacingMode> {
        let fallback = self.config.get().call.camera_switch_fallback;
        let session = self.slot.as_mut().ok_or(CallError::NoActiveCall)?;
        let had_video = session
            .media
            .stream()
            .and_then(|s| s.video_track())
            .is_some();

        let switched = session.media.switch_camera(fallback).await;
        let facing = session.media.facing_mode();

        let (replacement, outcome) = match switched {
            Ok(CameraSwitch::Switched(track)) => (Some(track), Ok(facing)),
            Ok(CameraSwitch::Restored { track, error }) => {
                (Some(track), Err(CallError::Media(error)))
            }
            Err(e) => (None, Err(e)),
        };

        // The sender only changes when the old camera track was removed
        if let Some(peer) = session.peer.as_ref().filter(|_| had_video) {
            if let Err(e) = peer.replace_video_track(replacement.as_ref()).await {
                warn!("Failed to replace outbound video track: {}", e);
            }
        }

        if let Err(ref e) = outcome {
            self.set_error(e);
        }
        self.publish_state();
        outcome
    }

    // ========================================================================
    // Inbound signaling
    // ========================================================================

    pub async fn handle_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::IncomingCall(incoming) => self.on_incoming(incoming),
            SignalingEvent::CallRegistered(registration) => self.on_registered(registration),
            SignalingEvent::CallAccepted(accepted) => self.on_accepted(accepted.call_id).await,
            SignalingEvent::CallRejected(rejected) => self.on_rejected(rejected).await,
            SignalingEvent::CallEnded(ended) => self.on_remote_end(ended).await,
            SignalingEvent::CallSignal(signal) => self.on_signal(signal).await,
        }
    }

    /// The signaling subscription is gone; no further messages can arrive
    pub async fn handle_signaling_closed(&mut self) {
        if self.slot.is_some() {
            warn!("Signaling connection lost during call");
            self.error = Some("Signaling connection lost".to_string());
            self.teardown(EndReason::Failed, false, None).await;
        }
    }

    fn on_incoming(&mut self, incoming: IncomingCall) {
        if let Some(ref session) = self.slot {
            if session.record.is_bound_to(&incoming.call_id) {
                debug!("Duplicate incomingCall for {}", incoming.call_id);
                return;
            }

            if self.config.get().call.reject_when_busy {
                info!(
                    "Busy, rejecting call {} from {}",
                    incoming.call_id, incoming.caller.id
                );
                let _ = self.send(SignalingMessage::Reject(RejectCall {
                    call_id: incoming.call_id,
                    reason: Some(EndReason::Busy),
                }));
            } else {
                debug!("Busy, ignoring call {}", incoming.call_id);
            }
            return;
        }

        info!(
            "Incoming {} call {} from {}",
            incoming.call_type, incoming.call_id, incoming.caller.id
        );

        let facing = self.config.get().media.facing_mode;
        let key = self.allocate_key();
        self.error = None;
        self.events.publish(CallEvent::Incoming {
            call_id: incoming.call_id.clone(),
            caller: incoming.caller.clone(),
            call_type: incoming.call_type,
        });

        self.slot = Some(ActiveSession {
            key,
            request_id: None,
            record: CallSession::incoming(
                incoming.call_id,
                incoming.caller,
                incoming.call_type,
                incoming.conversation_id,
            ),
            media: MediaDeviceManager::new(
                self.capture.clone(),
                self.local_preview.clone(),
                facing,
            ),
            peer: None,
            remote_stream: None,
            timer: None,
            setup_deadline: None,
        });

        self.arm_setup_deadline();
        self.publish_transition();
    }

    fn on_registered(&mut self, registration: Registration) {
        let Registration {
            call_id,
            request_id,
        } = registration;

        let abandoned = match request_id {
            Some(ref request_id) => {
                self.correlated_registrations = true;
                match self.abandoned.iter().position(|r| r == request_id) {
                    Some(pos) => self.abandoned.remove(pos).is_some(),
                    None => false,
                }
            }
            // Uncorrelated registrations arrive in initiate order
            None => self.abandoned.pop_front().is_some(),
        };

        if abandoned {
            info!("Call {} was hung up before registration, ending it", call_id);
            let _ = self.send(SignalingMessage::End(CallEnd {
                call_id,
                reason: EndReason::Hangup,
                duration: None,
            }));
            return;
        }

        match self.slot.as_mut() {
            Some(session)
                if session.record.is_caller()
                    && session.record.id.is_none()
                    && (request_id.is_none() || session.request_id == request_id) =>
            {
                info!("Call registered as {}", call_id);
                session.record.id = Some(call_id);
            }
            _ => {
                debug!("Ignoring callRegistered for {}", call_id);
                return;
            }
        }
        self.publish_transition();
    }

    async fn on_accepted(&mut self, call_id: CallId) {
        let Some(session) = self.bound_session(&call_id) else {
            debug!("Ignoring callAccepted for stale call {}", call_id);
            return;
        };
        if !session.record.is_caller() || session.record.status != CallStatus::OutgoingRinging {
            debug!(
                "Ignoring callAccepted for {} in state {}",
                call_id, session.record.status
            );
            return;
        }

        session.record.status = CallStatus::Connecting;
        info!("Call {} accepted", call_id);
        self.publish_transition();
        self.arm_setup_deadline();

        if let Err(e) = self.send_offer(call_id).await {
            self.fail_call(&e).await;
        }
    }

    async fn send_offer(&mut self, call_id: CallId) -> Result<()> {
        self.open_peer().await?;

        let peer = self
            .slot
            .as_mut()
            .and_then(|s| s.peer.as_mut())
            .ok_or(CallError::NoActiveCall)?;
        let sdp = peer.create_offer().await?;

        debug!("Sending offer for call {}", call_id);
        self.send(SignalingMessage::Signal(CallSignal::offer(call_id, sdp)))
    }

    async fn on_rejected(&mut self, rejected: RejectCall) {
        if self.bound_session(&rejected.call_id).is_none() {
            debug!("Ignoring callRejected for stale call {}", rejected.call_id);
            return;
        }

        let reason = rejected.reason.unwrap_or(EndReason::Declined);
        info!("Call {} rejected ({})", rejected.call_id, reason);
        self.teardown(reason, false, None).await;
    }

    async fn on_remote_end(&mut self, ended: CallEnd) {
        if self.bound_session(&ended.call_id).is_none() {
            debug!("Ignoring callEnded for stale call {}", ended.call_id);
            return;
        }

        info!("Call {} ended by remote ({})", ended.call_id, ended.reason);
        self.teardown(ended.reason, false, ended.duration).await;
    }

    async fn on_signal(&mut self, signal: CallSignal) {
        let Some(session) = self.bound_session(&signal.call_id) else {
            debug!(
                "Ignoring {} signal for stale call {}",
                signal.kind, signal.call_id
            );
            return;
        };
        let is_caller = session.record.is_caller();
        let Some(peer) = session.peer.as_mut() else {
            debug!(
                "Ignoring {} signal for call {} before negotiation",
                signal.kind, signal.call_id
            );
            return;
        };

        let result = match signal.kind {
            SignalKind::Offer if is_caller || peer.has_remote_description() => {
                warn!("Ignoring unexpected offer for call {}", signal.call_id);
                Ok(None)
            }
            SignalKind::Offer => match signal.sdp {
                Some(sdp) => peer.accept_offer(sdp).await.map(Some),
                None => Err(CallError::Negotiation("offer without SDP".to_string())),
            },
            SignalKind::Answer if !is_caller || peer.has_remote_description() => {
                warn!("Ignoring unexpected answer for call {}", signal.call_id);
                Ok(None)
            }
            SignalKind::Answer => match signal.sdp {
                Some(sdp) => peer.accept_answer(sdp).await.map(|_| None),
                None => Err(CallError::Negotiation("answer without SDP".to_string())),
            },
            SignalKind::IceCandidate => {
                match signal.candidate {
                    Some(candidate) => {
                        let outcome = peer.add_remote_candidate(candidate).await;
                        debug!("Remote candidate for {}: {:?}", signal.call_id, outcome);
                    }
                    None => debug!("Empty candidate signal for {}", signal.call_id),
                }
                Ok(None)
            }
        };

        let sent = match result {
            Ok(Some(answer)) => {
                debug!("Sending answer for call {}", signal.call_id);
                self.send(SignalingMessage::Signal(CallSignal::answer(
                    signal.call_id,
                    answer,
                )))
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        if let Err(e) = sent {
            self.fail_call(&e).await;
        }
    }

    // ========================================================================
    // Peer connection and timers
    // ========================================================================

    pub async fn handle_peer_event(&mut self, tagged: TaggedPeerEvent) {
        let Some(session) = self.slot.as_mut().filter(|s| s.key == tagged.session) else {
            debug!("Discarding peer event from stale session {}", tagged.session);
            return;
        };

        match tagged.event {
            PeerEvent::LocalCandidate(candidate) => {
                if let Some(call_id) = session.record.id.clone() {
                    let _ = self.send(SignalingMessage::Signal(CallSignal::candidate(
                        call_id, candidate,
                    )));
                }
            }
            PeerEvent::StateChanged(ConnectionState::Connected) => self.on_connected(),
            PeerEvent::StateChanged(state) if state.is_failure() => {
                if matches!(
                    session.record.status,
                    CallStatus::Connecting | CallStatus::Active
                ) {
                    let error = CallError::WebRtcError(format!("connection {}", state));
                    self.fail_call(&error).await;
                }
            }
            PeerEvent::StateChanged(state) => {
                debug!("Peer connection {}", state);
            }
            PeerEvent::RemoteTrack(track) => {
                let stream = session
                    .remote_stream
                    .get_or_insert_with(|| MediaStream::with_id("remote"));
                stream.add_track(track);
                self.remote_view.attach(stream.clone());
                self.publish_state();
            }
        }
    }

    fn on_connected(&mut self) {
        let Some(session) = self.slot.as_mut() else {
            return;
        };
        if session.record.status != CallStatus::Connecting {
            debug!("Connected in state {}, ignoring", session.record.status);
            return;
        }

        session.record.status = CallStatus::Active;
        session.record.connected_at = Some(Utc::now());
        session.disarm_deadline();

        if session.timer.is_none() {
            let state = self.state.clone();
            let call_id = session.record.id.clone();
            session.timer = Some(DurationTimer::start(move |secs| {
                state.send_if_modified(|s| match s.active_call {
                    Some(ref call) if call.status == CallStatus::Active && call.id == call_id => {
                        s.call_duration_secs = secs;
                        true
                    }
                    _ => false,
                });
            }));
        }

        let call_id = session.record.id.clone();
        info!("Call {} connected", call_id.as_ref().map(|c| c.as_str()).unwrap_or("-"));
        self.events.publish(CallEvent::Connected { call_id });
        self.publish_transition();
    }

    /// A setup deadline fired
    pub async fn handle_setup_timeout(&mut self, key: u64) {
        let Some(session) = self.slot.as_ref().filter(|s| s.key == key) else {
            return;
        };

        match session.record.status {
            CallStatus::IncomingRinging => {
                info!("Incoming call was not answered in time");
                self.teardown(EndReason::Missed, false, None).await;
            }
            status if status.is_setup() => {
                warn!("Call setup timed out in state {}", status);
                self.error = Some("Call could not be connected".to_string());
                self.teardown(EndReason::Timeout, true, None).await;
            }
            _ => {}
        }
    }

    /// End any live call; used when the owner shuts down
    pub async fn shutdown(&mut self) {
        self.teardown(EndReason::Hangup, true, None).await;
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Release everything the current call owns and return to idle
    ///
    /// `notify` sends `end` to the remote side when an id is bound. Returns
    /// false when there was no call to tear down.
    pub async fn teardown(
        &mut self,
        reason: EndReason,
        notify: bool,
        remote_duration: Option<u64>,
    ) -> bool {
        let Some(mut session) = self.slot.take() else {
            return false;
        };

        session.disarm_deadline();
        let elapsed = session.timer.take().map(|t| t.stop()).unwrap_or(0);
        let duration = if elapsed > 0 {
            elapsed
        } else {
            remote_duration.unwrap_or(0)
        };

        if notify {
            match session.record.id.clone() {
                Some(call_id) => {
                    let _ = self.send(SignalingMessage::End(CallEnd {
                        call_id,
                        reason,
                        duration: Some(duration),
                    }));
                }
                None if session.record.is_caller() => {
                    if let Some(request_id) = session.request_id.clone() {
                        debug!("Call {} not registered yet, will end it on registration", request_id);
                        self.abandoned.push_back(request_id);
                    }
                }
                None => {}
            }
        }

        if let Some(mut peer) = session.peer.take() {
            peer.close().await;
        }
        session.media.release();
        if let Some(remote) = session.remote_stream.take() {
            remote.stop_all();
        }
        self.remote_view.detach();

        let status = reason.terminal_status();
        session.record.status = status;
        session.record.duration_secs = duration;

        let call_id = session.record.id.clone();
        info!(
            "Call {} {} ({}, {}s)",
            call_id.as_ref().map(|c| c.as_str()).unwrap_or("-"),
            status,
            reason,
            duration
        );

        self.events.publish(CallEvent::StateChanged {
            call_id: call_id.clone(),
            status,
        });
        self.events.publish(CallEvent::Ended {
            call_id: call_id.clone(),
            reason,
            duration_secs: duration,
        });

        self.last_ended = Some(EndedCall {
            call_id,
            counterpart: session.record.counterpart,
            status,
            reason,
            duration_secs: duration,
        });
        self.speaker_on = false;

        self.publish_transition();
        true
    }

    async fn fail_call(&mut self, error: &CallError) {
        warn!("Call failed: {}", error);
        if self.error.is_none() {
            self.error = Some(format!("Call failed: {}", error));
        }
        self.teardown(EndReason::Failed, true, None).await;
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn open_peer(&mut self) -> Result<()> {
        let ice = self.config.get().ice.clone();
        let session = self.slot.as_mut().ok_or(CallError::NoActiveCall)?;
        let local = session
            .media
            .stream()
            .cloned()
            .ok_or_else(|| CallError::InvalidState("no local media".to_string()))?;

        let events = PeerEventSink::new(session.key, self.peer_tx.clone());
        let peer =
            PeerConnectionManager::create(self.peers.as_ref(), &ice, &local, events).await?;
        session.peer = Some(peer);
        Ok(())
    }

    fn bound_session(&mut self, call_id: &CallId) -> Option<&mut ActiveSession> {
        self.slot
            .as_mut()
            .filter(|s| s.record.is_bound_to(call_id))
    }

    fn allocate_key(&mut self) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    fn arm_setup_deadline(&mut self) {
        let secs = self.config.get().call.setup_timeout_secs;
        let Some(session) = self.slot.as_mut() else {
            return;
        };

        session.disarm_deadline();
        if secs == 0 {
            return;
        }

        let key = session.key;
        let tx = self.timeout_tx.clone();
        session.setup_deadline = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            let _ = tx.send(key);
        }));
    }

    fn send(&self, message: SignalingMessage) -> Result<()> {
        let name = message.name();
        self.signaling.send(message).map_err(|e| {
            warn!("Failed to send {}: {}", name, e);
            e
        })
    }

    fn set_error(&mut self, error: &CallError) {
        let message = match error {
            CallError::Media(e) => e.to_string(),
            other => other.to_string(),
        };
        self.events.publish(CallEvent::Error {
            message: message.clone(),
        });
        self.error = Some(message);
    }

    fn publish_state(&self) {
        self.state.send_replace(self.snapshot());
    }

    fn publish_transition(&self) {
        let snapshot = self.snapshot();
        self.events.publish(CallEvent::StateChanged {
            call_id: snapshot.call_id().cloned(),
            status: snapshot.status(),
        });
        self.state.send_replace(snapshot);
    }
}
