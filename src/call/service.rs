//! Controller actor and its handle
//!
//! [`CallService::spawn`] moves a [`CallController`] onto its own task. The
//! task is the only place controller methods run; it selects over user
//! commands, the signaling subscription, peer events and setup deadlines.
//! [`CallHandle`] is the cloneable API given to the presentation layer.

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::controller::{CallController, ControllerInbox};
use super::types::{CallState, CallType};
use crate::error::{CallError, Result};
use crate::events::CallEvent;
use crate::media::{FacingMode, RenderSurface};

const COMMAND_QUEUE: usize = 32;

enum Command {
    StartCall {
        counterpart_id: String,
        call_type: CallType,
        conversation_id: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    AnswerCall {
        reply: oneshot::Sender<Result<()>>,
    },
    DeclineCall {
        reply: oneshot::Sender<Result<()>>,
    },
    EndCall {
        reply: oneshot::Sender<Result<()>>,
    },
    ToggleMute {
        reply: oneshot::Sender<Result<bool>>,
    },
    ToggleVideo {
        reply: oneshot::Sender<Result<bool>>,
    },
    ToggleSpeaker {
        reply: oneshot::Sender<bool>,
    },
    SwitchCamera {
        reply: oneshot::Sender<Result<FacingMode>>,
    },
}

/// Runs a controller on a dedicated task
pub struct CallService;

impl CallService {
    /// Start the actor; it runs until every handle is dropped or
    /// [`CallHandle::shutdown`] is called
    pub fn spawn(controller: CallController, inbox: ControllerInbox) -> CallHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let shutdown = CancellationToken::new();

        let handle = CallHandle {
            commands: cmd_tx,
            state: controller.state(),
            local_preview: controller.local_preview(),
            remote_view: controller.remote_view(),
            events: controller.events().subscribe(),
            shutdown: shutdown.clone(),
        };

        tokio::spawn(run(controller, inbox, cmd_rx, shutdown));
        debug!("Call service started");
        handle
    }
}

async fn run(
    mut controller: CallController,
    mut inbox: ControllerInbox,
    mut commands: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
) {
    let mut signaling = controller.subscribe_signaling();
    let mut signaling_open = true;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    debug!("All call handles dropped");
                    break;
                };
                dispatch(&mut controller, cmd).await;
            }

            event = signaling.recv(), if signaling_open => {
                match event {
                    Some(event) => controller.handle_signaling(event).await,
                    None => {
                        signaling_open = false;
                        controller.handle_signaling_closed().await;
                    }
                }
            }

            Some(event) = inbox.peer_events.recv() => {
                controller.handle_peer_event(event).await;
            }

            Some(key) = inbox.timeouts.recv() => {
                controller.handle_setup_timeout(key).await;
            }
        }
    }

    signaling.unsubscribe();
    controller.shutdown().await;
    info!("Call service stopped");
}

async fn dispatch(controller: &mut CallController, cmd: Command) {
    match cmd {
        Command::StartCall {
            counterpart_id,
            call_type,
            conversation_id,
            reply,
        } => {
            let result = controller
                .start_call(&counterpart_id, call_type, conversation_id)
                .await;
            let _ = reply.send(result);
        }
        Command::AnswerCall { reply } => {
            let _ = reply.send(controller.answer_call().await);
        }
        Command::DeclineCall { reply } => {
            let _ = reply.send(controller.decline_call().await);
        }
        Command::EndCall { reply } => {
            let _ = reply.send(controller.end_call().await);
        }
        Command::ToggleMute { reply } => {
            let _ = reply.send(controller.toggle_mute());
        }
        Command::ToggleVideo { reply } => {
            let _ = reply.send(controller.toggle_video());
        }
        Command::ToggleSpeaker { reply } => {
            let _ = reply.send(controller.toggle_speaker());
        }
        Command::SwitchCamera { reply } => {
            let _ = reply.send(controller.switch_camera().await);
        }
    }
}

/// Presentation-facing handle to a running controller
pub struct CallHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<CallState>,
    local_preview: RenderSurface,
    remote_view: RenderSurface,
    events: broadcast::Receiver<CallEvent>,
    shutdown: CancellationToken,
}

impl Clone for CallHandle {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            state: self.state.clone(),
            local_preview: self.local_preview.clone(),
            remote_view: self.remote_view.clone(),
            events: self.events.resubscribe(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl CallHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| CallError::ControllerClosed)?;
        rx.await.map_err(|_| CallError::ControllerClosed)
    }

    pub async fn start_call(
        &self,
        counterpart_id: impl Into<String>,
        call_type: CallType,
        conversation_id: Option<String>,
    ) -> Result<()> {
        let counterpart_id = counterpart_id.into();
        self.request(|reply| Command::StartCall {
            counterpart_id,
            call_type,
            conversation_id,
            reply,
        })
        .await?
    }

    pub async fn answer_call(&self) -> Result<()> {
        self.request(|reply| Command::AnswerCall { reply }).await?
    }

    pub async fn decline_call(&self) -> Result<()> {
        self.request(|reply| Command::DeclineCall { reply }).await?
    }

    pub async fn end_call(&self) -> Result<()> {
        self.request(|reply| Command::EndCall { reply }).await?
    }

    /// Returns the new muted flag
    pub async fn toggle_mute(&self) -> Result<bool> {
        self.request(|reply| Command::ToggleMute { reply }).await?
    }

    /// Returns the new video-off flag
    pub async fn toggle_video(&self) -> Result<bool> {
        self.request(|reply| Command::ToggleVideo { reply }).await?
    }

    /// Returns the new speaker flag
    pub async fn toggle_speaker(&self) -> Result<bool> {
        self.request(|reply| Command::ToggleSpeaker { reply }).await
    }

    /// Returns the facing mode now in use
    pub async fn switch_camera(&self) -> Result<FacingMode> {
        self.request(|reply| Command::SwitchCamera { reply }).await?
    }

    /// Latest published state
    pub fn snapshot(&self) -> CallState {
        self.state.borrow().clone()
    }

    /// Watch state changes
    pub fn state(&self) -> watch::Receiver<CallState> {
        self.state.clone()
    }

    /// Wait until `predicate` holds for the published state
    pub async fn wait_for<F>(&self, predicate: F) -> Result<CallState>
    where
        F: FnMut(&CallState) -> bool,
    {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(predicate)
            .await
            .map_err(|_| CallError::ControllerClosed)?;
        Ok(state.clone())
    }

    /// Receiver for call events published after this handle was created
    pub fn events(&self) -> broadcast::Receiver<CallEvent> {
        self.events.resubscribe()
    }

    pub fn local_preview(&self) -> &RenderSurface {
        &self.local_preview
    }

    pub fn remote_view(&self) -> &RenderSurface {
        &self.remote_view
    }

    /// Stop the actor, ending any live call
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::call::{CallStatus, Counterpart};
    use crate::config::{CallConfig, ConfigStore};
    use crate::events::EventBus;
    use crate::media::VirtualCamera;
    use crate::peer::RtcPeerFactory;
    use crate::signaling::{InitiateCall, SignalingHub, SignalingMessage, SignalingTransport};

    fn spawn(hub: &SignalingHub, user: &str) -> (CallHandle, VirtualCamera) {
        let camera = VirtualCamera::new(user);
        let signaling = hub.connect(Counterpart::from_id(user));
        let config = CallConfig::default();
        let (controller, inbox) = CallController::new(
            ConfigStore::in_memory(config.clone()),
            Arc::new(signaling),
            Arc::new(camera.clone()),
            Arc::new(RtcPeerFactory::new(config.media)),
            Arc::new(EventBus::new()),
        );
        (CallService::spawn(controller, inbox), camera)
    }

    #[tokio::test]
    async fn test_commands_round_trip() {
        let hub = SignalingHub::with_first_call_id(42);
        let (alice, _camera) = spawn(&hub, "alice");

        assert!(matches!(alice.end_call().await, Err(CallError::NoActiveCall)));
        assert!(alice.toggle_speaker().await.unwrap());
        assert!(alice.snapshot().is_speaker_on);
    }

    #[tokio::test]
    async fn test_incoming_call_from_signaling() {
        let hub = SignalingHub::with_first_call_id(42);
        let (bob, camera) = spawn(&hub, "bob");
        let caller = hub.connect(Counterpart::new("alice", "Alice"));

        caller
            .send(SignalingMessage::Initiate(InitiateCall {
                callee_id: "bob".to_string(),
                call_type: CallType::Video,
                conversation_id: None,
                request_id: None,
            }))
            .unwrap();

        let state = bob
            .wait_for(|s| s.status() == CallStatus::IncomingRinging)
            .await
            .unwrap();
        let incoming = state.incoming_call.unwrap();
        assert_eq!(incoming.counterpart.display_name.as_deref(), Some("Alice"));

        bob.decline_call().await.unwrap();
        assert_eq!(camera.acquire_count(), 0);
        assert!(matches!(
            hub.messages_from("bob").last(),
            Some(SignalingMessage::Reject(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_ends_live_call() {
        let hub = SignalingHub::new();
        let _bob = hub.connect(Counterpart::from_id("bob"));
        let (alice, camera) = spawn(&hub, "alice");
        alice.start_call("bob", CallType::Audio, None).await.unwrap();
        assert_eq!(camera.live_tracks(), 1);

        alice.shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while alice.is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(matches!(
            alice.answer_call().await,
            Err(CallError::ControllerClosed)
        ));
        assert_eq!(camera.live_tracks(), 0);
        assert!(matches!(
            hub.messages_from("alice").last(),
            Some(SignalingMessage::End(_))
        ));
    }
}
