//! In-process signaling backend
//!
//! [`SignalingHub`] plays the role of the signaling server for callers that
//! live in the same process: it assigns call ids, rings the callee and relays
//! negotiation messages between the two parties. Each user connects through
//! a [`HubClient`], which implements [`SignalingTransport`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::messages::{
    CallEnd, IncomingCall, Registration, RejectCall, SignalingEvent, SignalingMessage,
};
use super::transport::{SignalingTransport, SubscriberSet, Subscription};
use crate::call::{CallId, Counterpart, EndReason};
use crate::error::{CallError, Result};

/// Routed messages kept for [`SignalingHub::messages_from`]
const LOG_CAPACITY: usize = 1024;

/// Two parties of a routed call
#[derive(Debug, Clone)]
struct HubCall {
    caller: String,
    callee: String,
}

impl HubCall {
    fn other(&self, user: &str) -> Option<&str> {
        if user == self.caller {
            Some(&self.callee)
        } else if user == self.callee {
            Some(&self.caller)
        } else {
            None
        }
    }
}

struct HubState {
    next_call_id: u64,
    users: HashMap<String, (Counterpart, Arc<SubscriberSet>)>,
    calls: HashMap<CallId, HubCall>,
    log: VecDeque<(String, SignalingMessage)>,
}

/// In-process signaling server
#[derive(Clone)]
pub struct SignalingHub {
    state: Arc<Mutex<HubState>>,
}

impl SignalingHub {
    pub fn new() -> Self {
        Self::with_first_call_id(1)
    }

    /// Hub whose first assigned call id is `first`
    pub fn with_first_call_id(first: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                next_call_id: first,
                users: HashMap::new(),
                calls: HashMap::new(),
                log: VecDeque::new(),
            })),
        }
    }

    /// Register a user and return their transport
    ///
    /// Connecting the same user id twice replaces the earlier connection.
    pub fn connect(&self, profile: Counterpart) -> HubClient {
        let subscribers = Arc::new(SubscriberSet::new());
        let mut state = self.state.lock();

        if let Some((_, old)) = state
            .users
            .insert(profile.id.clone(), (profile.clone(), subscribers.clone()))
        {
            old.close_all();
        }
        info!("Signaling hub: user {} connected", profile.id);

        HubClient {
            user_id: profile.id,
            hub: self.clone(),
            subscribers,
        }
    }

    /// Remove a user; calls they are part of are ended for the other party
    pub fn disconnect(&self, user_id: &str) {
        let mut state = self.state.lock();
        if let Some((_, subscribers)) = state.users.remove(user_id) {
            subscribers.close_all();
        }

        let orphaned: Vec<(CallId, HubCall)> = state
            .calls
            .iter()
            .filter(|(_, call)| call.other(user_id).is_some())
            .map(|(id, call)| (id.clone(), call.clone()))
            .collect();

        for (call_id, call) in orphaned {
            state.calls.remove(&call_id);
            if let Some(other) = call.other(user_id) {
                Self::deliver(
                    &state,
                    other,
                    SignalingEvent::CallEnded(CallEnd {
                        call_id,
                        reason: EndReason::Unavailable,
                        duration: None,
                    }),
                );
            }
        }
        info!("Signaling hub: user {} disconnected", user_id);
    }

    /// Number of calls currently routed
    pub fn active_calls(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Recent messages sent by `user_id`, in order
    ///
    /// Only the last 1024 routed messages (all users) are kept.
    pub fn messages_from(&self, user_id: &str) -> Vec<SignalingMessage> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|(from, _)| from == user_id)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    fn deliver(state: &HubState, user_id: &str, event: SignalingEvent) {
        match state.users.get(user_id) {
            Some((_, subscribers)) => {
                debug!("Signaling hub: {} -> {}", event.name(), user_id);
                subscribers.publish(&event);
            }
            None => debug!("Signaling hub: {} dropped, {} not connected", event.name(), user_id),
        }
    }

    fn route(&self, from: &str, message: SignalingMessage) -> Result<()> {
        let mut state = self.state.lock();
        if state.log.len() == LOG_CAPACITY {
            state.log.pop_front();
        }
        state.log.push_back((from.to_string(), message.clone()));

        match message {
            SignalingMessage::Initiate(initiate) => {
                let call_id = CallId::from(state.next_call_id);
                state.next_call_id += 1;

                Self::deliver(
                    &state,
                    from,
                    SignalingEvent::CallRegistered(Registration {
                        call_id: call_id.clone(),
                        request_id: initiate.request_id.clone(),
                    }),
                );

                let caller = match state.users.get(from) {
                    Some((profile, _)) => profile.clone(),
                    None => Counterpart::from_id(from),
                };

                if !state.users.contains_key(&initiate.callee_id) {
                    warn!(
                        "Signaling hub: callee {} not connected, call {} unavailable",
                        initiate.callee_id, call_id
                    );
                    Self::deliver(
                        &state,
                        from,
                        SignalingEvent::CallEnded(CallEnd {
                            call_id,
                            reason: EndReason::Unavailable,
                            duration: None,
                        }),
                    );
                    return Ok(());
                }

                state.calls.insert(
                    call_id.clone(),
                    HubCall {
                        caller: from.to_string(),
                        callee: initiate.callee_id.clone(),
                    },
                );
                info!(
                    "Signaling hub: call {} {} -> {} ({})",
                    call_id, from, initiate.callee_id, initiate.call_type
                );

                Self::deliver(
                    &state,
                    &initiate.callee_id,
                    SignalingEvent::IncomingCall(IncomingCall {
                        call_id,
                        caller,
                        call_type: initiate.call_type,
                        conversation_id: initiate.conversation_id,
                    }),
                );
            }
            SignalingMessage::Accept(accept) => {
                let Some(other) = Self::counterpart_of(&state, from, &accept.call_id) else {
                    return Ok(());
                };
                Self::deliver(&state, &other, SignalingEvent::CallAccepted(accept));
            }
            SignalingMessage::Reject(reject) => {
                let Some(other) = Self::counterpart_of(&state, from, &reject.call_id) else {
                    return Ok(());
                };
                state.calls.remove(&reject.call_id);
                Self::deliver(
                    &state,
                    &other,
                    SignalingEvent::CallRejected(RejectCall {
                        call_id: reject.call_id,
                        reason: reject.reason,
                    }),
                );
            }
            SignalingMessage::Signal(signal) => {
                let Some(other) = Self::counterpart_of(&state, from, &signal.call_id) else {
                    return Ok(());
                };
                Self::deliver(&state, &other, SignalingEvent::CallSignal(signal));
            }
            SignalingMessage::End(end) => {
                let Some(other) = Self::counterpart_of(&state, from, &end.call_id) else {
                    return Ok(());
                };
                state.calls.remove(&end.call_id);
                Self::deliver(&state, &other, SignalingEvent::CallEnded(end));
            }
        }

        Ok(())
    }

    fn counterpart_of(state: &HubState, from: &str, call_id: &CallId) -> Option<String> {
        let other = state
            .calls
            .get(call_id)
            .and_then(|call| call.other(from))
            .map(str::to_string);

        if other.is_none() {
            debug!("Signaling hub: ignoring message from {} for unknown call {}", from, call_id);
        }
        other
    }
}

impl Default for SignalingHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One user's connection to a [`SignalingHub`]
pub struct HubClient {
    user_id: String,
    hub: SignalingHub,
    subscribers: Arc<SubscriberSet>,
}

impl HubClient {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl SignalingTransport for HubClient {
    fn send(&self, message: SignalingMessage) -> Result<()> {
        let connected = self
            .hub
            .state
            .lock()
            .users
            .get(&self.user_id)
            .map(|(_, subs)| Arc::ptr_eq(subs, &self.subscribers))
            .unwrap_or(false);

        if !connected {
            return Err(CallError::Signaling(format!(
                "user {} is not connected",
                self.user_id
            )));
        }

        self.hub.route(&self.user_id, message)
    }

    fn subscribe(&self) -> Subscription {
        self.subscribers.subscribe()
    }
}
