//! Signaling wire types
//!
//! Every frame is JSON of the form `{"type": <name>, "payload": {...}}`
//! with camelCase fields.

use serde::{Deserialize, Serialize};

use crate::call::{CallId, CallType, Counterpart, EndReason};
use crate::error::Result;

/// ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    /// SDP mid (media ID)
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    /// Username fragment
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_mline_index = Some(index);
        self
    }
}

/// Kind of negotiation payload carried by a `signal` message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Offer => write!(f, "offer"),
            SignalKind::Answer => write!(f, "answer"),
            SignalKind::IceCandidate => write!(f, "iceCandidate"),
        }
    }
}

/// Request to start a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCall {
    pub callee_id: String,
    pub call_type: CallType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Client-chosen id echoed back in `callRegistered`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Payload that only names a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRef {
    pub call_id: CallId,
}

/// Id assignment for an `initiate`
///
/// `request_id` echoes [`InitiateCall::request_id`] when the backend
/// supports it; older backends send the call id alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub call_id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Refusal of an incoming call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectCall {
    pub call_id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<EndReason>,
}

/// Offer, answer or trickled candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSignal {
    pub call_id: CallId,
    pub kind: SignalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
}

impl CallSignal {
    pub fn offer(call_id: CallId, sdp: impl Into<String>) -> Self {
        Self {
            call_id,
            kind: SignalKind::Offer,
            sdp: Some(sdp.into()),
            candidate: None,
        }
    }

    pub fn answer(call_id: CallId, sdp: impl Into<String>) -> Self {
        Self {
            call_id,
            kind: SignalKind::Answer,
            sdp: Some(sdp.into()),
            candidate: None,
        }
    }

    pub fn candidate(call_id: CallId, candidate: IceCandidate) -> Self {
        Self {
            call_id,
            kind: SignalKind::IceCandidate,
            sdp: None,
            candidate: Some(candidate),
        }
    }
}

/// Hang-up notification, in either direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnd {
    pub call_id: CallId,
    pub reason: EndReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// Incoming call notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub call_id: CallId,
    pub caller: Counterpart,
    pub call_type: CallType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// Messages sent to the signaling backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum SignalingMessage {
    Initiate(InitiateCall),
    Accept(CallRef),
    Reject(RejectCall),
    Signal(CallSignal),
    End(CallEnd),
}

impl SignalingMessage {
    /// Call this message refers to (`None` for `initiate`)
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Self::Initiate(_) => None,
            Self::Accept(r) => Some(&r.call_id),
            Self::Reject(r) => Some(&r.call_id),
            Self::Signal(s) => Some(&s.call_id),
            Self::End(e) => Some(&e.call_id),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Initiate(_) => "initiate",
            Self::Accept(_) => "accept",
            Self::Reject(_) => "reject",
            Self::Signal(_) => "signal",
            Self::End(_) => "end",
        }
    }

    /// Serialize to a wire frame
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Events pushed by the signaling backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum SignalingEvent {
    IncomingCall(IncomingCall),
    CallRegistered(Registration),
    CallAccepted(CallRef),
    CallRejected(RejectCall),
    CallEnded(CallEnd),
    CallSignal(CallSignal),
}

impl SignalingEvent {
    pub fn call_id(&self) -> &CallId {
        match self {
            Self::IncomingCall(c) => &c.call_id,
            Self::CallRegistered(r) => &r.call_id,
            Self::CallAccepted(r) => &r.call_id,
            Self::CallRejected(r) => &r.call_id,
            Self::CallEnded(e) => &e.call_id,
            Self::CallSignal(s) => &s.call_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::IncomingCall(_) => "incomingCall",
            Self::CallRegistered(_) => "callRegistered",
            Self::CallAccepted(_) => "callAccepted",
            Self::CallRejected(_) => "callRejected",
            Self::CallEnded(_) => "callEnded",
            Self::CallSignal(_) => "callSignal",
        }
    }

    /// Parse a wire frame
    pub fn from_frame(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format() {
        let msg = SignalingMessage::Signal(CallSignal::offer(CallId::from(42), "v=0"));
        let json: serde_json::Value = serde_json::from_str(&msg.to_frame().unwrap()).unwrap();

        assert_eq!(json["type"], "signal");
        assert_eq!(json["payload"]["callId"], "42");
        assert_eq!(json["payload"]["kind"], "offer");
        assert_eq!(json["payload"]["sdp"], "v=0");
        assert!(json["payload"].get("candidate").is_none());
    }

    #[test]
    fn test_event_from_frame() {
        let frame = r#"{
            "type": "callSignal",
            "payload": {
                "callId": "42",
                "kind": "iceCandidate",
                "candidate": {
                    "candidate": "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host",
                    "sdpMid": "0",
                    "sdpMLineIndex": 0
                }
            }
        }"#;

        let event = SignalingEvent::from_frame(frame).unwrap();
        assert_eq!(event.name(), "callSignal");
        assert_eq!(event.call_id(), &CallId::from(42));

        match event {
            SignalingEvent::CallSignal(signal) => {
                assert_eq!(signal.kind, SignalKind::IceCandidate);
                let candidate = signal.candidate.unwrap();
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.username_fragment, None);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_incoming_call_frame() {
        let frame = r#"{"type":"incomingCall","payload":{"callId":"7","caller":{"id":"alice","displayName":"Alice"},"callType":"video"}}"#;
        let event = SignalingEvent::from_frame(frame).unwrap();

        match event {
            SignalingEvent::IncomingCall(incoming) => {
                assert_eq!(incoming.caller.display_name.as_deref(), Some("Alice"));
                assert_eq!(incoming.call_type, CallType::Video);
                assert!(incoming.conversation_id.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_integer_call_id_frame() {
        let frame = r#"{"type":"callRegistered","payload":{"callId":42,"requestId":"r-1"}}"#;
        match SignalingEvent::from_frame(frame).unwrap() {
            SignalingEvent::CallRegistered(registration) => {
                assert_eq!(registration.call_id, CallId::from(42));
                assert_eq!(registration.request_id.as_deref(), Some("r-1"));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let frame = r#"{"type":"callEnded","payload":{"callId":7,"reason":"hangup"}}"#;
        let event = SignalingEvent::from_frame(frame).unwrap();
        assert_eq!(event.call_id().as_str(), "7");
    }

    #[test]
    fn test_call_ended_frame() {
        let frame = r#"{"type":"callEnded","payload":{"callId":"9","reason":"hangup","duration":31}}"#;
        match SignalingEvent::from_frame(frame).unwrap() {
            SignalingEvent::CallEnded(end) => {
                assert_eq!(end.reason, EndReason::Hangup);
                assert_eq!(end.duration, Some(31));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_initiate_has_no_call_id() {
        let msg = SignalingMessage::Initiate(InitiateCall {
            callee_id: "bob".to_string(),
            call_type: CallType::Audio,
            conversation_id: Some("conv-1".to_string()),
            request_id: Some("r-1".to_string()),
        });
        assert!(msg.call_id().is_none());
        assert!(msg.to_frame().unwrap().contains("\"requestId\":\"r-1\""));
        assert_eq!(msg.name(), "initiate");
    }
}
