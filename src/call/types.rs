//! Call data model
//!
//! Session records and the state snapshot published to the presentation
//! layer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

use super::timer::format_duration;

/// Opaque call identifier assigned by the signaling backend
///
/// Serialized as a string. Backends that send integer ids are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CallId(String);

impl<'de> Deserialize<'de> for CallId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CallIdVisitor;

        impl<'de> Visitor<'de> for CallIdVisitor {
            type Value = CallId;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a call id string or integer")
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<CallId, E>
            where
                E: de::Error,
            {
                Ok(CallId::new(value))
            }

            fn visit_string<E>(self, value: String) -> std::result::Result<CallId, E>
            where
                E: de::Error,
            {
                Ok(CallId(value))
            }

            fn visit_u64<E>(self, value: u64) -> std::result::Result<CallId, E>
            where
                E: de::Error,
            {
                Ok(CallId::from(value))
            }

            fn visit_i64<E>(self, value: i64) -> std::result::Result<CallId, E>
            where
                E: de::Error,
            {
                Ok(CallId(value.to_string()))
            }
        }

        deserializer.deserialize_any(CallIdVisitor)
    }
}

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for CallId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Media kind of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    #[default]
    Audio,
    Video,
}

impl CallType {
    pub fn has_video(&self) -> bool {
        matches!(self, CallType::Video)
    }
}

impl std::fmt::Display for CallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallType::Audio => write!(f, "audio"),
            CallType::Video => write!(f, "video"),
        }
    }
}

/// Which side of the call this controller is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallRole {
    Caller,
    Callee,
}

/// The other party of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counterpart {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Counterpart {
    /// Counterpart known only by id (outgoing calls before the remote answers)
    pub fn from_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            avatar_url: None,
        }
    }

    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: Some(display_name.into()),
            avatar_url: None,
        }
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }
}

/// Call state machine status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    #[default]
    Idle,
    OutgoingRinging,
    IncomingRinging,
    Connecting,
    Active,
    Ended,
    Failed,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Ended | CallStatus::Failed)
    }

    pub fn is_ringing(&self) -> bool {
        matches!(self, CallStatus::OutgoingRinging | CallStatus::IncomingRinging)
    }

    /// States bounded by the setup timeout
    pub fn is_setup(&self) -> bool {
        self.is_ringing() || *self == CallStatus::Connecting
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallStatus::Idle => write!(f, "idle"),
            CallStatus::OutgoingRinging => write!(f, "outgoing_ringing"),
            CallStatus::IncomingRinging => write!(f, "incoming_ringing"),
            CallStatus::Connecting => write!(f, "connecting"),
            CallStatus::Active => write!(f, "active"),
            CallStatus::Ended => write!(f, "ended"),
            CallStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Why a call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    /// Either side hung up normally
    Hangup,
    /// Callee declined
    Declined,
    /// Callee was already in a call
    Busy,
    /// Negotiation or connectivity failure
    Failed,
    /// Setup did not complete in time
    Timeout,
    /// Incoming call was never answered
    Missed,
    /// Callee is not reachable
    Unavailable,
    #[serde(other)]
    Other,
}

impl EndReason {
    /// Terminal status a session ending for this reason settles in
    pub fn terminal_status(&self) -> CallStatus {
        match self {
            EndReason::Failed => CallStatus::Failed,
            _ => CallStatus::Ended,
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndReason::Hangup => "hangup",
            EndReason::Declined => "declined",
            EndReason::Busy => "busy",
            EndReason::Failed => "failed",
            EndReason::Timeout => "timeout",
            EndReason::Missed => "missed",
            EndReason::Unavailable => "unavailable",
            EndReason::Other => "other",
        };
        f.write_str(s)
    }
}

/// Authoritative record of one call attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    /// Backend-assigned id, absent until the initiate is acknowledged
    pub id: Option<CallId>,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub role: CallRole,
    pub counterpart: Counterpart,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub status: CallStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    pub duration_secs: u64,
}

impl CallSession {
    /// Outgoing call waiting for the backend to assign an id
    pub fn outgoing(
        counterpart: Counterpart,
        call_type: CallType,
        conversation_id: Option<String>,
    ) -> Self {
        Self {
            id: None,
            call_type,
            role: CallRole::Caller,
            counterpart,
            conversation_id,
            status: CallStatus::OutgoingRinging,
            created_at: Utc::now(),
            connected_at: None,
            duration_secs: 0,
        }
    }

    /// Incoming call materialized from an `incomingCall` event
    pub fn incoming(
        id: CallId,
        caller: Counterpart,
        call_type: CallType,
        conversation_id: Option<String>,
    ) -> Self {
        Self {
            id: Some(id),
            call_type,
            role: CallRole::Callee,
            counterpart: caller,
            conversation_id,
            status: CallStatus::IncomingRinging,
            created_at: Utc::now(),
            connected_at: None,
            duration_secs: 0,
        }
    }

    pub fn is_caller(&self) -> bool {
        self.role == CallRole::Caller
    }

    /// Whether `id` is the id this session is bound to
    pub fn is_bound_to(&self, id: &CallId) -> bool {
        self.id.as_ref() == Some(id)
    }
}

/// Summary of the last call that reached a terminal status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndedCall {
    pub call_id: Option<CallId>,
    pub counterpart: Counterpart,
    pub status: CallStatus,
    pub reason: EndReason,
    pub duration_secs: u64,
}

/// Snapshot consumed by the presentation layer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallState {
    /// Outgoing or answered call
    pub active_call: Option<CallSession>,
    /// Incoming call that has not been answered yet
    pub incoming_call: Option<CallSession>,
    pub is_connecting: bool,
    /// Human-readable setup error
    pub error: Option<String>,
    pub call_duration_secs: u64,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub is_speaker_on: bool,
    pub last_ended: Option<EndedCall>,
}

impl CallState {
    /// Status of the current session, `Idle` when there is none
    pub fn status(&self) -> CallStatus {
        self.active_call
            .as_ref()
            .or(self.incoming_call.as_ref())
            .map(|c| c.status)
            .unwrap_or(CallStatus::Idle)
    }

    /// Call duration as `MM:SS`
    pub fn formatted_duration(&self) -> String {
        format_duration(self.call_duration_secs)
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.active_call
            .as_ref()
            .or(self.incoming_call.as_ref())
            .and_then(|c| c.id.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_reason_serde() {
        let json = serde_json::to_string(&EndReason::Declined).unwrap();
        assert_eq!(json, "\"declined\"");

        let reason: EndReason = serde_json::from_str("\"network_lost\"").unwrap();
        assert_eq!(reason, EndReason::Other);
    }

    #[test]
    fn test_call_id_accepts_string_or_integer() {
        let id: CallId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(id, CallId::from(42));

        let id: CallId = serde_json::from_str("42").unwrap();
        assert_eq!(id.as_str(), "42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"42\"");

        assert!(serde_json::from_str::<CallId>("true").is_err());
    }

    #[test]
    fn test_terminal_status() {
        assert_eq!(EndReason::Failed.terminal_status(), CallStatus::Failed);
        assert_eq!(EndReason::Declined.terminal_status(), CallStatus::Ended);
        assert!(CallStatus::Failed.is_terminal());
        assert!(!CallStatus::Active.is_terminal());
        assert!(CallStatus::Connecting.is_setup());
        assert!(!CallStatus::Active.is_setup());
    }

    #[test]
    fn test_session_binding() {
        let mut session = CallSession::outgoing(Counterpart::from_id("bob"), CallType::Video, None);
        assert!(session.is_caller());
        assert!(!session.is_bound_to(&CallId::from(42)));

        session.id = Some(CallId::from(42));
        assert!(session.is_bound_to(&CallId::from("42")));
        assert!(!session.is_bound_to(&CallId::from(43)));
    }

    #[test]
    fn test_state_status() {
        let mut state = CallState::default();
        assert_eq!(state.status(), CallStatus::Idle);

        state.incoming_call = Some(CallSession::incoming(
            CallId::from(7),
            Counterpart::new("alice", "Alice"),
            CallType::Audio,
            None,
        ));
        assert_eq!(state.status(), CallStatus::IncomingRinging);
        assert_eq!(state.call_id(), Some(&CallId::from(7)));

        state.call_duration_secs = 75;
        assert_eq!(state.formatted_duration(), "01:15");
    }
}
