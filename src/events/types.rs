//! Call event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

use crate::call::{CallId, CallStatus, CallType, Counterpart, EndReason};

/// Call event enumeration
///
/// All events are tagged with their event name for serialization:
/// ```json
/// {
///   "event": "call.ended",
///   "data": { "call_id": "42", "reason": "hangup", "duration_secs": 12 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum CallEvent {
    /// Session status changed
    #[serde(rename = "call.state_changed")]
    StateChanged {
        /// Bound call id, if any
        call_id: Option<CallId>,
        /// New status
        status: CallStatus,
    },

    /// Incoming call is ringing
    #[serde(rename = "call.incoming")]
    Incoming {
        call_id: CallId,
        caller: Counterpart,
        call_type: CallType,
    },

    /// Media path is up
    #[serde(rename = "call.connected")]
    Connected {
        call_id: Option<CallId>,
    },

    /// Session reached a terminal status and was torn down
    #[serde(rename = "call.ended")]
    Ended {
        call_id: Option<CallId>,
        reason: EndReason,
        duration_secs: u64,
    },

    /// Setup or device error shown to the user
    #[serde(rename = "call.error")]
    Error {
        message: String,
    },
}

impl CallEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "call.state_changed",
            Self::Incoming { .. } => "call.incoming",
            Self::Connected { .. } => "call.connected",
            Self::Ended { .. } => "call.ended",
            Self::Error { .. } => "call.error",
        }
    }

    /// Check if event name matches a topic pattern
    ///
    /// Supports `*`, `call.*` style prefixes and exact names.
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if topic.ends_with(".*") {
            let prefix = topic.trim_end_matches(".*");
            event_name.starts_with(prefix)
        } else {
            event_name == topic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name() {
        let event = CallEvent::StateChanged {
            call_id: None,
            status: CallStatus::OutgoingRinging,
        };
        assert_eq!(event.event_name(), "call.state_changed");

        let event = CallEvent::Ended {
            call_id: Some(CallId::from(42)),
            reason: EndReason::Declined,
            duration_secs: 0,
        };
        assert_eq!(event.event_name(), "call.ended");
    }

    #[test]
    fn test_matches_topic() {
        let event = CallEvent::Connected {
            call_id: Some(CallId::from(1)),
        };

        assert!(event.matches_topic("*"));
        assert!(event.matches_topic("call.*"));
        assert!(event.matches_topic("call.connected"));
        assert!(!event.matches_topic("call.ended"));
        assert!(!event.matches_topic("media.*"));
    }

    #[test]
    fn test_serialization() {
        let event = CallEvent::Ended {
            call_id: Some(CallId::from(42)),
            reason: EndReason::Failed,
            duration_secs: 17,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("call.ended"));
        assert!(json.contains("\"failed\""));

        let deserialized: CallEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }
}
