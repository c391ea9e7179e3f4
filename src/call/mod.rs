//! Call session core
//!
//! - [`types`]: session record and the published state snapshot
//! - [`controller`]: the state machine
//! - [`service`]: actor task and the presentation-facing handle
//! - [`timer`]: call duration counter

pub mod controller;
pub mod service;
pub mod timer;
pub mod types;

pub use controller::{CallController, ControllerInbox};
pub use service::{CallHandle, CallService};
pub use timer::{format_duration, DurationTimer};
pub use types::{
    CallId, CallRole, CallSession, CallState, CallStatus, CallType, Counterpart, EndReason,
    EndedCall,
};
