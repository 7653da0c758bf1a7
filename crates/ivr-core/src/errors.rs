//! Error types for the IVR core

use crate::event::SlotState;
use rvoip_script_core::{Diagnostic, ScriptError};
use thiserror::Error;

/// Result type for IVR operations
pub type Result<T> = std::result::Result<T, IvrError>;

/// Errors surfaced by the driver, timeslots and workers
///
/// Script faults inside a running call never show up here; the interpreter
/// routes them to the script's `^error` handler or ends the call.
#[derive(Debug, Error)]
pub enum IvrError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Script reload refused, the previous image stays active
    #[error("Script compile failed with {} error(s)", .0.len())]
    Compile(Vec<Diagnostic>),

    /// Script-level failure outside a running call (e.g. seeding symbols)
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// Entry point missing from the current image
    #[error("Script entry not found: {entry}")]
    ScriptNotFound { entry: String },

    /// Every candidate timeslot is busy or offline
    #[error("No free timeslot in {group}")]
    NoFreeSlot { group: String },

    /// Group is already carrying its maximum number of calls
    #[error("Group {group} is at its limit of {limit} calls")]
    GroupLimit { group: String, limit: usize },

    /// Unknown board, span, group or registration
    #[error("Unknown segment: {name}")]
    UnknownSegment { name: String },

    /// Timeslot id out of range
    #[error("Unknown timeslot: {id}")]
    UnknownSlot { id: usize },

    /// Event not valid in the slot's current state
    #[error("Timeslot {slot} rejected {event} while {state}")]
    Rejected {
        slot: usize,
        event: String,
        state: SlotState,
    },

    /// Message queue is at capacity
    #[error("Message queue is full")]
    QueueFull,

    /// Message dispatcher has stopped
    #[error("Message queue is closed")]
    QueueClosed,

    /// Call-detail sink failure
    #[error("Call detail write failed: {message}")]
    CallDetail { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IvrError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn unknown_segment(name: impl Into<String>) -> Self {
        Self::UnknownSegment { name: name.into() }
    }

    pub fn call_detail(message: impl Into<String>) -> Self {
        Self::CallDetail {
            message: message.into(),
        }
    }

    /// True for failures the caller should treat as "reject this call"
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::NoFreeSlot { .. } | Self::GroupLimit { .. })
    }
}
