//! Timeslot states, events and post outcomes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a timeslot in the driver's fixed pool
pub type SlotId = usize;

/// Call-session state of a timeslot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotState {
    /// Suspended, not in the available list
    Offline,
    /// Available for allocation
    Idle,
    /// Running a script for an active call
    Scripting,
    /// Call ended, waiting to return to the pool
    Releasing,
}

impl SlotState {
    /// Single-character code for the status table
    pub fn code(&self) -> char {
        match self {
            SlotState::Offline => '-',
            SlotState::Idle => 'i',
            SlotState::Scripting => 's',
            SlotState::Releasing => 'r',
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SlotState::Offline => "offline",
            SlotState::Idle => "idle",
            SlotState::Scripting => "scripting",
            SlotState::Releasing => "releasing",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            SlotState::Offline => 0,
            SlotState::Idle => 1,
            SlotState::Scripting => 2,
            SlotState::Releasing => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => SlotState::Idle,
            2 => SlotState::Scripting,
            3 => SlotState::Releasing,
            _ => SlotState::Offline,
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Events posted to a timeslot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Return an offline slot to service
    Enable,
    /// Take the slot out of service, ending any active call
    Disable,
    /// Timer expiry: re-step the script or finish a release
    Timeout,
    /// Remote side dropped the call
    Drop,
    /// Remote side hung up
    Hangup,
    /// Return a releasing slot to the pool
    Release,
    /// Process shutdown, ending any active call
    Shutdown,
    /// Driver-specific event delivered to the script's `^name` handler
    Signal(String),
}

impl Event {
    pub fn name(&self) -> &str {
        match self {
            Event::Enable => "enable",
            Event::Disable => "disable",
            Event::Timeout => "timeout",
            Event::Drop => "drop",
            Event::Hangup => "hangup",
            Event::Release => "release",
            Event::Shutdown => "shutdown",
            Event::Signal(name) => name,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Signal(name) => write!(f, "signal ^{}", name),
            other => f.write_str(other.name()),
        }
    }
}

/// Proof that a slot went back to the idle pool
///
/// Only the release path creates one. Once it exists the slot belongs to
/// the pool; the caller must not touch the call it used to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct ReleaseToken {
    slot: SlotId,
    sequence: u64,
}

impl ReleaseToken {
    pub(crate) fn new(slot: SlotId, sequence: u64) -> Self {
        Self { slot, sequence }
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Sequence of the call that was released
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Result of posting an event to a timeslot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum PostOutcome {
    /// Event processed, the slot stays with its current owner
    Handled,
    /// Slot returned to the idle pool
    Released(ReleaseToken),
    /// Event not valid in the slot's state; nothing changed
    Rejected,
}

impl PostOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, PostOutcome::Rejected)
    }

    pub fn is_released(&self) -> bool {
        matches!(self, PostOutcome::Released(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes_round_trip() {
        for state in [
            SlotState::Offline,
            SlotState::Idle,
            SlotState::Scripting,
            SlotState::Releasing,
        ] {
            assert_eq!(SlotState::from_u8(state.to_u8()), state);
        }
        assert_eq!(SlotState::Scripting.code(), 's');
    }

    #[test]
    fn test_event_display() {
        assert_eq!(Event::Signal("digit".into()).to_string(), "signal ^digit");
        assert_eq!(Event::Release.to_string(), "release");
    }
}
