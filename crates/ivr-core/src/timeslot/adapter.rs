//! Signaling adapter seam
//!
//! A concrete telephony back end (SIP, ISDN, analog board) plugs in here.
//! The timeslot calls it while holding the slot lock, so implementations
//! must not block.

use crate::event::SlotId;
use rvoip_script_core::{HostAction, Mask};
use std::sync::Arc;

pub trait SignalingAdapter: Send {
    /// Prepare hardware for the running script's accumulated resource mask.
    /// Called with `0` when a call finishes.
    fn arm(&mut self, _mask: Mask) {}

    /// The remote side went away; free remote resources
    fn disconnect(&mut self) {}

    /// End the call from this side
    fn hangup(&mut self) {}

    /// Application commands beyond `sleep`, `hangup` and `log`.
    /// Returns `None` for commands this adapter does not provide.
    fn execute(&mut self, _command: &str, _args: &[String]) -> Option<HostAction> {
        None
    }
}

/// Builds one adapter per timeslot at driver startup
pub type AdapterFactory = Arc<dyn Fn(SlotId) -> Box<dyn SignalingAdapter> + Send + Sync>;

/// Adapter with no signaling behind it
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAdapter;

impl SignalingAdapter for NullAdapter {}

pub fn null_factory() -> AdapterFactory {
    Arc::new(|_| Box::new(NullAdapter))
}
