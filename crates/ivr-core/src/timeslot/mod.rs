//! Call-processing timeslots
//!
//! A [`Timeslot`] is one slot of the driver's fixed pool. It owns an
//! [`Interpreter`] and runs the call-session state machine:
//!
//! ```text
//!            ENABLE                allocate()
//!  OFFLINE ----------> IDLE ----------------------> SCRIPTING --+ TIMEOUT (re-step)
//!     ^      DISABLE    ^                            |    ^-----+
//!     +-----------------+                            | exit / DROP / HANGUP
//!     |                 |        RELEASE/TIMEOUT     v
//!     +--- DISABLE -----+------------------------ RELEASING
//! ```
//!
//! Every event runs under the slot's own lock, so one slot never processes
//! two events at once. [`Timeslot::post`] reports the result explicitly:
//! [`PostOutcome::Released`] carries the token proving the slot went back to
//! the idle pool, and [`PostOutcome::Rejected`] means the event was invalid
//! for the state and nothing changed.

mod adapter;
mod host;
mod state;

pub use adapter::{null_factory, AdapterFactory, NullAdapter, SignalingAdapter};

use crate::cdr::CdrKind;
use crate::driver::Shared;
use crate::errors::{IvrError, Result};
use crate::event::{Event, PostOutcome, ReleaseToken, SlotId, SlotState};
use chrono::{DateTime, Utc};
use host::SlotHost;
use parking_lot::Mutex;
use rvoip_script_core::{ExitReason, Interpreter, Mask};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Parameters of a new call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSetup {
    /// Call identity; generated when absent
    pub cid: Option<String>,
    pub source: String,
    pub target: String,
    /// Entry point; resolved by the driver when absent
    pub script: Option<String>,
    /// Scheduler event name (default `incoming`)
    pub event: Option<String>,
    /// Opaque data copied into the call-detail records
    pub payload: Option<String>,
}

impl CallSetup {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_cid(mut self, cid: impl Into<String>) -> Self {
        self.cid = Some(cid.into());
        self
    }
}

/// The call a slot is carrying
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    pub cid: String,
    pub sequence: u64,
    pub source: String,
    pub target: String,
    pub script: String,
    pub payload: Option<String>,
    pub started: DateTime<Utc>,
    /// Why the call ended, once it has
    pub reason: String,
    started_at: Instant,
}

impl CallInfo {
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

struct SlotInner {
    state: SlotState,
    interp: Interpreter,
    adapter: Box<dyn SignalingAdapter>,
    call: Option<CallInfo>,
    armed_mask: Mask,
}

pub struct Timeslot {
    id: SlotId,
    shared: Arc<Shared>,
    inner: Mutex<SlotInner>,
    /// Lock-free mirror of `inner.state` for the status table
    state: AtomicU8,
    sequence: AtomicU64,
}

impl std::fmt::Debug for Timeslot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeslot")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("sequence", &self.sequence())
            .finish()
    }
}

impl Timeslot {
    pub(crate) fn new(id: SlotId, shared: Arc<Shared>, adapter: Box<dyn SignalingAdapter>) -> Self {
        let interp = Interpreter::new(shared.engine.interpreter());
        Self {
            id,
            shared,
            inner: Mutex::new(SlotInner {
                state: SlotState::Offline,
                interp,
                adapter,
                call: None,
                armed_mask: 0,
            }),
            state: AtomicU8::new(SlotState::Offline.to_u8()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Current state, read without the slot lock
    pub fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Sequence of the most recent allocation
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Pending timer as an epoch offset in milliseconds
    pub fn expiry(&self) -> Option<u64> {
        self.shared.expiries[self.id].get()
    }

    pub fn call(&self) -> Option<CallInfo> {
        self.inner.lock().call.clone()
    }

    /// Value of a script symbol in the running call
    pub fn symbol(&self, name: &str) -> Option<String> {
        self.inner.lock().interp.symbol(name).map(str::to_string)
    }

    /// Request a `TIMEOUT` after `after`
    pub fn arm(&self, after: Duration) {
        let at = self.shared.clock.deadline(after);
        self.shared.expiries[self.id].set(at);
        self.shared.clock.wake();
    }

    pub fn disarm(&self) {
        self.shared.expiries[self.id].clear();
    }

    /// Deliver `TIMEOUT` if the timer is due at `now_ms`
    pub fn expire(&self, now_ms: u64) -> Option<PostOutcome> {
        if self.shared.expiries[self.id].take_due(now_ms) {
            Some(self.post(Event::Timeout))
        } else {
            None
        }
    }

    /// Process one event under the slot lock
    pub fn post(&self, event: Event) -> PostOutcome {
        let mut inner = self.inner.lock();
        let before = inner.state;
        let outcome = self.dispatch(&mut inner, &event);
        match outcome {
            PostOutcome::Rejected => {
                debug!("Slot {} rejected {} while {}", self.id, event, before)
            }
            _ if inner.state != before => {
                debug!("Slot {} {} -> {} on {}", self.id, before, inner.state, event)
            }
            _ => {}
        }
        outcome
    }

    /// Start a call on an idle slot, normally one taken with
    /// [`Driver::request`](crate::Driver::request). Returns the new call's
    /// sequence number.
    pub fn allocate(&self, setup: CallSetup) -> Result<u64> {
        let mut inner = self.inner.lock();
        if inner.state != SlotState::Idle {
            return Err(IvrError::Rejected {
                slot: self.id,
                event: "allocate".to_string(),
                state: inner.state,
            });
        }

        let scripts = self.shared.scripts.load_full();
        let entry = setup.script.unwrap_or_else(|| self.shared.entry.clone());
        if !inner.interp.attach(scripts.image().clone(), Some(entry.as_str())) {
            return Err(IvrError::ScriptNotFound { entry });
        }

        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let cid = setup.cid.unwrap_or_else(|| Uuid::new_v4().to_string());
        let (sequence_text, slot_text) = (sequence.to_string(), self.id.to_string());
        let seeded = [
            ("cid", cid.as_str()),
            ("source", setup.source.as_str()),
            ("target", setup.target.as_str()),
            ("script", entry.as_str()),
            ("sequence", sequence_text.as_str()),
            ("slot", slot_text.as_str()),
        ]
        .into_iter()
        .try_for_each(|(name, value)| inner.interp.set_symbol(name, value));
        if let Err(e) = seeded {
            inner.interp.detach();
            return Err(e.into());
        }

        inner.call = Some(CallInfo {
            cid: cid.clone(),
            sequence,
            source: setup.source,
            target: setup.target,
            script: entry,
            payload: setup.payload,
            started: Utc::now(),
            reason: String::new(),
            started_at: Instant::now(),
        });
        // no-op when the slot came from Driver::request
        self.shared.idle.remove(self.id);
        self.shared.calls.insert(cid.clone(), self.id);
        self.shared.segments.call_started(self.id);
        // counted in the segment stats from here on
        self.shared.reservations.release(self.id);
        self.set_state(&mut inner, SlotState::Scripting);
        self.record(&inner, CdrKind::Start);
        info!("Slot {} started call {} (sequence {})", self.id, cid, sequence);

        self.run(&mut inner);
        Ok(sequence)
    }

    fn set_state(&self, inner: &mut SlotInner, state: SlotState) {
        inner.state = state;
        self.state.store(state.to_u8(), Ordering::Release);
    }

    /// Step the script until it suspends, exits or uses up its tick
    fn run(&self, inner: &mut SlotInner) {
        let engine = &self.shared.engine;
        for _ in 0..engine.steps_per_tick {
            let mut host = SlotHost::new(self.id, inner.adapter.as_mut());
            let proceed = inner.interp.step(&mut host);
            let wake = host.wake();

            if !inner.interp.is_running() {
                let reason = match inner.interp.exit_reason() {
                    Some(ExitReason::Host(reason)) => reason.clone(),
                    Some(ExitReason::Error(text)) => format!("error: {}", text),
                    _ => "exit".to_string(),
                };
                inner.adapter.hangup();
                self.begin_release(inner, reason);
                return;
            }

            let mask = inner.interp.mask();
            if mask != inner.armed_mask {
                debug!("Slot {} re-arming resources {:#x}", self.id, mask);
                inner.adapter.arm(mask);
                inner.armed_mask = mask;
                continue;
            }

            if !proceed {
                match wake {
                    Some(after) => self.arm(after),
                    None => self.disarm(),
                }
                return;
            }
        }
        self.arm(engine.step_interval());
    }

    fn begin_release(&self, inner: &mut SlotInner, reason: String) {
        if let Some(call) = inner.call.as_mut() {
            call.reason = reason;
        }
        self.set_state(inner, SlotState::Releasing);
        self.arm(self.shared.engine.release_delay());
    }

    /// End the call and return the slot to the idle pool
    fn release_to_pool(&self, inner: &mut SlotInner) -> ReleaseToken {
        self.finish(inner, SlotState::Idle);
        ReleaseToken::new(self.id, self.sequence())
    }

    /// End the call and move to `next` (IDLE returns the slot to the pool)
    fn finish(&self, inner: &mut SlotInner, next: SlotState) {
        self.disarm();
        if inner.call.is_some() {
            self.record(inner, CdrKind::Stop);
        }
        if let Some(call) = inner.call.take() {
            self.shared.calls.remove(&call.cid);
            self.shared.segments.call_ended(self.id);
            info!(
                "Slot {} ended call {} after {} ms: {}",
                self.id,
                call.cid,
                call.elapsed().as_millis(),
                call.reason
            );
        }
        inner.interp.detach();
        if inner.armed_mask != 0 {
            inner.adapter.arm(0);
            inner.armed_mask = 0;
        }
        self.set_state(inner, next);
        if next == SlotState::Idle && !self.shared.idle.insert(self.id) {
            warn!("Slot {} was already in the idle pool", self.id);
        }
    }

    fn record(&self, inner: &SlotInner, kind: CdrKind) {
        let Some(call) = inner.call.as_ref() else {
            return;
        };
        let mut record = self.shared.cdr.acquire();
        record.kind = kind;
        record.slot = self.id;
        record.sequence = call.sequence;
        record.cid.push_str(&call.cid);
        record.started = call.started;
        record.source.push_str(&call.source);
        record.target.push_str(&call.target);
        record.script.push_str(&call.script);
        record.payload = call.payload.clone();
        if kind == CdrKind::Stop {
            record.duration_ms = Some(call.elapsed().as_millis() as u64);
            record.reason.push_str(&call.reason);
        }
        self.shared.cdr.submit(record);
    }
}
