//! Timeslot pool owner
//!
//! The [`Driver`] owns the fixed timeslot array, the segment hierarchy and
//! the current script generation. It is an ordinary value shared behind an
//! `Arc`; several drivers can coexist in one process (tests do this).
//!
//! ```no_run
//! use rvoip_ivr_core::prelude::*;
//! use std::sync::Arc;
//!
//! # fn example() -> rvoip_ivr_core::Result<()> {
//! let source = Arc::new(MemorySource::with_script("main.scr", "@main\n  log hello\n  exit\n"));
//! let driver = DriverBuilder::new(IvrConfig::default()).source(source).build()?;
//!
//! let slot = driver.start_call(Some("default"), CallSetup::new("1000", "2000"))?;
//! println!("call on slot {} is {}", slot.id(), slot.state());
//! # Ok(())
//! # }
//! ```

use crate::cdr::{CdrPool, CdrQueue};
use crate::config::{AllocationPolicy, EngineConfig, IvrConfig};
use crate::errors::{IvrError, Result};
use crate::event::{Event, PostOutcome, ReleaseToken, SlotId, SlotState};
use crate::pool::{IdlePool, Reservations};
use crate::scripts::{FileSource, LoadedScripts, ScriptSource, SLOT_COMMANDS};
use crate::segment::{Segment, SegmentKind, SegmentTable};
use crate::timeslot::{null_factory, AdapterFactory, CallSetup, Timeslot};
use crate::timer::{Clock, Expiry};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use rvoip_script_core::{Compiler, Mask};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Event name used for scheduler lookups when a call does not give one
pub const DEFAULT_EVENT: &str = "incoming";

/// State every timeslot reads from
pub(crate) struct Shared {
    pub(crate) engine: EngineConfig,
    pub(crate) entry: String,
    pub(crate) scripts: ArcSwap<LoadedScripts>,
    pub(crate) segments: SegmentTable,
    pub(crate) idle: IdlePool,
    pub(crate) reservations: Reservations,
    pub(crate) cdr: Arc<CdrPool>,
    /// Active calls by cid
    pub(crate) calls: DashMap<String, SlotId>,
    pub(crate) clock: Clock,
    pub(crate) expiries: Vec<Expiry>,
}

/// One row of the status table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub slot: SlotId,
    pub code: char,
    pub state: SlotState,
    pub sequence: u64,
}

/// Builder for [`Driver`]
pub struct DriverBuilder {
    config: IvrConfig,
    source: Option<Arc<dyn ScriptSource>>,
    adapters: AdapterFactory,
    commands: Vec<(String, Mask)>,
}

impl DriverBuilder {
    pub fn new(config: IvrConfig) -> Self {
        Self {
            config,
            source: None,
            adapters: null_factory(),
            commands: Vec::new(),
        }
    }

    /// Script source; defaults to the files named in `[scripts]`
    pub fn source(mut self, source: Arc<dyn ScriptSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Signaling adapter for each slot; defaults to [`crate::NullAdapter`]
    pub fn adapters(mut self, factory: AdapterFactory) -> Self {
        self.adapters = factory;
        self
    }

    /// Register an adapter-provided script command and its resource mask
    pub fn command(mut self, name: impl Into<String>, mask: Mask) -> Self {
        self.commands.push((name.into(), mask));
        self
    }

    /// Validate the configuration, compile the scripts and bring every slot
    /// online. Fails if the initial compile fails.
    pub fn build(self) -> Result<Arc<Driver>> {
        self.config.validate()?;
        let segments = SegmentTable::from_config(&self.config)?;
        let slot_count = segments.slot_count();

        let mut compiler = Compiler::new();
        for (name, mask) in SLOT_COMMANDS {
            compiler.register(*name, *mask);
        }
        for (name, mask) in &self.commands {
            compiler.register(name.clone(), *mask);
        }

        let source = self
            .source
            .unwrap_or_else(|| Arc::new(FileSource::from_config(&self.config.scripts)));
        let scripts = LoadedScripts::compile(&compiler, source.as_ref(), 1).map_err(|e| {
            error!("Initial script load failed: {}", e);
            e
        })?;

        let (cdr, cdr_queue) = CdrPool::new(self.config.workers.cdr_pool_size);
        let shared = Arc::new(Shared {
            engine: self.config.engine.clone(),
            entry: self.config.scripts.entry.clone(),
            scripts: ArcSwap::from_pointee(scripts),
            segments,
            idle: IdlePool::default(),
            reservations: Reservations::default(),
            cdr,
            calls: DashMap::new(),
            clock: Clock::new(),
            expiries: (0..slot_count).map(|_| Expiry::default()).collect(),
        });

        let slots: Vec<Arc<Timeslot>> = (0..slot_count)
            .map(|id| Arc::new(Timeslot::new(id, shared.clone(), (self.adapters)(id))))
            .collect();
        for slot in &slots {
            let _ = slot.post(Event::Enable);
        }
        info!("Driver started with {} timeslots", slot_count);

        Ok(Arc::new(Driver {
            shared,
            slots,
            policy: self.config.allocation.policy,
            config: self.config,
            compiler,
            source,
            cdr_queue: Mutex::new(Some(cdr_queue)),
            reload_lock: Mutex::new(()),
        }))
    }
}

pub struct Driver {
    shared: Arc<Shared>,
    slots: Vec<Arc<Timeslot>>,
    policy: AllocationPolicy,
    config: IvrConfig,
    compiler: Compiler,
    source: Arc<dyn ScriptSource>,
    cdr_queue: Mutex<Option<CdrQueue>>,
    reload_lock: Mutex<()>,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("slots", &self.slots.len())
            .field("idle", &self.shared.idle.len())
            .field("generation", &self.generation())
            .finish()
    }
}

impl Driver {
    pub fn config(&self) -> &IvrConfig {
        &self.config
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[Arc<Timeslot>] {
        &self.slots
    }

    /// Slot by id, whatever its state
    pub fn access(&self, id: SlotId) -> Option<Arc<Timeslot>> {
        self.slots.get(id).cloned()
    }

    /// Slot carrying the call with this cid
    pub fn find_call(&self, cid: &str) -> Option<Arc<Timeslot>> {
        let id = *self.shared.calls.get(cid)?;
        self.access(id)
    }

    pub fn active_calls(&self) -> usize {
        self.shared.calls.len()
    }

    pub fn idle_count(&self) -> usize {
        self.shared.idle.len()
    }

    /// Take an idle slot from `group` (any group when `None`) according to
    /// the allocation policy. The slot stays IDLE until
    /// [`Timeslot::allocate`] is called; hand it back with
    /// [`Driver::restore`] if the call is abandoned.
    ///
    /// A group's limit counts its active calls plus the slots requested
    /// from it that have not been allocated yet.
    pub fn request(&self, group: Option<&str>) -> Result<Arc<Timeslot>> {
        let id = match group {
            Some(name) => {
                let group = self
                    .group(name)
                    .ok_or_else(|| IvrError::unknown_segment(name))?;
                self.shared.reservations.reserve(name, |reserved| {
                    if let Some(limit) = group.limit() {
                        if group.stats().current() as usize + reserved >= limit {
                            return Err(IvrError::GroupLimit {
                                group: name.to_string(),
                                limit,
                            });
                        }
                    }
                    self.take_idle(Some(group.slots()), name)
                })?
            }
            None => self.take_idle(None, "*")?,
        };
        debug!("Requested slot {} from {}", id, group.unwrap_or("*"));
        self.access(id).ok_or(IvrError::UnknownSlot { id })
    }

    fn take_idle(&self, members: Option<&[SlotId]>, label: &str) -> Result<SlotId> {
        self.shared
            .idle
            .take(members, self.policy)
            .ok_or_else(|| IvrError::NoFreeSlot {
                group: label.to_string(),
            })
    }

    /// Put a requested but unused slot back in the idle pool
    pub fn restore(&self, slot: &Timeslot) -> bool {
        if slot.state() != SlotState::Idle {
            return false;
        }
        self.shared.reservations.release(slot.id());
        self.shared.idle.insert(slot.id())
    }

    /// Slots requested from `group` that do not carry a call yet
    pub fn reserved(&self, group: &str) -> usize {
        self.shared.reservations.count(group)
    }

    /// Request a slot and start a call on it
    pub fn start_call(&self, group: Option<&str>, mut setup: CallSetup) -> Result<Arc<Timeslot>> {
        let slot = self.request(group)?;
        if setup.script.is_none() {
            let group = group
                .map(str::to_string)
                .or_else(|| self.shared.segments.group_of(slot.id()).map(|g| g.name().to_string()));
            let event = setup.event.as_deref().unwrap_or(DEFAULT_EVENT);
            setup.script = Some(self.select_script(group.as_deref(), event));
        }
        match slot.allocate(setup) {
            Ok(_) => Ok(slot),
            Err(e) => {
                self.restore(&slot);
                Err(e)
            }
        }
    }

    /// Entry point for a new call: a matching schedule rule whose script
    /// exists, else the group's script, else the default entry
    pub fn select_script(&self, group: Option<&str>, event: &str) -> String {
        let scripts = self.shared.scripts.load();
        let now = chrono::Local::now().naive_local();
        if let Some(script) = scripts
            .scheduler()
            .select(group.unwrap_or("*"), event, now)
        {
            if scripts.image().index_of(script).is_some() {
                return script.to_string();
            }
            warn!("Schedule selected {} which is not in the current image", script);
        }
        group
            .and_then(|name| self.group(name))
            .and_then(|g| g.script())
            .unwrap_or(self.shared.entry.as_str())
            .to_string()
    }

    pub fn post(&self, id: SlotId, event: Event) -> Result<PostOutcome> {
        let slot = self.slots.get(id).ok_or(IvrError::UnknownSlot { id })?;
        Ok(slot.post(event))
    }

    /// Return a RELEASING slot to the pool
    pub fn release(&self, id: SlotId) -> Result<ReleaseToken> {
        let slot = self.slots.get(id).ok_or(IvrError::UnknownSlot { id })?;
        match slot.post(Event::Release) {
            PostOutcome::Released(token) => Ok(token),
            PostOutcome::Handled | PostOutcome::Rejected => Err(IvrError::Rejected {
                slot: id,
                event: Event::Release.to_string(),
                state: slot.state(),
            }),
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.shared.segments.iter()
    }

    pub fn segment(&self, kind: SegmentKind, name: &str) -> Option<&Segment> {
        self.shared.segments.find(kind, name)
    }

    pub fn group(&self, name: &str) -> Option<&Segment> {
        self.segment(SegmentKind::Group, name)
    }

    pub fn span(&self, name: &str) -> Option<&Segment> {
        self.segment(SegmentKind::Span, name)
    }

    pub fn board(&self, name: &str) -> Option<&Segment> {
        self.segment(SegmentKind::Board, name)
    }

    /// Take every slot of a segment offline, ending active calls. Slots
    /// that refuse (already offline) are reported after the rest are done.
    pub fn suspend(&self, kind: SegmentKind, name: &str) -> Result<()> {
        self.post_segment(kind, name, Event::Disable)
    }

    /// Bring every slot of a segment back online
    pub fn resume(&self, kind: SegmentKind, name: &str) -> Result<()> {
        self.post_segment(kind, name, Event::Enable)
    }

    fn post_segment(&self, kind: SegmentKind, name: &str, event: Event) -> Result<()> {
        let segment = self
            .segment(kind, name)
            .ok_or_else(|| IvrError::unknown_segment(name))?;
        let mut refused = None;
        for &id in segment.slots() {
            let slot = &self.slots[id];
            if slot.post(event.clone()).is_rejected() && refused.is_none() {
                refused = Some(IvrError::Rejected {
                    slot: id,
                    event: event.to_string(),
                    state: slot.state(),
                });
            }
        }
        match refused {
            Some(err) => {
                warn!("{} {}: {}", kind, name, err);
                Err(err)
            }
            None => {
                info!("{} {} {}d", kind, name, event);
                Ok(())
            }
        }
    }

    /// Current script generation
    pub fn scripts(&self) -> Arc<LoadedScripts> {
        self.shared.scripts.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.shared.scripts.load().generation()
    }

    /// Recompile from the script source and swap it in. On failure the
    /// previous generation stays active. Calls already running keep the
    /// image they attached to until they detach.
    pub fn reload(&self) -> Result<u64> {
        let _guard = self.reload_lock.lock();
        let generation = self.generation() + 1;
        match LoadedScripts::compile(&self.compiler, self.source.as_ref(), generation) {
            Ok(scripts) => {
                info!(
                    "Scripts reloaded, generation {}: {} headers, {} lines",
                    generation,
                    scripts.image().len(),
                    scripts.image().line_count()
                );
                self.shared.scripts.store(Arc::new(scripts));
                Ok(generation)
            }
            Err(e) => {
                if let IvrError::Compile(diagnostics) = &e {
                    for diagnostic in diagnostics {
                        error!("{}", diagnostic);
                    }
                }
                error!("Script reload failed, keeping generation {}: {}", generation - 1, e);
                Err(e)
            }
        }
    }

    /// One status row per slot
    pub fn status(&self) -> Vec<SlotStatus> {
        self.slots
            .iter()
            .map(|slot| {
                let state = slot.state();
                SlotStatus {
                    slot: slot.id(),
                    code: state.code(),
                    state,
                    sequence: slot.sequence(),
                }
            })
            .collect()
    }

    /// Status codes as one string, slot 0 first
    pub fn status_line(&self) -> String {
        self.slots.iter().map(|s| s.state().code()).collect()
    }

    /// Human-readable utilization report
    pub fn snapshot(&self) -> String {
        let mut counts = [0usize; 4];
        for slot in &self.slots {
            counts[slot.state().to_u8() as usize] += 1;
        }
        let mut out = format!(
            "generation {}: slots={} offline={} idle={} scripting={} releasing={}\n",
            self.generation(),
            self.slots.len(),
            counts[0],
            counts[1],
            counts[2],
            counts[3]
        );
        out.push_str(&self.shared.segments.report());
        out
    }

    pub fn reset_period(&self) {
        self.shared.segments.reset_period();
    }

    pub fn now_ms(&self) -> u64 {
        self.shared.clock.now_ms()
    }

    pub(crate) fn clock(&self) -> &Clock {
        &self.shared.clock
    }

    /// Earliest armed expiry across all slots
    pub fn next_expiry(&self) -> Option<u64> {
        self.shared.expiries.iter().filter_map(Expiry::get).min()
    }

    /// Deliver `TIMEOUT` to every slot due at `now_ms`; returns how many
    pub fn expire_due(&self, now_ms: u64) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.expire(now_ms))
            .count()
    }

    pub fn cdr_pool(&self) -> Arc<CdrPool> {
        self.shared.cdr.clone()
    }

    /// Receiving end of the call-detail queue; only the first caller gets it
    pub fn take_cdr_queue(&self) -> Option<CdrQueue> {
        self.cdr_queue.lock().take()
    }

    /// End every active call and take all slots offline
    pub fn shutdown(&self) -> usize {
        let active = self.active_calls();
        for slot in &self.slots {
            let _ = slot.post(Event::Shutdown);
        }
        info!("Driver shut down, {} active calls ended", active);
        active
    }
}
