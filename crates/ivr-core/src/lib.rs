//! # rvoip-ivr-core
//!
//! Call-processing core of the rvoip IVR server. A [`Driver`] owns a fixed
//! pool of [`Timeslot`]s, each running one call through a script from
//! `rvoip-script-core`. Board, span, group and registration [`Segment`]s
//! organize the pool for allocation, limits and utilization reporting.
//!
//! Three worker tasks keep calls moving: the timer [`Ticker`], the message
//! [`Dispatcher`] and the call-detail [`CdrPoster`]. [`IvrServer`] starts
//! and stops them together.
//!
//! Scripts are hot-reloadable: [`Driver::reload`] swaps in a new compiled
//! image while running calls finish on the one they started with.

pub mod cdr;
pub mod config;
pub mod driver;
pub mod errors;
pub mod event;
pub mod logging;
pub mod pool;
pub mod scheduler;
pub mod scripts;
pub mod segment;
pub mod server;
pub mod timer;
pub mod timeslot;
pub mod workers;

pub use cdr::{CallDetailRecord, CdrKind, CdrPool, CdrSink, JsonLinesSink, MemorySink, TracingSink};
pub use config::{AllocationPolicy, EngineConfig, IvrConfig, LogSettings, WorkerConfig};
pub use driver::{Driver, DriverBuilder, SlotStatus, DEFAULT_EVENT};
pub use errors::{IvrError, Result};
pub use event::{Event, PostOutcome, ReleaseToken, SlotId, SlotState};
pub use scheduler::{ScheduleRule, Scheduler};
pub use scripts::{FileSource, LoadedScripts, MemorySource, ScriptSource};
pub use segment::{Segment, SegmentKind, SegmentStats, StatCounter};
pub use server::IvrServer;
pub use timeslot::{null_factory, AdapterFactory, CallInfo, CallSetup, NullAdapter, SignalingAdapter, Timeslot};
pub use workers::{CdrPoster, Dispatcher, MessageQueue, Ticker};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        CallDetailRecord, CallSetup, CdrSink, Driver, DriverBuilder, Event, IvrConfig, IvrError,
        IvrServer, MemorySource, PostOutcome, Result, SegmentKind, SignalingAdapter, SlotState,
        Timeslot,
    };
    pub use rvoip_script_core::{HostAction, Mask};
}
