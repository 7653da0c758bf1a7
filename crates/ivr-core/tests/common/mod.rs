//! Shared fixtures for the IVR integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use rvoip_ivr_core::config::{BoardConfig, GroupConfig, SpanConfig};
use rvoip_ivr_core::prelude::*;
use rvoip_ivr_core::{AdapterFactory, AllocationPolicy, MemorySource, SlotId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counters and log shared by every adapter a [`TestBoard`] creates
#[derive(Default)]
pub struct Recorder {
    pub checks: AtomicUsize,
    pub busy_calls: AtomicUsize,
    pub overlaps: AtomicUsize,
    pub busy: AtomicBool,
    pub log: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

/// Adapter providing `check`, `mark`, `wait` and `busy`
pub struct TestAdapter {
    slot: SlotId,
    recorder: Arc<Recorder>,
}

impl SignalingAdapter for TestAdapter {
    fn arm(&mut self, mask: Mask) {
        self.recorder.log.lock().push(format!("{} arm {:#x}", self.slot, mask));
    }

    fn disconnect(&mut self) {
        self.recorder.log.lock().push(format!("{} disconnect", self.slot));
    }

    fn hangup(&mut self) {
        self.recorder.log.lock().push(format!("{} hangup", self.slot));
    }

    fn execute(&mut self, command: &str, args: &[String]) -> Option<HostAction> {
        match command {
            "check" => {
                self.recorder.checks.fetch_add(1, Ordering::SeqCst);
                Some(HostAction::Continue)
            }
            "mark" => {
                self.recorder
                    .log
                    .lock()
                    .push(format!("{} mark {}", self.slot, args.join(" ")));
                Some(HostAction::Continue)
            }
            "wait" => Some(HostAction::Suspend),
            "busy" => {
                if self.recorder.busy.swap(true, Ordering::SeqCst) {
                    self.recorder.overlaps.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::yield_now();
                self.recorder.busy_calls.fetch_add(1, Ordering::SeqCst);
                self.recorder.busy.store(false, Ordering::SeqCst);
                Some(HostAction::Continue)
            }
            "play" => Some(HostAction::Continue),
            _ => None,
        }
    }
}

pub fn factory(recorder: &Arc<Recorder>) -> AdapterFactory {
    let recorder = recorder.clone();
    Arc::new(move |slot| {
        Box::new(TestAdapter {
            slot,
            recorder: recorder.clone(),
        }) as Box<dyn SignalingAdapter>
    })
}

/// One board, one span of `slots`, one `sales` group over it
pub fn config(slots: usize) -> IvrConfig {
    let mut config = IvrConfig::default();
    config.boards = vec![BoardConfig {
        name: "board0".to_string(),
        spans: vec![SpanConfig {
            name: "span0".to_string(),
            slots,
        }],
        groups: vec![GroupConfig {
            name: "sales".to_string(),
            spans: vec!["span0".to_string()],
            slots: Vec::new(),
            limit: None,
            script: None,
        }],
        registrations: Vec::new(),
    }];
    config
}

pub struct TestBoard {
    pub driver: Arc<Driver>,
    pub recorder: Arc<Recorder>,
    pub source: Arc<MemorySource>,
}

pub fn build(config: IvrConfig, script: &str) -> TestBoard {
    let recorder = Arc::new(Recorder::default());
    let source = Arc::new(MemorySource::with_script("main.scr", script));
    let driver = DriverBuilder::new(config)
        .source(source.clone())
        .adapters(factory(&recorder))
        .command("check", 0)
        .command("mark", 0)
        .command("wait", 0)
        .command("busy", 0)
        .command("play", 0x1)
        .build()
        .expect("driver");
    TestBoard {
        driver,
        recorder,
        source,
    }
}

pub fn board(slots: usize, script: &str) -> TestBoard {
    build(config(slots), script)
}

pub fn board_with_policy(slots: usize, policy: AllocationPolicy, script: &str) -> TestBoard {
    let mut config = config(slots);
    config.allocation.policy = policy;
    build(config, script)
}
