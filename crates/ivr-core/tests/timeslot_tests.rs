//! Timeslot state machine tests
//!
//! These drive timeslots directly through the driver without any worker
//! tasks: timers are fired by calling `expire_due` by hand.

mod common;

use common::board;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rvoip_ivr_core::{CallSetup, CdrKind, Event, IvrError, PostOutcome, SlotState};
use std::sync::atomic::Ordering;
use std::sync::Arc;

const E2E_SCRIPT: &str = "@main\n  set x \"1\"\n  expr x += 1\n  check\n  exit\n";

const WAIT_SCRIPT: &str = "@main
  mark start %source %target
  wait
  mark resumed
  exit
^poke
  busy
  wait
";

#[test]
fn test_call_runs_script_to_exit() {
    let board = board(4, E2E_SCRIPT);
    let slot = board
        .driver
        .start_call(Some("sales"), CallSetup::new("1000", "2000"))
        .unwrap();

    assert_eq!(slot.sequence(), 1);
    assert_eq!(board.recorder.checks(), 1);
    assert_eq!(slot.symbol("x").as_deref(), Some("2"));
    assert_eq!(slot.state(), SlotState::Releasing);

    let call = slot.call().unwrap();
    assert_eq!(call.reason, "exit");
    assert_eq!(call.script, "@main");
    assert_eq!(call.source, "1000");
    assert!(board.driver.find_call(&call.cid).is_some());

    let token = board.driver.release(slot.id()).unwrap();
    assert_eq!(token.slot(), slot.id());
    assert_eq!(token.sequence(), 1);
    assert_eq!(slot.state(), SlotState::Idle);
    assert!(slot.call().is_none());
    assert!(slot.symbol("x").is_none());
    assert!(board.driver.find_call(&call.cid).is_none());
    assert_eq!(board.driver.idle_count(), 4);
    assert_eq!(board.recorder.log(), vec!["0 hangup"]);
}

#[test]
fn test_call_detail_records_start_and_stop() {
    let board = board(2, E2E_SCRIPT);
    let mut queue = board.driver.take_cdr_queue().unwrap();
    assert!(board.driver.take_cdr_queue().is_none());

    let mut setup = CallSetup::new("1000", "2000").with_cid("call-1");
    setup.payload = Some("trunk=7".to_string());
    let slot = board.driver.start_call(None, setup).unwrap();
    let _ = board.driver.release(slot.id()).unwrap();

    let start = queue.try_recv().unwrap();
    let stop = queue.try_recv().unwrap();
    assert!(queue.try_recv().is_err());

    assert_eq!(start.kind, CdrKind::Start);
    assert_eq!(start.cid, "call-1");
    assert_eq!(start.duration_ms, None);
    assert_eq!(stop.kind, CdrKind::Stop);
    assert_eq!(stop.sequence, 1);
    assert_eq!(stop.reason, "exit");
    assert_eq!(stop.target, "2000");
    assert_eq!(stop.script, "@main");
    assert_eq!(stop.payload.as_deref(), Some("trunk=7"));
    assert!(stop.duration_ms.is_some());
}

#[test]
fn test_release_on_idle_slot_is_rejected() {
    let board = board(2, E2E_SCRIPT);
    let slot = board.driver.access(1).unwrap();
    assert_eq!(slot.state(), SlotState::Idle);

    assert_eq!(slot.post(Event::Release), PostOutcome::Rejected);
    match board.driver.release(1) {
        Err(IvrError::Rejected { slot, state, .. }) => {
            assert_eq!(slot, 1);
            assert_eq!(state, SlotState::Idle);
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(board.driver.idle_count(), 2);

    // a completed release cannot be repeated either
    let slot = board.driver.start_call(None, CallSetup::new("a", "b")).unwrap();
    assert!(board.driver.release(slot.id()).is_ok());
    assert!(board.driver.release(slot.id()).is_err());
    assert_eq!(board.driver.idle_count(), 2);
}

#[test]
fn test_allocate_requires_idle() {
    let board = board(1, WAIT_SCRIPT);
    let slot = board.driver.start_call(None, CallSetup::new("a", "b")).unwrap();
    assert_eq!(slot.state(), SlotState::Scripting);

    match slot.allocate(CallSetup::new("c", "d")) {
        Err(IvrError::Rejected { event, state, .. }) => {
            assert_eq!(event, "allocate");
            assert_eq!(state, SlotState::Scripting);
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(slot.sequence(), 1);
}

#[test]
fn test_missing_entry_leaves_slot_idle() {
    let board = board(2, E2E_SCRIPT);
    let err = board
        .driver
        .start_call(None, CallSetup::new("a", "b").with_script("@nowhere"))
        .unwrap_err();
    assert!(matches!(err, IvrError::ScriptNotFound { ref entry } if entry == "@nowhere"));
    assert_eq!(board.driver.idle_count(), 2);
    assert!(board.driver.status().iter().all(|s| s.state == SlotState::Idle));
}

#[test]
fn test_symbols_seeded_from_call_setup() {
    let board = board(1, WAIT_SCRIPT);
    let slot = board
        .driver
        .start_call(None, CallSetup::new("1000", "2000").with_cid("abc"))
        .unwrap();

    assert_eq!(slot.symbol("cid").as_deref(), Some("abc"));
    assert_eq!(slot.symbol("slot").as_deref(), Some("0"));
    assert_eq!(slot.symbol("sequence").as_deref(), Some("1"));
    assert_eq!(board.recorder.log(), vec!["0 mark start 1000 2000"]);
}

#[test]
fn test_signal_resumes_script_and_unknown_signal_is_rejected() {
    let board = board(1, WAIT_SCRIPT);
    let slot = board.driver.start_call(None, CallSetup::new("a", "b")).unwrap();
    assert_eq!(slot.expiry(), None);

    assert_eq!(slot.post(Event::Signal("digit".into())), PostOutcome::Rejected);
    assert_eq!(slot.post(Event::Signal("poke".into())), PostOutcome::Handled);
    assert_eq!(board.recorder.busy_calls.load(Ordering::SeqCst), 1);
    assert_eq!(slot.state(), SlotState::Scripting);

    // TIMEOUT re-steps from where the handler suspended
    assert_eq!(slot.post(Event::Timeout), PostOutcome::Handled);
    assert_eq!(slot.state(), SlotState::Releasing);
}

#[test]
fn test_hangup_moves_to_releasing_then_timeout_releases() {
    let board = board(1, WAIT_SCRIPT);
    let slot = board.driver.start_call(None, CallSetup::new("a", "b")).unwrap();

    assert_eq!(slot.post(Event::Hangup), PostOutcome::Handled);
    assert_eq!(slot.state(), SlotState::Releasing);
    assert_eq!(slot.call().unwrap().reason, "hangup");
    assert_eq!(slot.post(Event::Drop), PostOutcome::Handled);
    assert_eq!(slot.post(Event::Enable), PostOutcome::Rejected);
    assert_eq!(slot.post(Event::Signal("poke".into())), PostOutcome::Rejected);

    // zero release delay: the timer is already due
    assert!(slot.expiry().is_some());
    assert_eq!(board.driver.expire_due(board.driver.now_ms()), 1);
    assert_eq!(slot.state(), SlotState::Idle);
    assert_eq!(slot.expiry(), None);
    assert!(board.recorder.log().contains(&"0 disconnect".to_string()));
}

#[test]
fn test_disable_forces_hangup_and_release() {
    let board = board(2, WAIT_SCRIPT);
    let mut queue = board.driver.take_cdr_queue().unwrap();
    let slot = board.driver.start_call(None, CallSetup::new("a", "b")).unwrap();

    assert_eq!(slot.post(Event::Disable), PostOutcome::Handled);
    assert_eq!(slot.state(), SlotState::Offline);
    assert!(slot.call().is_none());
    assert_eq!(board.driver.active_calls(), 0);
    assert_eq!(board.driver.idle_count(), 1);
    assert!(board.recorder.log().contains(&format!("{} hangup", slot.id())));

    let _start = queue.try_recv().unwrap();
    let stop = queue.try_recv().unwrap();
    assert_eq!(stop.reason, "disable");

    assert_eq!(slot.post(Event::Disable), PostOutcome::Rejected);
    assert_eq!(slot.post(Event::Enable), PostOutcome::Handled);
    assert_eq!(slot.state(), SlotState::Idle);
    assert_eq!(board.driver.idle_count(), 2);
}

#[test]
fn test_resource_mask_arms_adapter() {
    let board = board(
        1,
        "@main
  gosub @media
  exit
@media
  play hello
  return
",
    );
    let slot = board.driver.start_call(None, CallSetup::new("a", "b")).unwrap();
    assert_eq!(slot.state(), SlotState::Releasing);
    assert_eq!(
        board.recorder.log(),
        vec!["0 arm 0x1", "0 arm 0x0", "0 hangup"]
    );
}

#[test]
fn test_script_error_ends_call() {
    let board = board(1, "@main\n  sleep soon\n  check\n  exit\n");
    let slot = board.driver.start_call(None, CallSetup::new("a", "b")).unwrap();
    assert_eq!(slot.state(), SlotState::Releasing);
    assert_eq!(board.recorder.checks(), 0);
    assert_eq!(
        slot.call().unwrap().reason,
        "error: sleep: invalid duration 'soon'"
    );
}

#[test]
fn test_sleep_arms_timer() {
    let board = board(1, "@main\n  sleep 30\n  check\n  exit\n");
    let slot = board.driver.start_call(None, CallSetup::new("a", "b")).unwrap();

    let now = board.driver.now_ms();
    let at = slot.expiry().unwrap();
    assert!(at >= now + 29_000 && at <= now + 30_000);
    assert_eq!(board.driver.next_expiry(), Some(at));

    // not yet due
    assert_eq!(board.driver.expire_due(now), 0);
    assert_eq!(slot.expire(at), Some(PostOutcome::Handled));
    assert_eq!(board.recorder.checks(), 1);
    assert_eq!(slot.state(), SlotState::Releasing);
}

#[test]
fn test_long_script_yields_after_tick() {
    let mut config = common::config(1);
    config.engine.steps_per_tick = 4;
    let board = common::build(
        config,
        "@main
  set n 0
  repeat 10
    expr n += 1
  loop
  check
  exit
",
    );
    let slot = board.driver.start_call(None, CallSetup::new("a", "b")).unwrap();
    assert_eq!(slot.state(), SlotState::Scripting);
    assert!(slot.expiry().is_some());

    for _ in 0..20 {
        if slot.state() != SlotState::Scripting {
            break;
        }
        let _ = slot.post(Event::Timeout);
    }
    assert_eq!(board.recorder.checks(), 1);
    assert_eq!(slot.state(), SlotState::Releasing);
}

#[test]
fn test_concurrent_posts_never_interleave() {
    let board = board(1, WAIT_SCRIPT);
    let slot = board.driver.start_call(None, CallSetup::new("a", "b")).unwrap();

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    assert_eq!(slot.post(Event::Signal("poke".into())), PostOutcome::Handled);
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(board.recorder.busy_calls.load(Ordering::SeqCst), 200);
    assert_eq!(board.recorder.overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(slot.state(), SlotState::Scripting);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_sequence_strictly_increases(cycles in 1usize..12, hangups in proptest::collection::vec(any::<bool>(), 12)) {
        let board = board(1, WAIT_SCRIPT);
        let slot = board.driver.access(0).unwrap();
        let mut last = slot.sequence();

        for hangup in hangups.into_iter().take(cycles) {
            let sequence = slot.allocate(CallSetup::new("a", "b")).unwrap();
            prop_assert!(sequence > last);
            prop_assert_eq!(slot.sequence(), sequence);
            last = sequence;

            if hangup {
                let _ = slot.post(Event::Hangup);
            } else {
                let _ = slot.post(Event::Timeout);
            }
            prop_assert_eq!(slot.state(), SlotState::Releasing);
            let token = board.driver.release(0).unwrap();
            prop_assert_eq!(token.sequence(), sequence);
        }
        prop_assert_eq!(slot.sequence(), cycles as u64);
    }
}
