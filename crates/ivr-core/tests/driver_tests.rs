//! Driver tests: allocation, segments, reload and reporting

mod common;

use common::{board, board_with_policy, build, config};
use pretty_assertions::assert_eq;
use rvoip_ivr_core::{
    AllocationPolicy, CallSetup, Event, IvrConfig, IvrError, SegmentKind, SlotState,
};
use std::sync::Arc;
use std::time::Duration;

const WAIT_SCRIPT: &str = "@main
  wait
  exit
@sales
  mark sales
  wait
  exit
";

fn limited_config(limit: usize) -> IvrConfig {
    let mut config = config(4);
    config.boards[0].groups[0].limit = Some(limit);
    config.boards[0].groups[0].script = Some("@sales".to_string());
    config
}

#[test]
fn test_group_limit_rejects_extra_calls() {
    let board = build(limited_config(2), WAIT_SCRIPT);
    let first = board.driver.start_call(Some("sales"), CallSetup::new("a", "b")).unwrap();
    board.driver.start_call(Some("sales"), CallSetup::new("a", "b")).unwrap();

    let err = board
        .driver
        .start_call(Some("sales"), CallSetup::new("a", "b"))
        .unwrap_err();
    assert!(matches!(err, IvrError::GroupLimit { limit: 2, .. }));
    assert!(err.is_exhaustion());
    assert_eq!(board.driver.idle_count(), 2);

    // a releasing call still counts against the limit
    let _ = first.post(Event::Hangup);
    assert!(board.driver.start_call(Some("sales"), CallSetup::new("a", "b")).is_err());

    let _ = board.driver.release(first.id()).unwrap();
    let third = board.driver.start_call(Some("sales"), CallSetup::new("a", "b")).unwrap();
    assert_eq!(third.call().unwrap().script, "@sales");
    assert_eq!(board.driver.group("sales").unwrap().stats().current(), 2);
}

#[test]
fn test_requested_slot_counts_against_group_limit() {
    let board = build(limited_config(1), WAIT_SCRIPT);
    let held = board.driver.request(Some("sales")).unwrap();
    assert_eq!(board.driver.reserved("sales"), 1);
    assert!(matches!(
        board.driver.start_call(Some("sales"), CallSetup::new("a", "b")),
        Err(IvrError::GroupLimit { limit: 1, .. })
    ));

    assert!(board.driver.restore(&held));
    assert_eq!(board.driver.reserved("sales"), 0);
    board.driver.start_call(Some("sales"), CallSetup::new("a", "b")).unwrap();
    assert_eq!(board.driver.reserved("sales"), 0);
    assert_eq!(board.driver.group("sales").unwrap().stats().current(), 1);

    // a reserved slot taken offline gives its reservation back
    let board = build(limited_config(1), WAIT_SCRIPT);
    let held = board.driver.request(Some("sales")).unwrap();
    let _ = held.post(Event::Disable);
    assert_eq!(board.driver.reserved("sales"), 0);
    board.driver.start_call(Some("sales"), CallSetup::new("a", "b")).unwrap();
}

#[test]
fn test_concurrent_calls_respect_group_limit() {
    let board = build(limited_config(2), WAIT_SCRIPT);
    let barrier = Arc::new(std::sync::Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let driver = board.driver.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                driver.start_call(Some("sales"), CallSetup::new("a", "b")).map(|s| s.id())
            })
        })
        .collect();

    let mut started = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => started += 1,
            Err(err) => assert!(matches!(err, IvrError::GroupLimit { limit: 2, .. }), "{}", err),
        }
    }
    assert_eq!(started, 2);
    assert_eq!(board.driver.group("sales").unwrap().stats().current(), 2);
    assert_eq!(board.driver.active_calls(), 2);
    assert_eq!(board.driver.idle_count(), 2);
}

#[test]
fn test_no_free_slot() {
    let board = board(2, WAIT_SCRIPT);
    board.driver.start_call(None, CallSetup::new("a", "b")).unwrap();
    board.driver.start_call(Some("sales"), CallSetup::new("a", "b")).unwrap();

    match board.driver.start_call(Some("sales"), CallSetup::new("a", "b")) {
        Err(err @ IvrError::NoFreeSlot { .. }) => {
            assert!(err.is_exhaustion());
            assert_eq!(err.to_string(), "No free timeslot in sales");
        }
        other => panic!("unexpected: {:?}", other.map(|s| s.id())),
    }
    assert!(matches!(
        board.driver.request(Some("nope")),
        Err(IvrError::UnknownSegment { .. })
    ));
}

#[test]
fn test_allocation_policies() {
    let first = board_with_policy(4, AllocationPolicy::First, WAIT_SCRIPT);
    let slot = first.driver.request(None).unwrap();
    assert_eq!(slot.id(), 0);
    assert_eq!(first.driver.idle_count(), 3);
    assert!(first.driver.restore(&slot));
    assert!(!first.driver.restore(&slot));

    let last = board_with_policy(4, AllocationPolicy::Last, WAIT_SCRIPT);
    assert_eq!(last.driver.request(Some("sales")).unwrap().id(), 3);
    assert_eq!(last.driver.request(Some("sales")).unwrap().id(), 2);
}

#[test]
fn test_longest_idle_rotates_slots() {
    let board = board_with_policy(3, AllocationPolicy::LongestIdle, WAIT_SCRIPT);
    let slot = board.driver.start_call(None, CallSetup::new("a", "b")).unwrap();
    assert_eq!(slot.id(), 0);
    let _ = slot.post(Event::Hangup);
    std::thread::sleep(Duration::from_millis(2));
    let _ = board.driver.release(0).unwrap();

    let next = board.driver.start_call(None, CallSetup::new("a", "b")).unwrap();
    assert_eq!(next.id(), 1);

    let first = board_with_policy(3, AllocationPolicy::First, WAIT_SCRIPT);
    let slot = first.driver.start_call(None, CallSetup::new("a", "b")).unwrap();
    let _ = slot.post(Event::Hangup);
    let _ = first.driver.release(slot.id()).unwrap();
    assert_eq!(first.driver.start_call(None, CallSetup::new("a", "b")).unwrap().id(), 0);
}

#[test]
fn test_suspend_and_resume_span() {
    let board = board(4, WAIT_SCRIPT);
    let busy = board.driver.start_call(None, CallSetup::new("a", "b")).unwrap();

    board.driver.suspend(SegmentKind::Span, "span0").unwrap();
    assert_eq!(board.driver.status_line(), "----");
    assert_eq!(board.driver.idle_count(), 0);
    assert_eq!(board.driver.active_calls(), 0);
    assert!(busy.call().is_none());
    assert!(board.driver.request(None).is_err());

    match board.driver.suspend(SegmentKind::Span, "span0") {
        Err(IvrError::Rejected { slot, event, state }) => {
            assert_eq!(slot, 0);
            assert_eq!(event, "disable");
            assert_eq!(state, SlotState::Offline);
        }
        other => panic!("unexpected: {:?}", other),
    }

    board.driver.resume(SegmentKind::Group, "sales").unwrap();
    assert_eq!(board.driver.status_line(), "iiii");
    assert_eq!(board.driver.idle_count(), 4);
    assert!(board.driver.resume(SegmentKind::Board, "board0").is_err());
    assert!(matches!(
        board.driver.suspend(SegmentKind::Group, "missing"),
        Err(IvrError::UnknownSegment { .. })
    ));
}

#[test]
fn test_status_and_snapshot() {
    let board = build(limited_config(3), WAIT_SCRIPT);
    let slot = board.driver.start_call(Some("sales"), CallSetup::new("a", "b")).unwrap();

    let status = board.driver.status();
    assert_eq!(status.len(), 4);
    assert_eq!(status[slot.id()].state, SlotState::Scripting);
    assert_eq!(status[slot.id()].code, 's');
    assert_eq!(status[slot.id()].sequence, 1);

    let snapshot = board.driver.snapshot();
    let lines: Vec<&str> = snapshot.lines().collect();
    assert_eq!(
        lines[0],
        "generation 1: slots=4 offline=0 idle=3 scripting=1 releasing=0"
    );
    assert!(lines.contains(
        &"group sales: slots=4 current=1 peak=1 min=0 max=1 period=1 total=1 limit=3"
    ));
    assert!(lines.iter().any(|l| l.starts_with("span span0: slots=4 current=1")));
    assert!(lines.iter().any(|l| l.starts_with("board board0: slots=4 current=1")));

    board.driver.reset_period();
    let stats = board.driver.span("span0").unwrap().stats().snapshot();
    assert_eq!(stats.current, 1);
    assert_eq!(stats.period, 0);
    assert!(board.driver.board("board0").is_some());
}

#[test]
fn test_reload_keeps_running_call_on_old_image() {
    let board = board(2, "@main\n  set origin \"A\"\n  wait\n  exit\n");
    let weak_a = Arc::downgrade(board.driver.scripts().image());
    let slot = board.driver.start_call(None, CallSetup::new("a", "b")).unwrap();

    board.source.set_script("main.scr", "@main\n  set origin \"B\"\n  wait\n  exit\n");
    assert_eq!(board.driver.reload().unwrap(), 2);
    assert_eq!(board.driver.generation(), 2);
    assert!(weak_a.upgrade().is_some());

    // the running call finishes on image A
    let _ = slot.post(Event::Timeout);
    assert_eq!(slot.state(), SlotState::Releasing);
    assert_eq!(slot.symbol("origin").as_deref(), Some("A"));
    assert!(weak_a.upgrade().is_some());

    let _ = board.driver.release(slot.id()).unwrap();
    assert!(weak_a.upgrade().is_none());

    let next = board.driver.start_call(None, CallSetup::new("a", "b")).unwrap();
    assert_eq!(next.symbol("origin").as_deref(), Some("B"));
}

#[test]
fn test_failed_reload_keeps_previous_image() {
    let board = board(1, "@main\n  check\n  exit\n");
    board.source.set_script("main.scr", "@main\n  frobnicate\n");

    match board.driver.reload() {
        Err(IvrError::Compile(errors)) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].to_string(), "main.scr:2: unknown command 'frobnicate'");
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(board.driver.generation(), 1);

    board.driver.start_call(None, CallSetup::new("a", "b")).unwrap();
    assert_eq!(board.recorder.checks(), 1);
}

#[test]
fn test_schedule_selects_entry_point() {
    let board = board(2, "@main\n  exit\n@generic\n  exit\n@business\n  exit\n");
    board.source.set_schedule(
        "schedule.conf",
        "*/* all-days @generic\nsales/* @business\nsales/transfer @ghost\n",
    );
    board.driver.reload().unwrap();

    assert_eq!(board.driver.select_script(Some("sales"), "incoming"), "@business");
    assert_eq!(board.driver.select_script(Some("support"), "incoming"), "@generic");
    // the rule wins but its script is missing from the image
    assert_eq!(board.driver.select_script(Some("sales"), "transfer"), "@main");

    let slot = board.driver.start_call(Some("sales"), CallSetup::new("a", "b")).unwrap();
    assert_eq!(slot.call().unwrap().script, "@business");
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let mut config = config(2);
    config.boards[0].groups[0].slots = vec![5];
    let err = rvoip_ivr_core::DriverBuilder::new(config).build().unwrap_err();
    assert!(matches!(err, IvrError::Config { .. }));

    let source = Arc::new(rvoip_ivr_core::MemorySource::with_script("main.scr", "@main\n  bogus\n"));
    let err = rvoip_ivr_core::DriverBuilder::new(common::config(1))
        .source(source)
        .build()
        .unwrap_err();
    assert!(matches!(err, IvrError::Compile(_)));
}
