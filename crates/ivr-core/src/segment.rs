//! Board / span / group / registration hierarchy
//!
//! Segments are built once from configuration. Each one names a set of
//! timeslots and keeps call statistics for them; suspend and resume are
//! driven through [`crate::Driver`] since they post events to the slots.

use crate::config::IvrConfig;
use crate::errors::{IvrError, Result};
use crate::event::SlotId;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Level of a segment in the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SegmentKind {
    Board,
    Span,
    Group,
    Registration,
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SegmentKind::Board => "board",
            SegmentKind::Span => "span",
            SegmentKind::Group => "group",
            SegmentKind::Registration => "registration",
        })
    }
}

/// Point-in-time view of a segment's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatCounter {
    /// Calls in progress
    pub current: u32,
    /// Highest `current` since startup
    pub peak: u32,
    /// Lowest `current` this period
    pub min: u32,
    /// Highest `current` this period
    pub max: u32,
    /// Calls started this period
    pub period: u64,
    /// Calls started since startup
    pub total: u64,
}

/// Thread-safe statistics for one segment
#[derive(Debug, Default)]
pub struct SegmentStats {
    inner: Mutex<StatCounter>,
}

impl SegmentStats {
    pub fn snapshot(&self) -> StatCounter {
        *self.inner.lock()
    }

    pub fn current(&self) -> u32 {
        self.inner.lock().current
    }

    pub(crate) fn call_started(&self) {
        let mut stats = self.inner.lock();
        stats.current += 1;
        stats.period += 1;
        stats.total += 1;
        stats.peak = stats.peak.max(stats.current);
        stats.max = stats.max.max(stats.current);
    }

    pub(crate) fn call_ended(&self) {
        let mut stats = self.inner.lock();
        stats.current = stats.current.saturating_sub(1);
        stats.min = stats.min.min(stats.current);
    }

    /// Start a new reporting period
    pub fn reset_period(&self) {
        let mut stats = self.inner.lock();
        stats.min = stats.current;
        stats.max = stats.current;
        stats.period = 0;
    }
}

/// A named set of timeslots
#[derive(Debug)]
pub struct Segment {
    name: String,
    kind: SegmentKind,
    slots: Vec<SlotId>,
    limit: Option<usize>,
    script: Option<String>,
    stats: SegmentStats,
}

impl Segment {
    fn new(kind: SegmentKind, name: &str, slots: Vec<SlotId>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            slots,
            limit: None,
            script: None,
            stats: SegmentStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    /// Member slots in ascending order
    pub fn slots(&self) -> &[SlotId] {
        &self.slots
    }

    pub fn contains(&self, slot: SlotId) -> bool {
        self.slots.binary_search(&slot).is_ok()
    }

    /// Group call limit
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Group default entry point
    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    pub fn stats(&self) -> &SegmentStats {
        &self.stats
    }
}

/// All segments plus the per-slot membership index
#[derive(Debug)]
pub struct SegmentTable {
    segments: Vec<Segment>,
    /// Segment indexes each slot belongs to
    membership: Vec<Vec<usize>>,
}

impl SegmentTable {
    pub fn from_config(config: &IvrConfig) -> Result<Self> {
        let mut segments = Vec::new();
        let mut next: SlotId = 0;

        for board in &config.boards {
            let board_start = next;
            let mut spans = Vec::new();
            for span in &board.spans {
                let ids: Vec<SlotId> = (next..next + span.slots).collect();
                next += span.slots;
                spans.push((span.name.as_str(), ids.clone()));
                segments.push(Segment::new(SegmentKind::Span, &span.name, ids));
            }
            segments.push(Segment::new(SegmentKind::Board, &board.name, (board_start..next).collect()));

            for group in &board.groups {
                let mut ids: BTreeSet<SlotId> = group.slots.iter().copied().collect();
                for name in &group.spans {
                    let (_, span_ids) = spans
                        .iter()
                        .find(|(span, _)| span == name)
                        .ok_or_else(|| IvrError::unknown_segment(name.clone()))?;
                    ids.extend(span_ids.iter().copied());
                }
                let mut segment = Segment::new(SegmentKind::Group, &group.name, ids.into_iter().collect());
                segment.limit = group.limit;
                segment.script = group.script.clone();
                segments.push(segment);
            }

            for registration in &board.registrations {
                let ids: BTreeSet<SlotId> = registration.slots.iter().copied().collect();
                segments.push(Segment::new(
                    SegmentKind::Registration,
                    &registration.name,
                    ids.into_iter().collect(),
                ));
            }
        }

        let mut membership = vec![Vec::new(); next];
        for (index, segment) in segments.iter().enumerate() {
            for &slot in &segment.slots {
                if let Some(list) = membership.get_mut(slot) {
                    list.push(index);
                }
            }
        }
        Ok(Self { segments, membership })
    }

    pub fn slot_count(&self) -> usize {
        self.membership.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub fn find(&self, kind: SegmentKind, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.kind == kind && s.name == name)
    }

    /// Segments a slot belongs to, in configuration order
    pub fn of_slot(&self, slot: SlotId) -> impl Iterator<Item = &Segment> {
        self.membership
            .get(slot)
            .into_iter()
            .flatten()
            .filter_map(|&index| self.segments.get(index))
    }

    /// First group a slot belongs to
    pub fn group_of(&self, slot: SlotId) -> Option<&Segment> {
        self.of_slot(slot).find(|s| s.kind == SegmentKind::Group)
    }

    pub(crate) fn call_started(&self, slot: SlotId) {
        for segment in self.of_slot(slot) {
            segment.stats.call_started();
        }
    }

    pub(crate) fn call_ended(&self, slot: SlotId) {
        for segment in self.of_slot(slot) {
            segment.stats.call_ended();
        }
    }

    /// Utilization report, one line per segment
    pub fn report(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            let stats = segment.stats.snapshot();
            out.push_str(&format!(
                "{} {}: slots={} current={} peak={} min={} max={} period={} total={}",
                segment.kind,
                segment.name,
                segment.slots.len(),
                stats.current,
                stats.peak,
                stats.min,
                stats.max,
                stats.period,
                stats.total
            ));
            if let Some(limit) = segment.limit {
                out.push_str(&format!(" limit={}", limit));
            }
            out.push('\n');
        }
        out
    }

    pub fn reset_period(&self) {
        for segment in &self.segments {
            segment.stats.reset_period();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table() -> SegmentTable {
        let config = IvrConfig::from_toml_str(
            r#"
            [[boards]]
            name = "b1"
            spans = [{ name = "s1", slots = 2 }, { name = "s2", slots = 3 }]
            groups = [{ name = "sales", spans = ["s2"], slots = [0], limit = 2 }]
            registrations = [{ name = "r1", slots = [4] }]
            "#,
        )
        .unwrap();
        SegmentTable::from_config(&config).unwrap()
    }

    #[test]
    fn test_membership() {
        let table = table();
        assert_eq!(table.slot_count(), 5);
        let sales = table.find(SegmentKind::Group, "sales").unwrap();
        assert_eq!(sales.slots(), &[0, 2, 3, 4]);
        assert_eq!(sales.limit(), Some(2));
        assert_eq!(table.find(SegmentKind::Board, "b1").unwrap().slots().len(), 5);

        let kinds: Vec<SegmentKind> = table.of_slot(4).map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![SegmentKind::Span, SegmentKind::Board, SegmentKind::Group, SegmentKind::Registration]
        );
        assert_eq!(table.group_of(1).map(|s| s.name()), None);
    }

    #[test]
    fn test_stats_roll_up_and_period_reset() {
        let table = table();
        table.call_started(3);
        table.call_started(4);
        table.call_ended(3);

        let group = table.find(SegmentKind::Group, "sales").unwrap().stats().snapshot();
        assert_eq!(group.current, 1);
        assert_eq!(group.peak, 2);
        assert_eq!(group.total, 2);

        table.reset_period();
        let group = table.find(SegmentKind::Group, "sales").unwrap().stats().snapshot();
        assert_eq!((group.min, group.max, group.period), (1, 1, 0));
        assert!(table.report().contains("group sales: slots=4 current=1"));
    }
}
