//! Available-slot list
//!
//! Holds the ids of idle, in-service slots with the time each one became
//! idle. The lock covers only the insert/remove; no slot lock is ever taken
//! while it is held.
//!
//! [`Reservations`] tracks slots taken out for a group that do not carry a
//! call yet, so group limits count them before the call starts.

use crate::config::AllocationPolicy;
use crate::errors::Result;
use crate::event::SlotId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct IdlePool {
    entries: Mutex<BTreeMap<SlotId, Instant>>,
}

impl IdlePool {
    /// Returns `false` if the slot was already listed
    pub fn insert(&self, slot: SlotId) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(&slot) {
            return false;
        }
        entries.insert(slot, Instant::now());
        true
    }

    pub fn remove(&self, slot: SlotId) -> bool {
        self.entries.lock().remove(&slot).is_some()
    }

    pub fn contains(&self, slot: SlotId) -> bool {
        self.entries.lock().contains_key(&slot)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove and return a slot chosen by `policy`, restricted to `members`
    /// (sorted) when given
    pub fn take(&self, members: Option<&[SlotId]>, policy: AllocationPolicy) -> Option<SlotId> {
        let mut entries = self.entries.lock();
        let mut candidates = entries
            .iter()
            .filter(|(id, _)| members.map_or(true, |m| m.binary_search(*id).is_ok()));
        let chosen = match policy {
            AllocationPolicy::First => candidates.next().map(|(id, _)| *id),
            AllocationPolicy::Last => candidates.next_back().map(|(id, _)| *id),
            AllocationPolicy::LongestIdle => candidates
                .min_by_key(|(id, since)| (**since, **id))
                .map(|(id, _)| *id),
        }?;
        entries.remove(&chosen);
        Some(chosen)
    }
}

/// Slots requested for a group and not yet allocated
#[derive(Debug, Default)]
pub(crate) struct Reservations {
    slots: Mutex<HashMap<SlotId, String>>,
}

impl Reservations {
    /// Run `admit` with the number of slots already reserved for `group`
    /// and record the slot it returns. The reservation lock is held
    /// throughout, so concurrent admissions to one group are serialized.
    pub(crate) fn reserve<F>(&self, group: &str, admit: F) -> Result<SlotId>
    where
        F: FnOnce(usize) -> Result<SlotId>,
    {
        let mut slots = self.slots.lock();
        let reserved = slots.values().filter(|g| g.as_str() == group).count();
        let slot = admit(reserved)?;
        slots.insert(slot, group.to_string());
        Ok(slot)
    }

    /// Drop the reservation held by `slot`, if any
    pub(crate) fn release(&self, slot: SlotId) -> bool {
        self.slots.lock().remove(&slot).is_some()
    }

    pub(crate) fn count(&self, group: &str) -> usize {
        self.slots.lock().values().filter(|g| g.as_str() == group).count()
    }
}
