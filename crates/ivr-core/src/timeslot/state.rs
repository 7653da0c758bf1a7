//! Per-state event handlers

use super::{SlotInner, Timeslot};
use crate::event::{Event, PostOutcome, SlotState};

impl Timeslot {
    pub(super) fn dispatch(&self, inner: &mut SlotInner, event: &Event) -> PostOutcome {
        match inner.state {
            SlotState::Offline => self.on_offline(inner, event),
            SlotState::Idle => self.on_idle(inner, event),
            SlotState::Scripting => self.on_scripting(inner, event),
            SlotState::Releasing => self.on_releasing(inner, event),
        }
    }

    fn on_offline(&self, inner: &mut SlotInner, event: &Event) -> PostOutcome {
        match event {
            Event::Enable => {
                self.set_state(inner, SlotState::Idle);
                self.shared.idle.insert(self.id);
                PostOutcome::Handled
            }
            Event::Shutdown => PostOutcome::Handled,
            _ => PostOutcome::Rejected,
        }
    }

    fn on_idle(&self, inner: &mut SlotInner, event: &Event) -> PostOutcome {
        match event {
            Event::Disable | Event::Shutdown => {
                self.shared.idle.remove(self.id);
                self.shared.reservations.release(self.id);
                self.set_state(inner, SlotState::Offline);
                PostOutcome::Handled
            }
            _ => PostOutcome::Rejected,
        }
    }

    fn on_scripting(&self, inner: &mut SlotInner, event: &Event) -> PostOutcome {
        match event {
            Event::Timeout => {
                self.run(inner);
                PostOutcome::Handled
            }
            Event::Signal(name) => {
                if !inner.interp.trigger(name) {
                    return PostOutcome::Rejected;
                }
                self.run(inner);
                PostOutcome::Handled
            }
            Event::Drop | Event::Hangup => {
                inner.adapter.disconnect();
                self.begin_release(inner, event.name().to_string());
                PostOutcome::Handled
            }
            Event::Disable | Event::Shutdown => {
                inner.adapter.hangup();
                if let Some(call) = inner.call.as_mut() {
                    call.reason = event.name().to_string();
                }
                self.finish(inner, SlotState::Offline);
                PostOutcome::Handled
            }
            Event::Enable | Event::Release => PostOutcome::Rejected,
        }
    }

    fn on_releasing(&self, inner: &mut SlotInner, event: &Event) -> PostOutcome {
        match event {
            Event::Release | Event::Timeout => PostOutcome::Released(self.release_to_pool(inner)),
            Event::Drop | Event::Hangup => PostOutcome::Handled,
            Event::Disable | Event::Shutdown => {
                self.finish(inner, SlotState::Offline);
                PostOutcome::Handled
            }
            Event::Enable | Event::Signal(_) => PostOutcome::Rejected,
        }
    }
}
