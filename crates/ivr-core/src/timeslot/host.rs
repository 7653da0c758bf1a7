use super::adapter::SignalingAdapter;
use crate::event::SlotId;
use rvoip_script_core::{HostAction, ScriptHost};
use std::time::Duration;
use tracing::info;

/// Script host for one step: built-in slot commands, then the adapter
pub(crate) struct SlotHost<'a> {
    slot: SlotId,
    adapter: &'a mut dyn SignalingAdapter,
    wake: Option<Duration>,
}

impl<'a> SlotHost<'a> {
    pub(crate) fn new(slot: SlotId, adapter: &'a mut dyn SignalingAdapter) -> Self {
        Self {
            slot,
            adapter,
            wake: None,
        }
    }

    /// Timer requested by `sleep` during this step
    pub(crate) fn wake(&self) -> Option<Duration> {
        self.wake
    }

    fn sleep(&mut self, args: &[String]) -> HostAction {
        let seconds = args.first().and_then(|a| a.trim().parse::<f64>().ok());
        match seconds {
            Some(s) if s.is_finite() && s >= 0.0 => {
                self.wake = Some(Duration::from_secs_f64(s));
                HostAction::Suspend
            }
            _ => HostAction::Fail(format!("invalid duration '{}'", args.join(" "))),
        }
    }
}

impl ScriptHost for SlotHost<'_> {
    fn execute(&mut self, command: &str, args: &[String]) -> Option<HostAction> {
        match command {
            "sleep" => Some(self.sleep(args)),
            "hangup" => Some(HostAction::Exit("hangup".to_string())),
            "log" => {
                info!("Slot {}: {}", self.slot, args.join(" "));
                Some(HostAction::Continue)
            }
            _ => self.adapter.execute(command, args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeslot::NullAdapter;

    #[test]
    fn test_builtin_commands() {
        let mut adapter = NullAdapter;
        let mut host = SlotHost::new(0, &mut adapter);

        assert_eq!(host.execute("sleep", &["1.5".into()]), Some(HostAction::Suspend));
        assert_eq!(host.wake(), Some(Duration::from_millis(1500)));
        assert!(matches!(host.execute("sleep", &["soon".into()]), Some(HostAction::Fail(_))));
        assert_eq!(
            host.execute("hangup", &[]),
            Some(HostAction::Exit("hangup".into()))
        );
        assert_eq!(host.execute("log", &["hi".into()]), Some(HostAction::Continue));
        assert_eq!(host.execute("play", &[]), None);
    }
}
