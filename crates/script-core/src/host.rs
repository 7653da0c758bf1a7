//! Application hook for commands the interpreter does not know itself

/// What a host command asks the interpreter to do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAction {
    /// Advance and keep stepping
    Continue,
    /// Advance, then suspend until the caller resumes stepping (for example
    /// after a timer the host armed expires)
    Suspend,
    /// Stop the script with the given reason
    Exit(String),
    /// Route the reason through the script error path
    Fail(String),
}

/// Executes application commands (`Command::Custom`) on behalf of a running
/// interpreter. Arguments arrive with symbols already substituted.
pub trait ScriptHost {
    /// Returns `None` when the command is unknown to this host
    fn execute(&mut self, command: &str, args: &[String]) -> Option<HostAction>;
}

/// Host that knows no commands
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl ScriptHost for NullHost {
    fn execute(&mut self, _command: &str, _args: &[String]) -> Option<HostAction> {
        None
    }
}
