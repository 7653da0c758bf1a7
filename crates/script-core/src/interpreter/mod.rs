//! Stack-based script interpreter
//!
//! An [`Interpreter`] executes one [`ScriptImage`] at a time, one line per
//! [`Interpreter::step`]. It never blocks: anything that has to wait (a
//! timer, a prompt, digit collection) is a host command that returns
//! [`HostAction::Suspend`], and the caller resumes stepping later.
//!
//! ## Frames
//!
//! Every subroutine call and every loop entry pushes a [`Frame`]. The frame
//! created by [`Interpreter::attach`] is the script base: `exit`, and
//! `return` at base level, unwind to it and stop the script, so a finished
//! script always sits at the depth it was attached at.
//!
//! ## Faults
//!
//! Unresolved symbols or labels, stack exhaustion, divide-by-zero and failed
//! host commands all go through [`Interpreter::error`]. A `^error` handler in
//! the current header (or any calling header) takes over when present;
//! otherwise the script exits with [`ExitReason::Error`].
//!
//! ## Resource masks
//!
//! Each header carries the union of its lines' resource masks, and frames
//! accumulate the masks down the call chain. When a step changes the
//! accumulated mask, `step` returns `false` even though the script is still
//! running, so the caller can re-arm hardware before stepping again.

mod flow;
mod frame;

pub use frame::{Frame, FrameKind};

use crate::error::{Result, ScriptError};
use crate::expr::{self, Decimal};
use crate::host::{HostAction, ScriptHost};
use crate::image::{Arg, AssignOp, Command, CompareOp, Condition, Header, Join, Mask, ScriptImage, Test};
use crate::symbols::{Scope, SymbolArena};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default entry point used when `attach` is not given one
pub const DEFAULT_ENTRY: &str = "@main";

/// Interpreter limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterConfig {
    /// Maximum frame stack depth
    pub max_frames: usize,
    /// Maximum symbols per call
    pub max_symbols: usize,
    /// Default symbol size in bytes
    pub symbol_size: usize,
    /// Maximum fractional digits kept by `expr`
    pub decimals: u8,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_frames: 32,
            max_symbols: 256,
            symbol_size: 64,
            decimals: 2,
        }
    }
}

/// Why a script stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// `exit`, `return` at base level, or end of the entry header
    Exit,
    /// A host command ended the script
    Host(String),
    /// Unhandled script error
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RunState {
    Detached,
    Running,
    Exited(ExitReason),
}

pub struct Interpreter {
    config: InterpreterConfig,
    image: Option<Arc<ScriptImage>>,
    frames: Vec<Frame>,
    symbols: SymbolArena,
    state: RunState,
    last_error: Option<String>,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("state", &self.state)
            .field("depth", &self.frames.len())
            .field("symbols", &self.symbols.len())
            .finish()
    }
}

impl Interpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        let symbols = SymbolArena::new(config.max_symbols, config.symbol_size);
        Self {
            frames: Vec::with_capacity(config.max_frames),
            config,
            image: None,
            symbols,
            state: RunState::Detached,
            last_error: None,
        }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Bind to `entry` (default `@main`) in `image`, retaining the image.
    /// Returns `false`, without retaining anything, when the entry is absent.
    pub fn attach(&mut self, image: Arc<ScriptImage>, entry: Option<&str>) -> bool {
        let entry = entry.unwrap_or(DEFAULT_ENTRY);
        let Some(index) = image.index_of(entry) else {
            debug!("Attach failed: entry {} not in image", entry);
            return false;
        };
        if self.image.is_some() {
            self.detach();
        }
        let mask = image.header_at(index).map(|h| h.mask).unwrap_or(0);
        self.frames.push(Frame::base(index, mask));
        self.image = Some(image);
        self.state = RunState::Running;
        debug!("Attached interpreter at {}", entry);
        true
    }

    /// Release the image and reset for reuse
    pub fn detach(&mut self) {
        self.image = None;
        self.frames.clear();
        self.symbols.reset();
        self.last_error = None;
        self.state = RunState::Detached;
    }

    pub fn image(&self) -> Option<&Arc<ScriptImage>> {
        self.image.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.image.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    pub fn exit_reason(&self) -> Option<&ExitReason> {
        match &self.state {
            RunState::Exited(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Accumulated resource mask of the executing frame
    pub fn mask(&self) -> Mask {
        self.frames.last().map(|f| f.mask).unwrap_or(0)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Read a symbol as seen from the executing header
    pub fn symbol(&self, name: &str) -> Option<&str> {
        self.symbols.lookup(self.scope(), name).map(|s| s.value())
    }

    /// Store a global symbol, e.g. call identity before the first step
    pub fn set_symbol(&mut self, name: &str, value: &str) -> Result<()> {
        self.symbols.assign(None, name, value)
    }

    /// Execute the current line. Returns `true` when stepping may continue,
    /// `false` when the script stopped or must suspend (host wait or a
    /// resource mask change).
    pub fn step(&mut self, host: &mut dyn ScriptHost) -> bool {
        if !self.is_running() {
            return false;
        }
        let Some(image) = self.image.clone() else {
            return false;
        };
        let before = self.mask();
        let proceed = match self.execute(&image, host) {
            Ok(proceed) => proceed,
            Err(err) => self.error(&err.to_string()),
        };
        if !self.is_running() {
            return false;
        }
        let after = self.mask();
        if after != before {
            debug!("Resource mask changed {:#x} -> {:#x}", before, after);
            return false;
        }
        proceed
    }

    /// Abort the current flow. Hands control to the nearest `^error`
    /// handler and returns `true`, or stops the script and returns `false`.
    pub fn error(&mut self, text: &str) -> bool {
        if !self.is_running() {
            return false;
        }
        self.last_error = Some(text.to_string());
        if let Some(image) = self.image.clone() {
            for i in (0..self.frames.len()).rev() {
                let frame = &self.frames[i];
                if frame.is_loop() {
                    continue;
                }
                if frame.trapped {
                    break;
                }
                let handler = image.header_at(frame.header).and_then(|h| h.event("error"));
                if let Some(line) = handler {
                    self.frames.truncate(i + 1);
                    let frame = &mut self.frames[i];
                    frame.line = line;
                    frame.trapped = true;
                    debug!("Script error trapped: {}", text);
                    return true;
                }
            }
        }
        match self.location() {
            Some(at) => warn!("Script error at {}: {}", at, text),
            None => warn!("Script error: {}", text),
        }
        self.finish(ExitReason::Error(text.to_string()));
        false
    }

    /// Transfer control to a `^event` handler of the executing header or one
    /// of its callers. Returns `false` when no handler exists.
    pub fn trigger(&mut self, event: &str) -> bool {
        if !self.is_running() {
            return false;
        }
        let Some(image) = self.image.clone() else {
            return false;
        };
        for i in (0..self.frames.len()).rev() {
            if self.frames[i].is_loop() {
                continue;
            }
            let handler = image
                .header_at(self.frames[i].header)
                .and_then(|h| h.event(event));
            if let Some(line) = handler {
                self.frames.truncate(i + 1);
                self.frames[i].line = line;
                debug!("Event {} dispatched to handler", event);
                return true;
            }
        }
        false
    }

    /// `file:line (keyword)` of the executing line
    fn location(&self) -> Option<String> {
        let frame = self.frames.last()?;
        let header = self.image.as_ref()?.header_at(frame.header)?;
        let line = header.lines.get(frame.line)?;
        Some(format!("{}:{} ({})", header.file, line.lnum, line.command.keyword()))
    }

    fn finish(&mut self, reason: ExitReason) {
        self.frames.truncate(1);
        debug!("Script finished: {:?}", reason);
        self.state = RunState::Exited(reason);
    }

    fn scope(&self) -> Scope {
        self.frames.last().map(|f| f.header)
    }

    fn top(&mut self) -> &mut Frame {
        // step() only runs while attached, and attach always pushes a base frame
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn advance(&mut self) {
        self.top().line += 1;
    }

    fn jump(&mut self, line: usize) {
        self.top().line = line;
    }

    fn push(&mut self, frame: Frame) -> Result<()> {
        if self.frames.len() >= self.config.max_frames {
            return Err(ScriptError::StackOverflow {
                depth: self.frames.len() + 1,
            });
        }
        self.frames.push(frame);
        Ok(())
    }

    fn execute(&mut self, image: &ScriptImage, host: &mut dyn ScriptHost) -> Result<bool> {
        let (h, l) = match self.frames.last() {
            Some(frame) => (frame.header, frame.line),
            None => return Ok(false),
        };
        let header = image
            .header_at(h)
            .ok_or_else(|| ScriptError::LabelNotFound { targets: format!("#{}", h) })?;
        let Some(line) = header.lines.get(l) else {
            return self.return_from();
        };

        match &line.command {
            Command::Set { target, values } => {
                let value = self.concat(values)?;
                let scope = self.scope();
                self.symbols.assign(scope, target, &value)?;
                self.advance();
            }
            Command::Clear { targets } => {
                let scope = self.scope();
                for target in targets {
                    self.symbols.clear_value(scope, target);
                }
                self.advance();
            }
            Command::Var { name, size, values } => {
                let value = self.concat(values)?;
                let scope = self.scope();
                self.symbols.define(scope, name, *size)?;
                if !values.is_empty() {
                    self.symbols.assign_scoped(scope, name, &value)?;
                }
                self.advance();
            }
            Command::Expr { target, op, expr } => {
                let decimals = self.config.decimals;
                self.assign_expr(target, *op, expr, decimals)?;
                self.advance();
            }
            Command::Index { target, expr } => {
                self.assign_expr(target, AssignOp::Set, expr, 0)?;
                self.advance();
            }

            Command::If { .. } => self.select_if(header, l)?,
            Command::Elif { .. } | Command::Else => {
                self.jump(flow::find_endif(&header.lines, l) + 1);
            }
            Command::EndIf | Command::EndCase => self.advance(),
            Command::Case { first: true, .. } => self.select_case(header, l)?,
            Command::Case { .. } | Command::Otherwise => {
                self.jump(flow::find_endcase(&header.lines, l) + 1);
            }

            Command::Do => {
                self.enter_loop(l)?;
                self.advance();
            }
            Command::While { cond } => {
                self.enter_loop(l)?;
                if self.condition(cond)? {
                    self.advance();
                } else {
                    self.break_loop(header)?;
                }
            }
            Command::Repeat { count } => {
                self.enter_loop(l)?;
                let text = self.value(count)?;
                let limit: usize = text
                    .trim()
                    .parse()
                    .map_err(|_| ScriptError::invalid_number(text.clone()))?;
                if self.top().index < limit {
                    self.advance();
                } else {
                    self.break_loop(header)?;
                }
            }
            Command::Foreach { target, list, delimiter } => {
                self.enter_loop(l)?;
                let list = self.value(list)?;
                let index = self.top().index;
                let item = if list.is_empty() {
                    None
                } else {
                    list.split(*delimiter).nth(index)
                };
                match item {
                    Some(item) => {
                        let scope = self.scope();
                        self.symbols.assign(scope, target, item)?;
                        self.advance();
                    }
                    None => self.break_loop(header)?,
                }
            }
            Command::Loop => self.continue_loop("loop")?,
            Command::Until { cond } => {
                if self.condition(cond)? {
                    if !self.top().is_loop() {
                        return Err(ScriptError::NotInLoop { command: "until" });
                    }
                    self.frames.pop();
                    self.jump(l + 1);
                } else {
                    self.continue_loop("until")?;
                }
            }
            Command::Break => self.break_loop(header)?,
            Command::Continue => self.continue_loop("continue")?,

            Command::Goto { targets } => {
                let (target, line, _) = self.resolve(image, header, targets)?;
                while self.frames.len() > 1 && self.top().is_loop() {
                    self.frames.pop();
                }
                let inherited = self
                    .frames
                    .len()
                    .checked_sub(2)
                    .map(|i| self.frames[i].mask)
                    .unwrap_or(0);
                let mask = inherited | image.header_at(target).map(|h| h.mask).unwrap_or(0);
                let frame = self.top();
                // leaving the handler's header re-arms `^error` for the new one
                if frame.header != target || line == 0 {
                    frame.trapped = false;
                }
                frame.header = target;
                frame.line = line;
                frame.mask = mask;
            }
            Command::Gosub { targets } => {
                let (target, line, destination) = self.resolve(image, header, targets)?;
                let mask = self.mask() | image.header_at(target).map(|h| h.mask).unwrap_or(0);
                self.push(Frame {
                    header: target,
                    line,
                    kind: FrameKind::Gosub { destination },
                    index: 0,
                    mask,
                    trapped: false,
                })?;
            }
            Command::Invoke { target, args } => {
                let index = image.index_of(target).ok_or_else(|| ScriptError::LabelNotFound {
                    targets: format!("@{}", target),
                })?;
                let mut bound = Vec::with_capacity(args.len());
                for (name, arg) in args {
                    bound.push((name, self.value(arg)?));
                }
                let mask = self.mask() | image.header_at(index).map(|h| h.mask).unwrap_or(0);
                self.push(Frame {
                    header: index,
                    line: 0,
                    kind: FrameKind::Invoke,
                    index: 0,
                    mask,
                    trapped: false,
                })?;
                for (name, value) in bound {
                    self.symbols.assign_scoped(Some(index), name, &value)?;
                }
            }
            Command::Return => return self.return_from(),
            Command::Exit => {
                self.finish(ExitReason::Exit);
                return Ok(false);
            }
            Command::Error { message } => {
                let message = self.concat(message)?;
                return Err(ScriptError::Raised { message });
            }

            Command::Custom { name, args } => {
                let values = self.values(args)?;
                match host.execute(name, &values) {
                    None => return Err(ScriptError::UnknownCommand { name: name.clone() }),
                    Some(HostAction::Continue) => self.advance(),
                    Some(HostAction::Suspend) => {
                        self.advance();
                        return Ok(false);
                    }
                    Some(HostAction::Exit(reason)) => {
                        self.finish(ExitReason::Host(reason));
                        return Ok(false);
                    }
                    Some(HostAction::Fail(reason)) => {
                        return Err(ScriptError::CommandFailed {
                            command: name.clone(),
                            reason,
                        })
                    }
                }
            }
        }
        Ok(true)
    }

    fn assign_expr(&mut self, target: &str, op: AssignOp, expr: &[Arg], decimals: u8) -> Result<()> {
        let current = self.symbol(target).unwrap_or("").to_string();
        if op == AssignOp::IfEmpty && !current.is_empty() {
            return Ok(());
        }
        let fragments = self.values(expr)?;
        let value = expr::evaluate(&fragments, decimals)?;
        let result = expr::apply(&current, op, value, decimals)?;
        let scope = self.scope();
        self.symbols.assign(scope, target, &result.to_string())
    }

    /// Run the `if` chain starting at `at`, landing on the first true branch
    fn select_if(&mut self, header: &Header, mut at: usize) -> Result<()> {
        loop {
            let taken = match header.lines.get(at).map(|l| &l.command) {
                Some(Command::If { cond }) | Some(Command::Elif { cond }) => self.condition(cond)?,
                _ => true,
            };
            if taken {
                self.jump(at + 1);
                return Ok(());
            }
            at = flow::next_if_branch(&header.lines, at);
        }
    }

    /// Run the `case` chain starting at `at`; exactly one branch is entered
    fn select_case(&mut self, header: &Header, mut at: usize) -> Result<()> {
        loop {
            let taken = match header.lines.get(at).map(|l| &l.command) {
                Some(Command::Case { cond, .. }) => self.condition(cond)?,
                _ => true,
            };
            if taken {
                self.jump(at + 1);
                return Ok(());
            }
            at = flow::next_case_branch(&header.lines, at);
        }
    }

    /// Push a loop frame unless this opener already owns the top frame
    fn enter_loop(&mut self, opener: usize) -> Result<()> {
        let top = self.top();
        if top.opener() == Some(opener) {
            top.line = opener;
            return Ok(());
        }
        let frame = Frame {
            kind: FrameKind::Loop { opener },
            index: 0,
            trapped: false,
            ..top.clone()
        };
        self.push(frame)
    }

    fn break_loop(&mut self, header: &Header) -> Result<()> {
        let (opener, from) = match self.frames.last() {
            Some(frame) if frame.is_loop() => (frame.opener().unwrap_or(0), frame.line),
            _ => return Err(ScriptError::NotInLoop { command: "break" }),
        };
        self.frames.pop();
        let depth = header.lines.get(opener).map(|l| l.depth).unwrap_or(0);
        self.jump(flow::skip_loop(&header.lines, from, depth));
        Ok(())
    }

    fn continue_loop(&mut self, command: &'static str) -> Result<()> {
        let top = self.top();
        let opener = top.opener().ok_or(ScriptError::NotInLoop { command })?;
        top.index += 1;
        top.line = opener;
        Ok(())
    }

    /// Pop to the innermost call frame and resume after its call site, or
    /// finish the script at base level
    fn return_from(&mut self) -> Result<bool> {
        while self.frames.len() > 1 && self.top().is_loop() {
            self.frames.pop();
        }
        if self.frames.len() <= 1 || !self.top().is_call() {
            self.finish(ExitReason::Exit);
            return Ok(false);
        }
        self.frames.pop();
        self.advance();
        Ok(true)
    }

    /// Resolve the first destination that exists, left to right
    fn resolve(&self, image: &ScriptImage, current: &Header, targets: &[Arg]) -> Result<(usize, usize, usize)> {
        let here = self.frames.last().map(|f| f.header).unwrap_or(0);
        for (destination, target) in targets.iter().enumerate() {
            let text = match target {
                Arg::Label(name) => format!("@{}", name),
                Arg::Event(name) => format!("^{}", name),
                other => match self.value(other) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
            };
            let found = match text.strip_prefix('^') {
                Some(event) => current.event(event).map(|line| (here, line)),
                None => image.index_of(&text).map(|index| (index, 0)),
            };
            if let Some((header, line)) = found {
                return Ok((header, line, destination));
            }
        }
        Err(ScriptError::LabelNotFound {
            targets: targets.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(" "),
        })
    }

    fn builtin(&self, name: &str) -> Option<String> {
        match name {
            "index" => Some(
                self.frames
                    .iter()
                    .rev()
                    .find(|f| f.is_loop())
                    .map(|f| f.index)
                    .unwrap_or(0)
                    .to_string(),
            ),
            "error" => Some(self.last_error.clone().unwrap_or_default()),
            "depth" => Some(self.frames.len().to_string()),
            _ => None,
        }
    }

    fn value(&self, arg: &Arg) -> Result<String> {
        Ok(match arg {
            Arg::Literal(text) => text.clone(),
            Arg::Symbol(name) => match self.symbol(name) {
                Some(value) => value.to_string(),
                None => self
                    .builtin(name)
                    .ok_or_else(|| ScriptError::symbol_not_found(name.clone()))?,
            },
            Arg::Label(name) => format!("@{}", name),
            Arg::Event(name) => format!("^{}", name),
            Arg::Keyword { name, value } => format!("{}={}", name, self.value(value)?),
        })
    }

    fn values(&self, args: &[Arg]) -> Result<Vec<String>> {
        args.iter().map(|arg| self.value(arg)).collect()
    }

    fn concat(&self, args: &[Arg]) -> Result<String> {
        let mut out = String::new();
        for arg in args {
            out.push_str(&self.value(arg)?);
        }
        Ok(out)
    }

    fn test(&self, test: &Test) -> Result<bool> {
        Ok(match test {
            Test::Compare { lhs, op, rhs } => {
                let (a, b) = (self.value(lhs)?, self.value(rhs)?);
                if !op.is_numeric() {
                    return Ok((a == b) == (*op == CompareOp::StrEq));
                }
                let ordering = Decimal::parse(&a)?.cmp(&Decimal::parse(&b)?);
                match op {
                    CompareOp::NumEq => ordering == Ordering::Equal,
                    CompareOp::NumNe => ordering != Ordering::Equal,
                    CompareOp::NumLt => ordering == Ordering::Less,
                    CompareOp::NumLe => ordering != Ordering::Greater,
                    CompareOp::NumGt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }
            }
            Test::Empty(arg) => match arg {
                Arg::Symbol(name) => self.symbol(name).map_or(true, str::is_empty),
                other => self.value(other)?.is_empty(),
            },
            Test::Defined(name) => self.symbol(name).is_some(),
            Test::Value(arg) => {
                let value = self.value(arg)?;
                !(value.is_empty() || value == "0" || value.eq_ignore_ascii_case("false"))
            }
        })
    }

    fn condition(&self, cond: &Condition) -> Result<bool> {
        let mut result = true;
        for clause in &cond.clauses {
            let value = self.test(&clause.test)? != clause.negate;
            result = match clause.join {
                Join::First => value,
                Join::And => result && value,
                Join::Or => result || value,
            };
        }
        Ok(result)
    }
}
