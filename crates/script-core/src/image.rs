//! Compiled, immutable script images
//!
//! A [`ScriptImage`] is a set of named [`Header`]s, each an ordered list of
//! [`Line`]s. Images are built once by the compiler and then shared read-only
//! behind an `Arc` by every interpreter executing them; the image is freed
//! when the last holder lets go.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;

/// Bitmask of hardware/DSP capabilities a script path requires
pub type Mask = u64;

/// Strip the `@` sigil from a header name
pub fn header_key(name: &str) -> &str {
    name.strip_prefix('@').unwrap_or(name)
}

/// Header names match regardless of ASCII case
fn lookup_key(name: &str) -> String {
    header_key(name).to_ascii_lowercase()
}

/// One argument of a compiled command
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Literal text
    Literal(String),
    /// `%name` symbol reference
    Symbol(String),
    /// `@name` header reference
    Label(String),
    /// `^name` event handler reference
    Event(String),
    /// `name=value` keyword argument
    Keyword { name: String, value: Box<Arg> },
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Literal(text) if text.is_empty() || text.contains(char::is_whitespace) => {
                write!(f, "\"{}\"", text)
            }
            Arg::Literal(text) => write!(f, "{}", text),
            Arg::Symbol(name) => write!(f, "%{}", name),
            Arg::Label(name) => write!(f, "@{}", name),
            Arg::Event(name) => write!(f, "^{}", name),
            Arg::Keyword { name, value } => write!(f, "{}={}", name, value),
        }
    }
}

/// Assignment form used by `expr`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=` or `:=`
    Set,
    /// `+=`
    Add,
    /// `-=`
    Sub,
    /// `*=`
    Mul,
    /// `/=`
    Div,
    /// `#=`
    Mod,
    /// `?=` assigns only when the target is empty
    IfEmpty,
}

impl AssignOp {
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "=" | ":=" => AssignOp::Set,
            "+=" => AssignOp::Add,
            "-=" => AssignOp::Sub,
            "*=" => AssignOp::Mul,
            "/=" => AssignOp::Div,
            "#=" => AssignOp::Mod,
            "?=" => AssignOp::IfEmpty,
            _ => return None,
        })
    }
}

/// Comparison operator inside a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    NumEq,
    NumNe,
    NumLt,
    NumLe,
    NumGt,
    NumGe,
    StrEq,
    StrNe,
}

impl CompareOp {
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "-eq" => CompareOp::NumEq,
            "-ne" => CompareOp::NumNe,
            "-lt" => CompareOp::NumLt,
            "-le" => CompareOp::NumLe,
            "-gt" => CompareOp::NumGt,
            "-ge" => CompareOp::NumGe,
            "==" => CompareOp::StrEq,
            "!=" => CompareOp::StrNe,
            _ => return None,
        })
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, CompareOp::StrEq | CompareOp::StrNe)
    }
}

/// How a clause joins the clauses before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    First,
    And,
    Or,
}

/// A single test inside a condition
#[derive(Debug, Clone, PartialEq)]
pub enum Test {
    Compare { lhs: Arg, op: CompareOp, rhs: Arg },
    Empty(Arg),
    Defined(String),
    Value(Arg),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub join: Join,
    pub negate: bool,
    pub test: Test,
}

/// Clauses evaluated left to right, without precedence
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Condition {
    pub clauses: Vec<Clause>,
}

/// Compiled command with only the fields its kind needs
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set { target: String, values: Vec<Arg> },
    Clear { targets: Vec<String> },
    Var { name: String, size: Option<usize>, values: Vec<Arg> },
    Expr { target: String, op: AssignOp, expr: Vec<Arg> },
    Index { target: String, expr: Vec<Arg> },

    If { cond: Condition },
    Elif { cond: Condition },
    Else,
    EndIf,

    /// `first` marks the branch that opens the block
    Case { cond: Condition, first: bool },
    Otherwise,
    EndCase,

    Do,
    While { cond: Condition },
    Repeat { count: Arg },
    Foreach { target: String, list: Arg, delimiter: char },
    Loop,
    Until { cond: Condition },
    Break,
    Continue,

    Goto { targets: Vec<Arg> },
    Gosub { targets: Vec<Arg> },
    Invoke { target: String, args: Vec<(String, Arg)> },
    Return,
    Exit,
    Error { message: Vec<Arg> },

    /// Application command dispatched to the script host
    Custom { name: String, args: Vec<Arg> },
}

impl Command {
    /// Keyword this command was compiled from
    pub fn keyword(&self) -> &str {
        match self {
            Command::Set { .. } => "set",
            Command::Clear { .. } => "clear",
            Command::Var { .. } => "var",
            Command::Expr { .. } => "expr",
            Command::Index { .. } => "index",
            Command::If { .. } => "if",
            Command::Elif { .. } => "elif",
            Command::Else => "else",
            Command::EndIf => "endif",
            Command::Case { .. } => "case",
            Command::Otherwise => "otherwise",
            Command::EndCase => "endcase",
            Command::Do => "do",
            Command::While { .. } => "while",
            Command::Repeat { .. } => "repeat",
            Command::Foreach { .. } => "foreach",
            Command::Loop => "loop",
            Command::Until { .. } => "until",
            Command::Break => "break",
            Command::Continue => "continue",
            Command::Goto { .. } => "goto",
            Command::Gosub { .. } => "gosub",
            Command::Invoke { .. } => "invoke",
            Command::Return => "return",
            Command::Exit => "exit",
            Command::Error { .. } => "error",
            Command::Custom { name, .. } => name,
        }
    }
}

/// One compiled statement
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub command: Command,
    /// Loop nesting depth; loop bodies and their closer sit one deeper
    /// than the opener
    pub depth: u16,
    pub mask: Mask,
    /// Source line number, for diagnostics
    pub lnum: u32,
}

/// A named label or subroutine
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub name: String,
    pub file: String,
    pub lines: Vec<Line>,
    /// `^event` handler name to first line index
    pub events: HashMap<String, usize>,
    /// Union of the masks of every line in the header
    pub mask: Mask,
}

impl Header {
    pub fn new(name: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            lines: Vec::new(),
            events: HashMap::new(),
            mask: 0,
        }
    }

    pub fn event(&self, name: &str) -> Option<usize> {
        self.events.get(name).copied()
    }
}

/// Immutable compiled program
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScriptImage {
    headers: IndexMap<String, Header>,
}

impl ScriptImage {
    /// Build an image from compiled headers. Later headers with the same
    /// name, compared without ASCII case, replace earlier ones.
    pub fn from_headers(headers: impl IntoIterator<Item = Header>) -> Self {
        let headers = headers
            .into_iter()
            .map(|h| (lookup_key(&h.name), h))
            .collect();
        Self { headers }
    }

    pub fn header(&self, name: &str) -> Option<&Header> {
        self.headers.get(&lookup_key(name))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.headers.get_index_of(&lookup_key(name))
    }

    pub fn header_at(&self, index: usize) -> Option<&Header> {
        self.headers.get_index(index).map(|(_, h)| h)
    }

    pub fn headers(&self) -> impl Iterator<Item = &Header> {
        self.headers.values()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Total number of compiled lines across all headers
    pub fn line_count(&self) -> usize {
        self.headers.values().map(|h| h.lines.len()).sum()
    }
}
