//! Line-oriented reference compiler
//!
//! Turns script source into a [`ScriptImage`]. The grammar is deliberately
//! small: one statement per line, `@name` opens a header, `^event` marks an
//! event handler inside the current header, and lines starting with `#` are
//! comments.
//!
//! ```text
//! @main
//!   set greeting "hello" " world"
//!   foreach item %choices
//!     play %item
//!   loop
//!   exit
//! ^error
//!   hangup
//! ```
//!
//! Application commands (`play` above) must be registered with
//! [`Compiler::register`], which also assigns the resource mask of every line
//! using them. Problems are collected as `file:line: message` diagnostics
//! rather than failing on the first one.

use crate::error::{Diagnostic, Result, ScriptError};
use crate::image::{
    header_key, Arg, AssignOp, Clause, Command, CompareOp, Condition, Header, Join, Line, Mask,
    ScriptImage, Test,
};
use std::collections::HashMap;

const KEYWORDS: &[&str] = &[
    "set", "clear", "var", "expr", "index", "if", "elif", "else", "endif", "case", "otherwise",
    "endcase", "do", "while", "repeat", "foreach", "loop", "until", "break", "continue", "goto",
    "gosub", "invoke", "return", "exit", "error",
];

/// Raw token before classification
#[derive(Debug, Clone, PartialEq)]
struct Token {
    text: String,
    /// Token opened with a quote, so it is always literal text
    quoted: bool,
}

impl Token {
    fn is_bare(&self, word: &str) -> bool {
        !self.quoted && self.text == word
    }

    fn to_arg(&self) -> Arg {
        if self.quoted {
            return Arg::Literal(self.text.clone());
        }
        let text = self.text.as_str();
        if let Some(name) = text.strip_prefix('%') {
            return Arg::Symbol(name.to_string());
        }
        if let Some(name) = text.strip_prefix('@') {
            return Arg::Label(name.to_string());
        }
        if let Some(name) = text.strip_prefix('^') {
            return Arg::Event(name.to_string());
        }
        if let Some((name, value)) = text.split_once('=') {
            if is_identifier(name) {
                let value = Token {
                    text: value.to_string(),
                    quoted: false,
                };
                return Arg::Keyword {
                    name: name.to_string(),
                    value: Box::new(value.to_arg()),
                };
            }
        }
        Arg::Literal(self.text.clone())
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn tokenize(line: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut text = String::new();
        let mut quoted = false;
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            chars.next();
            if c == '"' {
                quoted |= text.is_empty();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '"' {
                        closed = true;
                        break;
                    }
                    text.push(c);
                }
                if !closed {
                    return Err("unterminated string".to_string());
                }
            } else {
                text.push(c);
            }
        }
        tokens.push(Token { text, quoted });
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    If { has_else: bool },
    Case { has_otherwise: bool },
    Loop { until_allowed: bool },
}

impl Block {
    fn name(&self) -> &'static str {
        match self {
            Block::If { .. } => "if",
            Block::Case { .. } => "case",
            Block::Loop { .. } => "loop",
        }
    }
}

/// Result of one compile: the image plus diagnostics and a listing
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    image: ScriptImage,
    errors: Vec<Diagnostic>,
    listing: Vec<String>,
}

impl CompileOutput {
    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    pub fn listing(&self) -> &[String] {
        &self.listing
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn image(&self) -> &ScriptImage {
        &self.image
    }

    /// The image, or every diagnostic when any were reported
    pub fn into_image(self) -> Result<ScriptImage> {
        if self.errors.is_empty() {
            Ok(self.image)
        } else {
            Err(ScriptError::Compile(self.errors))
        }
    }
}

/// Reference compiler with a table of registered application commands
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    commands: HashMap<String, Mask>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application command and the resource mask it requires.
    /// Keywords cannot be overridden.
    pub fn register(&mut self, name: impl Into<String>, mask: Mask) -> &mut Self {
        let name = name.into();
        if !KEYWORDS.contains(&name.as_str()) {
            self.commands.insert(name, mask);
        }
        self
    }

    pub fn with_command(mut self, name: impl Into<String>, mask: Mask) -> Self {
        self.register(name, mask);
        self
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn compile(&self, file: &str, source: &str) -> CompileOutput {
        self.compile_all([(file, source)])
    }

    /// Compile several sources into one image
    pub fn compile_all<'a>(&self, sources: impl IntoIterator<Item = (&'a str, &'a str)>) -> CompileOutput {
        let mut unit = Unit {
            compiler: self,
            headers: Vec::new(),
            errors: Vec::new(),
            listing: Vec::new(),
        };
        for (file, source) in sources {
            unit.file(file, source);
        }
        CompileOutput {
            image: ScriptImage::from_headers(unit.headers),
            errors: unit.errors,
            listing: unit.listing,
        }
    }
}

/// State of one header being compiled
struct Open {
    header: Header,
    blocks: Vec<(Block, u32)>,
    depth: u16,
}

struct Unit<'c> {
    compiler: &'c Compiler,
    headers: Vec<Header>,
    errors: Vec<Diagnostic>,
    listing: Vec<String>,
}

impl<'c> Unit<'c> {
    fn error(&mut self, file: &str, lnum: u32, message: impl Into<String>) {
        self.errors.push(Diagnostic::new(file, lnum, message));
    }

    fn file(&mut self, file: &str, source: &str) {
        let mut open: Option<Open> = None;
        for (n, raw) in source.lines().enumerate() {
            let lnum = n as u32 + 1;
            let text = raw.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }

            if let Some(name) = text.strip_prefix('@') {
                let name = name.trim_end_matches(':').trim();
                if let Some(done) = open.take() {
                    self.close(file, done);
                }
                if name.is_empty() || name.contains(char::is_whitespace) {
                    self.error(file, lnum, format!("invalid header name '{}'", name));
                    continue;
                }
                if self.headers.iter().any(|h| h.name.eq_ignore_ascii_case(name)) {
                    self.error(file, lnum, format!("duplicate header @{}", name));
                }
                self.listing.push(format!("{:04} @{}", lnum, name));
                open = Some(Open {
                    header: Header::new(header_key(name), file),
                    blocks: Vec::new(),
                    depth: 0,
                });
                continue;
            }

            let Some(current) = open.as_mut() else {
                self.error(file, lnum, "statement outside of a header");
                continue;
            };

            if let Some(event) = text.strip_prefix('^') {
                let event = event.trim_end_matches(':').trim();
                if let Some((block, _)) = current.blocks.last() {
                    let message = format!("event ^{} inside open {} block", event, block.name());
                    self.error(file, lnum, message);
                    continue;
                }
                current.header.events.insert(event.to_string(), current.header.lines.len());
                self.listing.push(format!("{:04} ^{}", lnum, event));
                continue;
            }

            let tokens = match tokenize(text) {
                Ok(tokens) => tokens,
                Err(message) => {
                    self.error(file, lnum, message);
                    continue;
                }
            };
            match self.statement(current, &tokens, lnum) {
                Ok(line) => {
                    let indent = "  ".repeat(line.depth as usize);
                    self.listing.push(format!("{:04} {}{}", lnum, indent, text));
                    current.header.mask |= line.mask;
                    current.header.lines.push(line);
                }
                Err(message) => self.error(file, lnum, message),
            }
        }
        if let Some(done) = open.take() {
            self.close(file, done);
        }
    }

    fn close(&mut self, file: &str, open: Open) {
        for (block, lnum) in &open.blocks {
            self.error(file, *lnum, format!("unterminated {} block", block.name()));
        }
        self.headers.push(open.header);
    }

    fn statement(&self, open: &mut Open, tokens: &[Token], lnum: u32) -> std::result::Result<Line, String> {
        let (first, rest) = tokens.split_first().ok_or("empty statement")?;
        if first.quoted {
            return Err(format!("expected command, found \"{}\"", first.text));
        }
        let keyword = first.text.as_str();
        let args = || rest.iter().map(Token::to_arg).collect::<Vec<_>>();
        let target = |what: &str| -> std::result::Result<String, String> {
            match rest.first() {
                Some(tok) if !tok.quoted => Ok(tok.text.trim_start_matches('%').to_string()),
                _ => Err(format!("{} requires a target symbol", what)),
            }
        };
        let depth = open.depth;
        let mut mask: Mask = 0;

        let command = match keyword {
            "set" => Command::Set {
                target: target("set")?,
                values: rest[1..].iter().map(Token::to_arg).collect(),
            },
            "clear" => {
                if rest.is_empty() {
                    return Err("clear requires at least one symbol".into());
                }
                Command::Clear {
                    targets: rest.iter().map(|t| t.text.trim_start_matches('%').to_string()).collect(),
                }
            }
            "var" => {
                let name = target("var")?;
                let mut size = None;
                let mut values = Vec::new();
                for tok in &rest[1..] {
                    match tok.to_arg() {
                        Arg::Keyword { name, value } if name == "size" => {
                            let text = match *value {
                                Arg::Literal(text) => text,
                                _ => return Err("size must be a number".into()),
                            };
                            size = Some(text.parse().map_err(|_| format!("invalid size '{}'", text))?);
                        }
                        other => values.push(other),
                    }
                }
                Command::Var { name, size, values }
            }
            "expr" => {
                let target = target("expr")?;
                let op = rest
                    .get(1)
                    .filter(|t| !t.quoted)
                    .and_then(|t| AssignOp::parse(&t.text))
                    .ok_or("expr requires an assignment operator")?;
                if rest.len() < 3 {
                    return Err("expr requires an expression".into());
                }
                Command::Expr {
                    target,
                    op,
                    expr: rest[2..].iter().map(Token::to_arg).collect(),
                }
            }
            "index" => {
                let target = target("index")?;
                let skip = if rest.get(1).is_some_and(|t| t.is_bare("=")) { 2 } else { 1 };
                if rest.len() <= skip {
                    return Err("index requires an expression".into());
                }
                Command::Index {
                    target,
                    expr: rest[skip..].iter().map(Token::to_arg).collect(),
                }
            }

            "if" => {
                let cond = condition(rest)?;
                open.blocks.push((Block::If { has_else: false }, lnum));
                Command::If { cond }
            }
            "elif" => {
                match open.blocks.last() {
                    Some((Block::If { has_else: false }, _)) => {}
                    Some((Block::If { .. }, _)) => return Err("elif after else".into()),
                    _ => return Err("elif without if".into()),
                }
                Command::Elif { cond: condition(rest)? }
            }
            "else" => {
                match open.blocks.last_mut() {
                    Some((Block::If { has_else }, _)) if !*has_else => *has_else = true,
                    Some((Block::If { .. }, _)) => return Err("duplicate else".into()),
                    _ => return Err("else without if".into()),
                }
                Command::Else
            }
            "endif" => {
                match open.blocks.last() {
                    Some((Block::If { .. }, _)) => {
                        open.blocks.pop();
                    }
                    _ => return Err("endif without if".into()),
                }
                Command::EndIf
            }

            "case" => {
                let cond = condition(rest)?;
                let first = match open.blocks.last() {
                    Some((Block::Case { has_otherwise: true }, _)) => {
                        return Err("case after otherwise".into())
                    }
                    Some((Block::Case { .. }, _)) => false,
                    _ => {
                        open.blocks.push((Block::Case { has_otherwise: false }, lnum));
                        true
                    }
                };
                Command::Case { cond, first }
            }
            "otherwise" => {
                match open.blocks.last_mut() {
                    Some((Block::Case { has_otherwise }, _)) if !*has_otherwise => *has_otherwise = true,
                    Some((Block::Case { .. }, _)) => return Err("duplicate otherwise".into()),
                    _ => return Err("otherwise without case".into()),
                }
                Command::Otherwise
            }
            "endcase" => {
                match open.blocks.last() {
                    Some((Block::Case { .. }, _)) => {
                        open.blocks.pop();
                    }
                    _ => return Err("endcase without case".into()),
                }
                Command::EndCase
            }

            "do" | "while" | "repeat" | "foreach" => {
                let command = match keyword {
                    "do" => Command::Do,
                    "while" => Command::While { cond: condition(rest)? },
                    "repeat" => Command::Repeat {
                        count: rest.first().map(Token::to_arg).ok_or("repeat requires a count")?,
                    },
                    _ => {
                        let target = target("foreach")?;
                        let list = rest.get(1).map(Token::to_arg).ok_or("foreach requires a list")?;
                        let delimiter = match rest.get(2) {
                            None => ',',
                            Some(tok) => {
                                let mut chars = tok.text.chars();
                                match (chars.next(), chars.next()) {
                                    (Some(c), None) => c,
                                    _ => return Err("foreach delimiter must be one character".into()),
                                }
                            }
                        };
                        Command::Foreach { target, list, delimiter }
                    }
                };
                open.blocks.push((Block::Loop { until_allowed: keyword == "do" }, lnum));
                open.depth += 1;
                command
            }
            "loop" | "until" => {
                let until_allowed = match open.blocks.last() {
                    Some((Block::Loop { until_allowed }, _)) => *until_allowed,
                    _ => return Err(format!("{} without loop", keyword)),
                };
                let command = if keyword == "until" {
                    if !until_allowed {
                        return Err("until only closes a do loop".into());
                    }
                    Command::Until { cond: condition(rest)? }
                } else {
                    Command::Loop
                };
                open.blocks.pop();
                open.depth = open.depth.saturating_sub(1);
                command
            }
            "break" | "continue" => {
                if !open.blocks.iter().any(|(b, _)| matches!(b, Block::Loop { .. })) {
                    return Err(format!("{} outside of loop", keyword));
                }
                if keyword == "break" {
                    Command::Break
                } else {
                    Command::Continue
                }
            }

            "goto" | "gosub" => {
                if rest.is_empty() {
                    return Err(format!("{} requires a destination", keyword));
                }
                let targets = args();
                if keyword == "goto" {
                    Command::Goto { targets }
                } else {
                    Command::Gosub { targets }
                }
            }
            "invoke" => {
                let target = match rest.first() {
                    Some(tok) if !tok.quoted => header_key(&tok.text).to_string(),
                    _ => return Err("invoke requires a subroutine".into()),
                };
                let mut bound = Vec::new();
                for tok in &rest[1..] {
                    match tok.to_arg() {
                        Arg::Keyword { name, value } => bound.push((name, *value)),
                        _ => return Err(format!("invoke argument '{}' must be name=value", tok.text)),
                    }
                }
                Command::Invoke { target, args: bound }
            }
            "return" => Command::Return,
            "exit" => Command::Exit,
            "error" => Command::Error { message: args() },

            name => match self.compiler.commands.get(name) {
                Some(&command_mask) => {
                    mask = command_mask;
                    Command::Custom {
                        name: name.to_string(),
                        args: args(),
                    }
                }
                None => return Err(format!("unknown command '{}'", name)),
            },
        };

        // Openers take the outer depth, closers the body depth; both were
        // captured before the counter moved
        Ok(Line {
            command,
            depth,
            mask,
            lnum,
        })
    }
}

/// Parse `[!] test ((and|or) [!] test)*`
fn condition(tokens: &[Token]) -> std::result::Result<Condition, String> {
    if tokens.is_empty() {
        return Err("missing condition".into());
    }
    let mut clauses = Vec::new();
    let mut join = Join::First;
    for part in tokens.split_inclusive(|t| t.is_bare("and") || t.is_bare("or")) {
        let (test_tokens, next) = match part.last() {
            Some(last) if last.is_bare("and") => (&part[..part.len() - 1], Join::And),
            Some(last) if last.is_bare("or") => (&part[..part.len() - 1], Join::Or),
            _ => (part, Join::First),
        };
        let (negate, test_tokens) = match test_tokens.split_first() {
            Some((first, rest)) if first.is_bare("!") || first.is_bare("not") => (true, rest),
            _ => (false, test_tokens),
        };
        let test = match test_tokens {
            [op, arg] if op.is_bare("-empty") => Test::Empty(arg.to_arg()),
            [op, name] if op.is_bare("-defined") => {
                Test::Defined(name.text.trim_start_matches('%').to_string())
            }
            [lhs, op, rhs] if !op.quoted && CompareOp::parse(&op.text).is_some() => Test::Compare {
                lhs: lhs.to_arg(),
                op: CompareOp::parse(&op.text).unwrap_or(CompareOp::StrEq),
                rhs: rhs.to_arg(),
            },
            [value] => Test::Value(value.to_arg()),
            _ => return Err("invalid condition".into()),
        };
        clauses.push(Clause { join, negate, test });
        join = next;
    }
    if join != Join::First {
        return Err("condition ends with a conjunction".into());
    }
    Ok(Condition { clauses })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tokenize_quotes_and_sigils() {
        let tokens = tokenize(r#"set x "a b" %y @z ^w k=v"#).unwrap();
        let args: Vec<Arg> = tokens.iter().map(Token::to_arg).collect();
        assert_eq!(
            args,
            vec![
                Arg::Literal("set".into()),
                Arg::Literal("x".into()),
                Arg::Literal("a b".into()),
                Arg::Symbol("y".into()),
                Arg::Label("z".into()),
                Arg::Event("w".into()),
                Arg::Keyword {
                    name: "k".into(),
                    value: Box::new(Arg::Literal("v".into())),
                },
            ]
        );
        assert!(tokenize(r#"set x "open"#).is_err());
    }

    #[test]
    fn test_loop_depths() {
        let out = Compiler::new().compile(
            "t.scr",
            "@main\nset a 1\ndo\nwhile %a -lt 3\nexpr a += 1\nloop\nuntil %a -ge 3\nexit\n",
        );
        assert!(out.is_ok(), "{:?}", out.errors());
        let depths: Vec<u16> = out.image().header("main").unwrap().lines.iter().map(|l| l.depth).collect();
        assert_eq!(depths, vec![0, 0, 1, 2, 2, 1, 0]);
    }

    #[test]
    fn test_case_first_marker() {
        let out = Compiler::new().compile(
            "t.scr",
            "@main\ncase %a == 1\nexit\ncase %a == 2\nexit\notherwise\nexit\nendcase\n",
        );
        assert!(out.is_ok(), "{:?}", out.errors());
        let firsts: Vec<bool> = out
            .image()
            .header("main")
            .unwrap()
            .lines
            .iter()
            .filter_map(|l| match l.command {
                Command::Case { first, .. } => Some(first),
                _ => None,
            })
            .collect();
        assert_eq!(firsts, vec![true, false]);
    }

    #[test]
    fn test_case_nests_only_inside_another_block() {
        let source = "@main
case %a == 1
  case %b == 2
  mark
otherwise
  if %b
    case %c == 3
      mark
    endcase
  endif
endcase
";
        let out = Compiler::new().with_command("mark", 0).compile("t.scr", source);
        assert!(out.is_ok(), "{:?}", out.errors());
        let firsts: Vec<bool> = out
            .image()
            .header("main")
            .unwrap()
            .lines
            .iter()
            .filter_map(|l| match l.command {
                Command::Case { first, .. } => Some(first),
                _ => None,
            })
            .collect();
        // the second case continues the outer chain; the one under `if` opens a block
        assert_eq!(firsts, vec![true, false, true]);

        let out = Compiler::new().compile("t.scr", "@main\ncase %a\notherwise\ncase %b\nendcase\n");
        assert_eq!(out.errors()[0].to_string(), "t.scr:4: case after otherwise");
    }

    #[test]
    fn test_header_names_ignore_case() {
        let out = Compiler::new().compile("t.scr", "@Main\ninvoke @GREETING\nexit\n@greeting\nreturn\n");
        assert!(out.is_ok(), "{:?}", out.errors());
        let image = out.image();
        assert_eq!(image.index_of("@MAIN"), Some(0));
        assert_eq!(image.index_of("greeting"), Some(1));
        assert_eq!(image.header("main").unwrap().name, "Main");
        assert_eq!(image.line_count(), 3);

        let out = Compiler::new().compile("t.scr", "@main\nexit\n@MAIN\nexit\n");
        assert_eq!(out.errors()[0].to_string(), "t.scr:3: duplicate header @MAIN");
    }

    #[test]
    fn test_hash_lines_are_comments() {
        let out = Compiler::new().compile("t.scr", "#=== banner\n@main\n# note\nexpr x #= 3\nexit\n");
        assert!(out.is_ok(), "{:?}", out.errors());
        let lines = &out.image().header("main").unwrap().lines;
        assert_eq!(lines.len(), 2);
        assert!(matches!(lines[0].command, Command::Expr { op: AssignOp::Mod, .. }));
    }

    #[test]
    fn test_condition_chain() {
        let tokens = tokenize("! -empty %a and %b -gt 2 or ready").unwrap();
        let cond = condition(&tokens).unwrap();
        assert_eq!(cond.clauses.len(), 3);
        assert!(cond.clauses[0].negate);
        assert_eq!(cond.clauses[1].join, Join::And);
        assert_eq!(cond.clauses[2].join, Join::Or);
        assert!(condition(&tokenize("%a -gt").unwrap()).is_err());
        assert!(condition(&tokenize("%a and").unwrap()).is_err());
    }
}
