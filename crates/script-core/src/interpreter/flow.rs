//! Forward scans used to skip untaken branches and finished loops.
//!
//! All scans are pure functions over a header's lines and return the index
//! of the line where execution resumes (possibly `lines.len()`).

use crate::image::{Command, Line};

/// Next `elif`/`else`/`endif` belonging to the `if` block that `from` is in
pub(crate) fn next_if_branch(lines: &[Line], from: usize) -> usize {
    let mut nesting = 0usize;
    for (i, line) in lines.iter().enumerate().skip(from + 1) {
        match line.command {
            Command::If { .. } => nesting += 1,
            Command::EndIf if nesting > 0 => nesting -= 1,
            Command::EndIf | Command::Elif { .. } | Command::Else if nesting == 0 => return i,
            _ => {}
        }
    }
    lines.len()
}

/// Matching `endif` of the block that `from` is in
pub(crate) fn find_endif(lines: &[Line], from: usize) -> usize {
    let mut at = from;
    loop {
        at = next_if_branch(lines, at);
        match lines.get(at).map(|l| &l.command) {
            Some(Command::EndIf) | None => return at,
            _ => {}
        }
    }
}

/// Next `case`/`otherwise`/`endcase` belonging to the block `from` is in
pub(crate) fn next_case_branch(lines: &[Line], from: usize) -> usize {
    let mut nesting = 0usize;
    for (i, line) in lines.iter().enumerate().skip(from + 1) {
        match line.command {
            Command::Case { first: true, .. } => nesting += 1,
            Command::EndCase if nesting > 0 => nesting -= 1,
            Command::EndCase | Command::Case { .. } | Command::Otherwise if nesting == 0 => return i,
            _ => {}
        }
    }
    lines.len()
}

/// Matching `endcase` of the block that `from` is in
pub(crate) fn find_endcase(lines: &[Line], from: usize) -> usize {
    let mut at = from;
    loop {
        at = next_case_branch(lines, at);
        match lines.get(at).map(|l| &l.command) {
            Some(Command::EndCase) | None => return at,
            _ => {}
        }
    }
}

/// First line after the loop opened at depth `opener_depth`, scanning from
/// any line inside its body. Body and closer lines sit deeper than the
/// opener, so everything deeper is skipped.
pub(crate) fn skip_loop(lines: &[Line], from: usize, opener_depth: u16) -> usize {
    let mut at = from + 1;
    while at < lines.len() && lines[at].depth > opener_depth {
        at += 1;
    }
    at
}
