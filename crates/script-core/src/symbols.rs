//! Per-call symbol arena
//!
//! Symbols are fixed-size value slots allocated for the lifetime of one
//! call. A symbol is either global or scoped to the header that declared it,
//! so a subroutine can shadow a caller's name without clobbering it. The
//! arena keeps its allocations across calls; `reset` only empties it.

use crate::error::{Result, ScriptError};
use std::collections::HashMap;

/// Header scope of a symbol; `None` is global
pub type Scope = Option<usize>;

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub scope: Scope,
    pub size: usize,
    value: String,
}

impl Symbol {
    pub fn value(&self) -> &str {
        &self.value
    }

    fn store(&mut self, value: &str) {
        self.value.clear();
        self.value.push_str(truncate(value, self.size));
    }
}

/// Cut `value` to at most `size` bytes on a char boundary
fn truncate(value: &str, size: usize) -> &str {
    if value.len() <= size {
        return value;
    }
    let mut end = size;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

#[derive(Debug)]
pub struct SymbolArena {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, Vec<usize>>,
    live: usize,
    limit: usize,
    default_size: usize,
}

impl SymbolArena {
    pub fn new(limit: usize, default_size: usize) -> Self {
        Self {
            symbols: Vec::with_capacity(limit.min(64)),
            by_name: HashMap::new(),
            live: 0,
            limit,
            default_size,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Find a symbol in `scope`, falling back to the global scope
    pub fn lookup(&self, scope: Scope, name: &str) -> Option<&Symbol> {
        let slots = self.by_name.get(name)?;
        let pick = |want: Scope| {
            slots
                .iter()
                .map(|&i| &self.symbols[i])
                .find(|s| s.scope == want)
        };
        scope.and_then(|_| pick(scope)).or_else(|| pick(None))
    }

    fn position(&self, scope: Scope, name: &str) -> Option<usize> {
        let slots = self.by_name.get(name)?;
        let find = |want: Scope| slots.iter().copied().find(|&i| self.symbols[i].scope == want);
        scope.and_then(|_| find(scope)).or_else(|| find(None))
    }

    /// Declare a symbol exactly in `scope`. Redeclaring keeps the existing
    /// slot and its value.
    pub fn define(&mut self, scope: Scope, name: &str, size: Option<usize>) -> Result<&mut Symbol> {
        let existing = self
            .by_name
            .get(name)
            .and_then(|slots| slots.iter().copied().find(|&i| self.symbols[i].scope == scope));
        let index = match existing {
            Some(index) => index,
            None => self.allocate(scope, name, size.unwrap_or(self.default_size))?,
        };
        Ok(&mut self.symbols[index])
    }

    fn allocate(&mut self, scope: Scope, name: &str, size: usize) -> Result<usize> {
        if self.live >= self.limit {
            return Err(ScriptError::SymbolSpaceExhausted { limit: self.limit });
        }
        let index = self.live;
        // Reuse a slot left over from a previous call when one exists
        if index < self.symbols.len() {
            let slot = &mut self.symbols[index];
            slot.name.clear();
            slot.name.push_str(name);
            slot.scope = scope;
            slot.size = size;
            slot.value.clear();
        } else {
            self.symbols.push(Symbol {
                name: name.to_string(),
                scope,
                size,
                value: String::new(),
            });
        }
        self.live += 1;
        self.by_name.entry(name.to_string()).or_default().push(index);
        Ok(index)
    }

    /// Store into the visible symbol, creating a global one when missing
    pub fn assign(&mut self, scope: Scope, name: &str, value: &str) -> Result<()> {
        let index = match self.position(scope, name) {
            Some(index) => index,
            None => self.allocate(None, name, self.default_size)?,
        };
        self.symbols[index].store(value);
        Ok(())
    }

    /// Store into a symbol declared exactly in `scope`
    pub fn assign_scoped(&mut self, scope: Scope, name: &str, value: &str) -> Result<()> {
        self.define(scope, name, None)?.store(value);
        Ok(())
    }

    /// Empty the visible symbol; missing symbols are ignored
    pub fn clear_value(&mut self, scope: Scope, name: &str) {
        if let Some(index) = self.position(scope, name) {
            self.symbols[index].value.clear();
        }
    }

    /// Drop every symbol, keeping allocations for the next call
    pub fn reset(&mut self) {
        self.live = 0;
        self.by_name.clear();
    }
}
