//! Savepoint stack of the FILO engine.

use std::fmt;

/// Savepoint name. Ids increase monotonically and are never reused by one
/// stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SavepointId(u64);

impl fmt::Display for SavepointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEntry {
    pub name: String,
    pub savepoint: SavepointId,
}

/// Held locks in nesting order, each with the savepoint taken before it.
#[derive(Debug, Default)]
pub struct LockStack {
    entries: Vec<StackEntry>,
    next_savepoint: u64,
}

impl LockStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the savepoint for the next acquire.
    ///
    /// Allocation is final even if the acquire fails.
    pub fn next_savepoint(&mut self) -> SavepointId {
        let id = SavepointId(self.next_savepoint);
        self.next_savepoint += 1;
        id
    }

    pub fn push(&mut self, name: &str, savepoint: SavepointId) {
        self.entries.push(StackEntry {
            name: name.to_string(),
            savepoint,
        });
    }

    /// Position of `name`, searching from the top.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().rposition(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn is_top(&self, index: usize) -> bool {
        index + 1 == self.entries.len()
    }

    /// Removes the entry at `index` and everything above it, returning them
    /// top first.
    pub fn unwind_to(&mut self, index: usize) -> Vec<StackEntry> {
        let mut removed = self.entries.split_off(index.min(self.entries.len()));
        removed.reverse();
        removed
    }

    /// Empties the stack, returning the entries top first.
    pub fn drain(&mut self) -> Vec<StackEntry> {
        self.unwind_to(0)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
