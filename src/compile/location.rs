use std::collections::{BTreeSet, HashMap};

/// Identifier of a compiled function's instruction space. The program's
/// top level is scope 0.
pub type ScopeId = u32;

/// 1-based source position, matching DAP line/column conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourcePos {
    pub line: u32,
    pub col: u32,
}

/// Half-open range of source text covered by a token, node or instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceRange {
    pub start: SourcePos,
    pub end: SourcePos,
}

impl SourceRange {
    pub fn new(start: SourcePos, end: SourcePos) -> Self {
        SourceRange { start, end }
    }
}

/// Source range plus the call depth observed when the location was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub range: SourceRange,
    pub depth: usize,
}

/// Uniquely identifies an instruction within the compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocationKey {
    pub scope: ScopeId,
    pub ip: usize,
}

/// Instruction-to-source mapping built by the compiler, immutable once the
/// program starts. Every instruction the VM can fetch has an entry.
#[derive(Debug, Clone, Default)]
pub struct LocationMap {
    entries: HashMap<LocationKey, SourceRange>,
    lines: BTreeSet<u32>,
}

impl LocationMap {
    pub fn insert(&mut self, key: LocationKey, range: SourceRange) {
        self.lines.insert(range.start.line);
        self.entries.insert(key, range);
    }

    pub fn lookup(&self, key: LocationKey) -> Option<SourceRange> {
        self.entries.get(&key).copied()
    }

    /// Snap a requested breakpoint line to the next line that actually
    /// carries instructions. Lines past the last mapped line are returned
    /// unchanged.
    pub fn resolve_line(&self, line: u32) -> u32 {
        self.lines.range(line..).next().copied().unwrap_or(line)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
