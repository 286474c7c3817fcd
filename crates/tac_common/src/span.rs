//! Source location tracking.
//!
//! Tuples in the IR surface syntax may carry `line`/`column` metadata. A
//! missing position is represented as `line <= 0` rather than `Option`, so
//! every `Instruction` variant can carry a `SourcePos` by value.

use std::fmt;

/// A source position attached to an instruction.
///
/// `line == 0` means "no position was supplied"; lowering only emits a
/// `#line` directive (C) when `has_position()` is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourcePos {
    pub line: i32,
    pub column: i32,
}

impl SourcePos {
    pub const NONE: SourcePos = SourcePos { line: 0, column: 0 };

    pub fn new(line: i32, column: i32) -> Self {
        Self { line, column }
    }

    pub fn has_position(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_position() {
            write!(f, "{}:{}", self.line, self.column)
        } else {
            write!(f, "<unknown>")
        }
    }
}
