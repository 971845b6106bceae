//! Source locations attached to IR instructions and diagnostics.

use crate::module::ModuleId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A position range within one module's source text.
///
/// Frontends produce these on AST nodes; the compiler threads them through to
/// IR instructions and log entries. `line`/`col` are 1-based; a zeroed ref
/// means "no location" (synthesized code such as implicit destructor calls).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrcRef {
    #[serde(default)]
    pub module: ModuleId,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub col: u32,
    /// Length of the referenced span in characters, when the frontend knows it.
    #[serde(default)]
    pub len: u32,
}

impl SrcRef {
    pub fn new(module: ModuleId, line: u32, col: u32) -> Self {
        SrcRef {
            module,
            line,
            col,
            len: 0,
        }
    }

    /// True when this ref points at real source text.
    pub fn is_known(&self) -> bool {
        self.line != 0
    }
}

impl fmt::Display for SrcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "{}:{}", self.line, self.col)
        } else {
            write!(f, "<generated>")
        }
    }
}
