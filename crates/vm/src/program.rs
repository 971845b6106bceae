//! A lowered program: the shared bytecode image all functions live in.

use crate::bytecode::Instr;
use crate::bytecode::Vmi;

/// The bytecode image. Address 0 always holds `term`, so a function invoked
/// with `$ra = 0` terminates execution when it returns.
#[derive(Debug, Clone)]
pub struct Program {
    pub code: Vec<Instr>,
}

impl Program {
    pub fn new() -> Self {
        Program {
            code: vec![Instr::new(Vmi::Term)],
        }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Flatten to the wire format.
    pub fn encode(&self) -> Vec<u64> {
        let mut out = Vec::with_capacity(self.code.len() * 2);
        for i in &self.code {
            out.extend(i.encode());
        }
        out
    }

    /// Rebuild from the wire format. `None` on a torn image or unknown
    /// opcode.
    pub fn decode(words: &[u64]) -> Option<Program> {
        if words.len() % 2 != 0 {
            return None;
        }
        let mut code = Vec::with_capacity(words.len() / 2);
        for pair in words.chunks_exact(2) {
            code.push(Instr::decode([pair[0], pair[1]])?);
        }
        Some(Program { code })
    }
}

impl Default for Program {
    fn default() -> Self {
        Program::new()
    }
}
