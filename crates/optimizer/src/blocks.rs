//! Basic-block recovery.
//!
//! Rebuilds block boundaries and edges from the linear instruction list so
//! liveness can be computed without SSA. Boundaries come from `label`
//! instructions and the instruction following a `branch`/`jump`; the
//! structured `meta_*` markers identify loop regions (their label operands
//! name the back-edge and exit points), which the backend uses to extend
//! live ranges across back edges.

use std::collections::HashMap;
use tsn_core::{CodeHolder, LabelId, Opcode};

/// Half-open instruction range plus the edges out of it.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub start: usize,
    pub end: usize,
    pub succs: Vec<usize>,
    pub preds: Vec<usize>,
}

/// The block graph of one function.
#[derive(Debug, Default)]
pub struct BlockGraph {
    pub blocks: Vec<Block>,
    /// Loop regions recovered from `meta_for_loop`/`meta_while_loop`/
    /// `meta_do_while_loop`: (header label, end label or the header itself
    /// for do-while).
    pub loops: Vec<(LabelId, LabelId)>,
    label_to_block: HashMap<LabelId, usize>,
}

impl BlockGraph {
    pub fn build(ch: &CodeHolder) -> Self {
        let len = ch.code.len();
        if len == 0 {
            return BlockGraph::default();
        }

        let mut leader = vec![false; len];
        leader[0] = true;
        let mut loops = Vec::new();
        for (i, instr) in ch.code.iter().enumerate() {
            match instr.op {
                Opcode::Label => leader[i] = true,
                Opcode::Branch | Opcode::Jump => {
                    if i + 1 < len {
                        leader[i + 1] = true;
                    }
                }
                Opcode::MetaForLoop | Opcode::MetaWhileLoop => {
                    let mut labels = instr.labels();
                    if let (Some(branch), Some(end)) = (labels.next(), labels.next()) {
                        loops.push((branch, end));
                    }
                }
                Opcode::MetaDoWhileLoop => {
                    if let Some(branch) = instr.labels().next() {
                        loops.push((branch, branch));
                    }
                }
                _ => {}
            }
        }

        let mut blocks: Vec<Block> = Vec::new();
        let mut start = 0;
        for i in 1..=len {
            if i == len || leader[i] {
                blocks.push(Block {
                    start,
                    end: i,
                    succs: Vec::new(),
                    preds: Vec::new(),
                });
                start = i;
            }
        }

        let mut label_to_block = HashMap::new();
        for (bi, b) in blocks.iter().enumerate() {
            if let Opcode::Label = ch.code[b.start].op {
                if let Some(l) = ch.code[b.start].label_at(0) {
                    label_to_block.insert(l, bi);
                }
            }
        }

        let count = blocks.len();
        for bi in 0..count {
            let last = blocks[bi].end - 1;
            let mut succs = Vec::new();
            match ch.code[last].op {
                Opcode::Jump => {
                    if let Some(l) = ch.code[last].label_at(0) {
                        if let Some(&t) = label_to_block.get(&l) {
                            succs.push(t);
                        }
                    }
                }
                Opcode::Branch => {
                    if let Some(l) = ch.code[last].label_at(1) {
                        if let Some(&t) = label_to_block.get(&l) {
                            succs.push(t);
                        }
                    }
                    if bi + 1 < count {
                        succs.push(bi + 1);
                    }
                }
                Opcode::Ret => {}
                _ => {
                    if bi + 1 < count {
                        succs.push(bi + 1);
                    }
                }
            }
            for &s in &succs {
                blocks[s].preds.push(bi);
            }
            blocks[bi].succs = succs;
        }

        BlockGraph {
            blocks,
            loops,
            label_to_block,
        }
    }

    pub fn block_of_label(&self, label: LabelId) -> Option<usize> {
        self.label_to_block.get(&label).copied()
    }

    /// Edges that target an earlier block: loop back edges.
    pub fn back_edges(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for (bi, b) in self.blocks.iter().enumerate() {
            for &s in &b.succs {
                if s <= bi {
                    out.push((bi, s));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsn_core::{Instruction, SrcRef, Value};

    fn label(ch: &mut CodeHolder, l: LabelId) {
        let mut i = Instruction::new(Opcode::Label, SrcRef::default());
        i.operands[0] = Value::imm_u(l as u64, 0);
        ch.emit(i);
    }

    fn jump(ch: &mut CodeHolder, l: LabelId) {
        let mut i = Instruction::new(Opcode::Jump, SrcRef::default());
        i.operands[0] = Value::imm_u(l as u64, 0);
        ch.emit(i);
    }

    fn branch(ch: &mut CodeHolder, cond: Value, l: LabelId) {
        let mut i = Instruction::new(Opcode::Branch, SrcRef::default());
        i.operands[0] = cond;
        i.operands[1] = Value::imm_u(l as u64, 0);
        ch.emit(i);
    }

    #[test]
    fn test_if_shape_produces_diamond() {
        // branch c L1; jump L2; label L1; label L2; ret
        let mut ch = CodeHolder::new(1);
        branch(&mut ch, Value::reg(0, 1), 1);
        jump(&mut ch, 2);
        label(&mut ch, 1);
        label(&mut ch, 2);
        ch.emit(Instruction::new(Opcode::Ret, SrcRef::default()));

        let g = BlockGraph::build(&ch);
        assert_eq!(g.blocks.len(), 4);
        // entry branches to the L1 block and falls through to the jump block
        assert_eq!(g.blocks[0].succs, vec![2, 1]);
        assert_eq!(g.blocks[1].succs, vec![3]);
        assert_eq!(g.blocks[2].succs, vec![3]);
    }

    #[test]
    fn test_loop_back_edge_is_detected() {
        // label L0; branch c L0; ret
        let mut ch = CodeHolder::new(1);
        label(&mut ch, 0);
        branch(&mut ch, Value::reg(0, 1), 0);
        ch.emit(Instruction::new(Opcode::Ret, SrcRef::default()));

        let g = BlockGraph::build(&ch);
        let back = g.back_edges();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].1, 0);
    }

    #[test]
    fn test_meta_markers_record_loops() {
        let mut ch = CodeHolder::new(1);
        let mut meta = Instruction::new(Opcode::MetaWhileLoop, SrcRef::default());
        meta.operands[0] = Value::imm_u(3, 0);
        meta.operands[1] = Value::imm_u(4, 0);
        ch.emit(meta);
        ch.emit(Instruction::new(Opcode::Ret, SrcRef::default()));

        let g = BlockGraph::build(&ch);
        assert_eq!(g.loops, vec![(3, 4)]);
    }
}
