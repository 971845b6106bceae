//! Dead-code elimination.
//!
//! Classic backward liveness over the recovered block graph: a register is
//! live at an instruction if some reachable later instruction reads it before
//! it is reassigned. Instructions whose only effect is assigning a dead
//! register (no side effects, no memory writes) are removed. Loads count:
//! a load nobody reads is dead.

use crate::blocks::BlockGraph;
use crate::{OptimizationPass, PassResult};
use std::collections::HashSet;
use tsn_core::{CallTarget, CodeHolder, Context, RegId};

#[derive(Debug, Clone, Copy, Default)]
pub struct DeadCodeElimination;

impl OptimizationPass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dead_code_elimination"
    }

    fn run(&mut self, _ctx: &mut Context, ch: &mut CodeHolder) -> PassResult {
        let graph = BlockGraph::build(ch);
        if graph.blocks.is_empty() {
            return PassResult::unchanged();
        }

        let nblocks = graph.blocks.len();
        let mut uses: Vec<HashSet<RegId>> = vec![HashSet::new(); nblocks];
        let mut defs: Vec<HashSet<RegId>> = vec![HashSet::new(); nblocks];

        for (bi, b) in graph.blocks.iter().enumerate() {
            for instr in &ch.code[b.start..b.end] {
                for v in instr.read_operands() {
                    if let Some(r) = v.reg_id() {
                        if !defs[bi].contains(&r) {
                            uses[bi].insert(r);
                        }
                    }
                }
                if let Some(CallTarget::Ptr(v)) = &instr.callee {
                    if let Some(r) = v.reg_id() {
                        if !defs[bi].contains(&r) {
                            uses[bi].insert(r);
                        }
                    }
                }
                if let Some(r) = instr.assigned_reg() {
                    defs[bi].insert(r);
                }
            }
        }

        // live_in/live_out to fixpoint
        let mut live_in: Vec<HashSet<RegId>> = vec![HashSet::new(); nblocks];
        let mut live_out: Vec<HashSet<RegId>> = vec![HashSet::new(); nblocks];
        loop {
            let mut settled = true;
            for bi in (0..nblocks).rev() {
                let mut out: HashSet<RegId> = HashSet::new();
                for &s in &graph.blocks[bi].succs {
                    out.extend(live_in[s].iter().copied());
                }
                let mut inn = uses[bi].clone();
                for r in out.iter() {
                    if !defs[bi].contains(r) {
                        inn.insert(*r);
                    }
                }
                if out != live_out[bi] || inn != live_in[bi] {
                    settled = false;
                    live_out[bi] = out;
                    live_in[bi] = inn;
                }
            }
            if settled {
                break;
            }
        }

        // walk each block backwards, removing dead assignments
        let mut remove: HashSet<usize> = HashSet::new();
        for (bi, b) in graph.blocks.iter().enumerate() {
            let mut live = live_out[bi].clone();
            for idx in (b.start..b.end).rev() {
                let instr = &ch.code[idx];
                let info = instr.op.info();
                let assigned = instr.assigned_reg();

                if let Some(r) = assigned {
                    let dead = !live.contains(&r);
                    if dead && !info.has_side_effects && !info.writes_memory {
                        remove.insert(idx);
                        continue;
                    }
                    live.remove(&r);
                }
                for v in instr.read_operands() {
                    if let Some(r) = v.reg_id() {
                        live.insert(r);
                    }
                }
                if let Some(CallTarget::Ptr(v)) = &instr.callee {
                    if let Some(r) = v.reg_id() {
                        live.insert(r);
                    }
                }
            }
        }

        if remove.is_empty() {
            return PassResult::unchanged();
        }

        tracing::debug!(func = ch.owner, removed = remove.len(), "dead instructions removed");
        let mut i = 0;
        ch.code.retain(|_| {
            let dead = remove.contains(&i);
            i += 1;
            !dead
        });

        PassResult {
            changed: true,
            repeat_group: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsn_core::{Instruction, Opcode, Primitive, SrcRef, Value};

    fn assign(dst: u32, src: Value, tp: u32) -> Instruction {
        let mut i = Instruction::new(Opcode::Assign, SrcRef::default());
        i.operands[0] = Value::reg(dst, tp);
        i.operands[1] = src;
        i
    }

    #[test]
    fn test_unused_assignment_is_removed() {
        let mut ctx = Context::new();
        let i32t = ctx.types.primitive(Primitive::I32);
        let mut ch = CodeHolder::new(1);
        ch.emit(assign(0, Value::imm_i(1, i32t), i32t));
        ch.emit(assign(1, Value::imm_i(2, i32t), i32t));
        let mut ret = Instruction::new(Opcode::Ret, SrcRef::default());
        ret.operands[0] = Value::reg(1, i32t);
        ch.emit(ret);

        let result = DeadCodeElimination.run(&mut ctx, &mut ch);
        assert!(result.changed);
        assert_eq!(ch.code.len(), 2);
        assert_eq!(ch.code[0].operands[0], Value::reg(1, i32t));
    }

    #[test]
    fn test_chain_of_dead_values_needs_iterations() {
        let mut ctx = Context::new();
        let i32t = ctx.types.primitive(Primitive::I32);
        let mut ch = CodeHolder::new(1);
        ch.emit(assign(0, Value::imm_i(1, i32t), i32t));
        ch.emit(assign(1, Value::reg(0, i32t), i32t));
        ch.emit(Instruction::new(Opcode::Ret, SrcRef::default()));

        // first sweep removes the tail of the chain, second the head
        let mut pass = DeadCodeElimination;
        assert!(pass.run(&mut ctx, &mut ch).changed);
        assert!(pass.run(&mut ctx, &mut ch).changed);
        assert!(!pass.run(&mut ctx, &mut ch).changed);
        assert_eq!(ch.code.len(), 1);
    }

    #[test]
    fn test_value_live_across_loop_back_edge_is_kept() {
        let mut ctx = Context::new();
        let i32t = ctx.types.primitive(Primitive::I32);
        let mut ch = CodeHolder::new(1);
        // r0 = 1; label L0; branch r0 L0; ret
        ch.emit(assign(0, Value::imm_i(1, i32t), i32t));
        let mut l = Instruction::new(Opcode::Label, SrcRef::default());
        l.operands[0] = Value::imm_u(0, 0);
        ch.emit(l);
        let mut b = Instruction::new(Opcode::Branch, SrcRef::default());
        b.operands[0] = Value::reg(0, i32t);
        b.operands[1] = Value::imm_u(0, 0);
        ch.emit(b);
        ch.emit(Instruction::new(Opcode::Ret, SrcRef::default()));

        let result = DeadCodeElimination.run(&mut ctx, &mut ch);
        assert!(!result.changed);
        assert_eq!(ch.code.len(), 4);
    }

    #[test]
    fn test_calls_with_dead_results_survive() {
        let mut ctx = Context::new();
        let i32t = ctx.types.primitive(Primitive::I32);
        let mut ch = CodeHolder::new(1);
        let mut call = Instruction::new(Opcode::Call, SrcRef::default());
        call.operands[0] = Value::reg(0, i32t);
        call.callee = Some(CallTarget::Func(4));
        ch.emit(call);
        ch.emit(Instruction::new(Opcode::Ret, SrcRef::default()));

        let result = DeadCodeElimination.run(&mut ctx, &mut ch);
        assert!(!result.changed);
        assert_eq!(ch.code.len(), 2);
    }
}
