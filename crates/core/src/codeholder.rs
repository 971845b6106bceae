//! Per-function IR container: instruction list, stack frame layout, live
//! ranges.

use crate::function::FuncId;
use crate::ir::{Instruction, LabelId, Opcode};
use crate::value::{RegId, SlotId};
use std::collections::HashMap;

/// Byte layout of one stack allocation.
#[derive(Debug, Clone, Copy)]
pub struct SlotInfo {
    pub offset: u32,
    pub size: u32,
}

/// Coalescing free-list allocator for a function's stack frame.
///
/// Slots are handed out as ids; offsets are assigned eagerly so the frame
/// layout is known as soon as compilation of the function finishes. Freed
/// ranges merge with their neighbors and are reused first-fit, keeping the
/// high-water mark (the frame size) tight across block-scoped lifetimes.
#[derive(Debug, Default)]
pub struct StackFrame {
    slots: HashMap<SlotId, SlotInfo>,
    /// Sorted list of (offset, size) holes.
    free: Vec<(u32, u32)>,
    high_water: u32,
    next_slot: SlotId,
}

impl StackFrame {
    pub fn new() -> Self {
        StackFrame::default()
    }

    pub fn alloc(&mut self, size: u32) -> SlotId {
        let size = size.max(1).next_multiple_of(8);
        let slot = self.next_slot;
        self.next_slot += 1;

        // first fit from the free list
        for i in 0..self.free.len() {
            let (off, hole) = self.free[i];
            if hole >= size {
                if hole == size {
                    self.free.remove(i);
                } else {
                    self.free[i] = (off + size, hole - size);
                }
                self.slots.insert(slot, SlotInfo { offset: off, size });
                return slot;
            }
        }

        let off = self.high_water;
        self.high_water += size;
        self.slots.insert(slot, SlotInfo { offset: off, size });
        slot
    }

    pub fn free(&mut self, slot: SlotId) {
        let Some(info) = self.slots.get(&slot).copied() else {
            return;
        };
        let pos = self
            .free
            .binary_search_by_key(&info.offset, |&(off, _)| off)
            .unwrap_or_else(|p| p);
        self.free.insert(pos, (info.offset, info.size));

        // merge with right neighbor, then left
        if pos + 1 < self.free.len() {
            let (off, size) = self.free[pos];
            let (noff, nsize) = self.free[pos + 1];
            if off + size == noff {
                self.free[pos] = (off, size + nsize);
                self.free.remove(pos + 1);
            }
        }
        if pos > 0 {
            let (poff, psize) = self.free[pos - 1];
            let (off, size) = self.free[pos];
            if poff + psize == off {
                self.free[pos - 1] = (poff, psize + size);
                self.free.remove(pos);
            }
        }
    }

    pub fn offset_of(&self, slot: SlotId) -> Option<u32> {
        self.slots.get(&slot).map(|s| s.offset)
    }

    pub fn size_of(&self, slot: SlotId) -> Option<u32> {
        self.slots.get(&slot).map(|s| s.size)
    }

    /// Frame size: the high-water mark, 16-byte aligned.
    pub fn frame_size(&self) -> u32 {
        self.high_water.next_multiple_of(16)
    }

    /// All slots ever allocated, with their layout.
    pub fn slots(&self) -> impl Iterator<Item = (SlotId, SlotInfo)> + '_ {
        self.slots.iter().map(|(&id, &info)| (id, info))
    }

    /// Extend the frame past existing allocations (spill slots added by the
    /// backend after compile-time frees).
    pub fn reserve_raw(&mut self, size: u32) -> u32 {
        let size = size.max(1).next_multiple_of(8);
        let off = self.high_water;
        self.high_water += size;
        off
    }
}

/// Live range of one virtual register over a function's instruction list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveRange {
    pub reg: RegId,
    pub is_fp: bool,
    /// Index of the first instruction that assigns the register.
    pub begin: usize,
    /// Index of the last instruction that reads or reassigns it.
    pub end: usize,
}

/// The compiler's IR output for one function.
#[derive(Debug)]
pub struct CodeHolder {
    pub owner: FuncId,
    pub code: Vec<Instruction>,
    pub stack: StackFrame,
    next_reg: RegId,
    next_label: LabelId,
}

impl CodeHolder {
    pub fn new(owner: FuncId) -> Self {
        CodeHolder {
            owner,
            code: Vec::new(),
            stack: StackFrame::new(),
            next_reg: 0,
            next_label: 0,
        }
    }

    pub fn alloc_reg(&mut self) -> RegId {
        let r = self.next_reg;
        self.next_reg += 1;
        r
    }

    pub fn alloc_label(&mut self) -> LabelId {
        let l = self.next_label;
        self.next_label += 1;
        l
    }

    pub fn reg_count(&self) -> RegId {
        self.next_reg
    }

    pub fn emit(&mut self, instr: Instruction) -> usize {
        self.code.push(instr);
        self.code.len() - 1
    }

    /// Map of label id to the index of its `label` instruction.
    pub fn label_targets(&self) -> HashMap<LabelId, usize> {
        let mut out = HashMap::new();
        for (i, instr) in self.code.iter().enumerate() {
            if instr.op == Opcode::Label {
                if let Some(l) = instr.label_at(0) {
                    out.insert(l, i);
                }
            }
        }
        out
    }

    /// Compute live ranges over program order. `is_fp` classifies a type id
    /// as floating-point so the backend can split the GP/FP register pools.
    ///
    /// Ranges inside loops are extended by the backend using the label map;
    /// here a register simply lives from its first assignment to its last
    /// use.
    pub fn live_ranges(&self, is_fp: impl Fn(crate::types::TypeId) -> bool) -> Vec<LiveRange> {
        let mut ranges: HashMap<RegId, LiveRange> = HashMap::new();
        for (i, instr) in self.code.iter().enumerate() {
            if let Some(v) = instr.assigned() {
                if let Some(r) = v.reg_id() {
                    ranges
                        .entry(r)
                        .and_modify(|lr| lr.end = lr.end.max(i))
                        .or_insert(LiveRange {
                            reg: r,
                            is_fp: is_fp(v.tp),
                            begin: i,
                            end: i,
                        });
                }
            }
            for v in instr.read_operands() {
                if let Some(r) = v.reg_id() {
                    ranges
                        .entry(r)
                        .and_modify(|lr| lr.end = lr.end.max(i))
                        .or_insert(LiveRange {
                            reg: r,
                            is_fp: is_fp(v.tp),
                            begin: i,
                            end: i,
                        });
                }
            }
            // indirect call targets keep their register alive too
            if let Some(crate::ir::CallTarget::Ptr(v)) = &instr.callee {
                if let Some(r) = v.reg_id() {
                    ranges
                        .entry(r)
                        .and_modify(|lr| lr.end = lr.end.max(i))
                        .or_insert(LiveRange {
                            reg: r,
                            is_fp: false,
                            begin: i,
                            end: i,
                        });
                }
            }
        }
        let mut out: Vec<LiveRange> = ranges.into_values().collect();
        out.sort_by_key(|r| (r.begin, r.reg));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Instruction, Opcode};
    use crate::src_ref::SrcRef;
    use crate::value::Value;

    #[test]
    fn test_stack_alloc_reuses_freed_space() {
        let mut frame = StackFrame::new();
        let a = frame.alloc(8);
        let b = frame.alloc(8);
        assert_eq!(frame.offset_of(a), Some(0));
        assert_eq!(frame.offset_of(b), Some(8));

        frame.free(a);
        let c = frame.alloc(8);
        assert_eq!(frame.offset_of(c), Some(0));
        assert_eq!(frame.frame_size(), 16);
    }

    #[test]
    fn test_stack_free_coalesces_neighbors() {
        let mut frame = StackFrame::new();
        let a = frame.alloc(8);
        let b = frame.alloc(8);
        let c = frame.alloc(8);
        frame.free(a);
        frame.free(c);
        frame.free(b);
        // all three holes merged; a 24-byte request fits without growing
        let d = frame.alloc(24);
        assert_eq!(frame.offset_of(d), Some(0));
        assert_eq!(frame.frame_size(), 32);
    }

    #[test]
    fn test_live_ranges_cover_first_def_to_last_use() {
        let mut ch = CodeHolder::new(1);
        let r0 = ch.alloc_reg();
        let r1 = ch.alloc_reg();

        let mut i0 = Instruction::new(Opcode::Assign, SrcRef::default());
        i0.operands[0] = Value::reg(r0, 1);
        i0.operands[1] = Value::imm_i(1, 1);
        ch.emit(i0);

        let mut i1 = Instruction::new(Opcode::IAdd, SrcRef::default());
        i1.operands[0] = Value::reg(r1, 1);
        i1.operands[1] = Value::reg(r0, 1);
        i1.operands[2] = Value::reg(r0, 1);
        ch.emit(i1);

        let mut i2 = Instruction::new(Opcode::Ret, SrcRef::default());
        i2.operands[0] = Value::reg(r1, 1);
        ch.emit(i2);

        let ranges = ch.live_ranges(|_| false);
        let r0r = ranges.iter().find(|r| r.reg == r0).unwrap();
        let r1r = ranges.iter().find(|r| r.reg == r1).unwrap();
        assert_eq!((r0r.begin, r0r.end), (0, 1));
        assert_eq!((r1r.begin, r1r.end), (1, 2));
    }
}
