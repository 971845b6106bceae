//! Linear-scan register allocation over IR live ranges.
//!
//! Virtual registers map onto the callee-saved files (`s0..s12` for GP,
//! `f0..f12` for FP; the top three of each file stay reserved as lowering
//! scratch). Ranges that do not fit spill to frame slots. Live ranges are
//! extended across loop back edges before scanning, so a value defined
//! before a loop and read inside it stays resident for the whole loop.

use crate::registers::Reg;
use std::collections::HashMap;
use tsn_core::{CodeHolder, LiveRange, Opcode, RegId};

const GP_POOL: usize = 13;
const FP_POOL: usize = 13;

/// Where a virtual register lives after allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VregLoc {
    Phys(Reg),
    /// Byte offset of a spill slot in the frame.
    Spill(u32),
}

/// The result of allocating one function.
#[derive(Debug, Default)]
pub struct Allocation {
    pub map: HashMap<RegId, VregLoc>,
    /// Callee-saved registers this function assigns; the prologue saves
    /// them.
    pub used_callee_saved: Vec<Reg>,
}

/// Extend ranges across loop back edges: a jump or branch at `j` targeting a
/// label at `l < j` forces every range live anywhere in `[l, j]` to stay
/// live through `j`.
fn extend_for_back_edges(ch: &CodeHolder, ranges: &mut [LiveRange]) {
    let targets = ch.label_targets();
    for (j, instr) in ch.code.iter().enumerate() {
        if !matches!(instr.op, Opcode::Branch | Opcode::Jump) {
            continue;
        }
        for label in instr.labels() {
            let Some(&l) = targets.get(&label) else {
                continue;
            };
            if l >= j {
                continue;
            }
            for r in ranges.iter_mut() {
                if r.begin <= j && r.end >= l && r.end < j {
                    r.end = j;
                }
            }
        }
    }
}

/// Allocate `ranges` for the function held by `ch`. Spill slots extend the
/// frame via the stack allocator.
pub fn allocate(ch: &mut CodeHolder, mut ranges: Vec<LiveRange>) -> Allocation {
    extend_for_back_edges(ch, &mut ranges);
    ranges.sort_by_key(|r| (r.begin, r.reg));

    let mut alloc = Allocation::default();
    // (end, pool index, vreg) per active range, one list per file
    let mut active_gp: Vec<(usize, usize, RegId)> = Vec::new();
    let mut active_fp: Vec<(usize, usize, RegId)> = Vec::new();
    let mut free_gp: Vec<usize> = (0..GP_POOL).rev().collect();
    let mut free_fp: Vec<usize> = (0..FP_POOL).rev().collect();

    for range in &ranges {
        let (active, free) = if range.is_fp {
            (&mut active_fp, &mut free_fp)
        } else {
            (&mut active_gp, &mut free_gp)
        };

        // expire ranges that ended before this one begins
        active.retain(|&(end, pool_idx, _)| {
            if end < range.begin {
                free.push(pool_idx);
                false
            } else {
                true
            }
        });

        match free.pop() {
            Some(pool_idx) => {
                let phys = if range.is_fp {
                    Reg::fsaved(pool_idx).unwrap()
                } else {
                    Reg::saved(pool_idx).unwrap()
                };
                if !alloc.used_callee_saved.contains(&phys) {
                    alloc.used_callee_saved.push(phys);
                }
                alloc.map.insert(range.reg, VregLoc::Phys(phys));
                active.push((range.end, pool_idx, range.reg));
            }
            None => {
                // spill whichever of (current, furthest active) ends last
                let furthest = active
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, &(end, _, _))| end)
                    .map(|(i, &(end, pool_idx, vreg))| (i, end, pool_idx, vreg));
                match furthest {
                    Some((i, end, pool_idx, vreg)) if end > range.end => {
                        // evict the long-lived range, give its register away
                        let phys = if range.is_fp {
                            Reg::fsaved(pool_idx).unwrap()
                        } else {
                            Reg::saved(pool_idx).unwrap()
                        };
                        let slot = ch.stack.reserve_raw(8);
                        alloc.map.insert(vreg, VregLoc::Spill(slot));
                        alloc.map.insert(range.reg, VregLoc::Phys(phys));
                        active.remove(i);
                        active.push((range.end, pool_idx, range.reg));
                    }
                    _ => {
                        let slot = ch.stack.reserve_raw(8);
                        alloc.map.insert(range.reg, VregLoc::Spill(slot));
                    }
                }
            }
        }
    }

    alloc.used_callee_saved.sort();
    alloc
}
