//! Memory-access reduction.
//!
//! Walks a function linearly, remembering what was last loaded from and
//! stored to each address, and rewrites redundant traffic:
//!
//! - a load from an address that was just stored becomes `assign` from the
//!   stored value (or disappears when the destination already holds it);
//! - a load whose value is already held by another unmodified register
//!   becomes an `assign` from that register;
//! - a store of a value that is already at the address (from the most recent
//!   store or load) is dropped.
//!
//! Addresses are tracked as (base place, byte offset): a register produced
//! by `uadd base, K` is recognized as `base + K`, so member accesses that
//! recompute the address through fresh registers still match. A rewrite is
//! blocked whenever the involved register was reassigned since the
//! remembered access, or the address was overwritten in between. Any
//! side-effecting instruction (calls, stack lifetime markers, control
//! flow) clears all remembered state.

use crate::{OptimizationPass, PassResult};
use std::collections::HashMap;
use tsn_core::{CodeHolder, Context, Opcode, RegId, Value, ValueKind};

/// Identity of an address base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Place {
    Reg(RegId),
    Slot(u32),
    Arg(u8),
}

impl Place {
    fn of(v: &Value) -> Option<Place> {
        match v.kind {
            ValueKind::Reg(r) => Some(Place::Reg(r)),
            ValueKind::Stack(s) => Some(Place::Slot(s)),
            ValueKind::Arg(a) => Some(Place::Arg(a)),
            _ => None,
        }
    }
}

/// A tracked address: base plus constant byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Addr {
    base: Place,
    off: u64,
}

#[derive(Debug, Clone)]
struct LoadInfo {
    at: usize,
    to: Value,
    was_overwritten: bool,
}

#[derive(Debug, Clone)]
struct StoreInfo {
    at: usize,
    src: Value,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReduceMemoryAccess;

impl OptimizationPass for ReduceMemoryAccess {
    fn name(&self) -> &'static str {
        "reduce_memory_access"
    }

    fn run(&mut self, _ctx: &mut Context, ch: &mut CodeHolder) -> PassResult {
        let mut loads: HashMap<Addr, LoadInfo> = HashMap::new();
        let mut stores: HashMap<Addr, StoreInfo> = HashMap::new();
        // instruction index of the most recent assignment per register
        let mut last_assign: HashMap<RegId, usize> = HashMap::new();
        // registers known to hold `base + K`
        let mut addr_defs: HashMap<RegId, Addr> = HashMap::new();
        let mut remove: Vec<usize> = Vec::new();
        let mut changed = false;

        // true when `reg` has not been reassigned since instruction `since`
        let unmodified =
            |last_assign: &HashMap<RegId, usize>, reg: RegId, since: usize| match last_assign
                .get(&reg)
            {
                Some(&at) => at <= since,
                None => true,
            };

        let addr_of = |v: &Value, extra: u64, addr_defs: &HashMap<RegId, Addr>| -> Option<Addr> {
            match v.kind {
                ValueKind::Reg(r) => match addr_defs.get(&r) {
                    Some(a) => Some(Addr {
                        base: a.base,
                        off: a.off + extra,
                    }),
                    None => Some(Addr {
                        base: Place::Reg(r),
                        off: extra,
                    }),
                },
                _ => Place::of(v).map(|base| Addr { base, off: extra }),
            }
        };

        let invalidate = |reg: RegId, addr_defs: &mut HashMap<RegId, Addr>| {
            addr_defs.remove(&reg);
            addr_defs.retain(|_, a| a.base != Place::Reg(reg));
        };

        for idx in 0..ch.code.len() {
            let instr = ch.code[idx].clone();

            if instr.op.info().has_side_effects {
                loads.clear();
                stores.clear();
                if let Some(r) = instr.assigned_reg() {
                    last_assign.insert(r, idx);
                    invalidate(r, &mut addr_defs);
                }
                continue;
            }

            match instr.op {
                Opcode::Load => {
                    let Some(to) = instr.operands[0].reg_id() else {
                        continue;
                    };
                    let extra = instr.operands[2].imm().map(|m| m.as_u64()).unwrap_or(0);
                    let addr = addr_of(&instr.operands[1], extra, &addr_defs);
                    invalidate(to, &mut addr_defs);
                    let Some(addr) = addr else {
                        last_assign.insert(to, idx);
                        continue;
                    };

                    let mut handled = false;

                    if let Some(st) = stores.get(&addr) {
                        let newer_than_load =
                            loads.get(&addr).map(|ld| st.at > ld.at).unwrap_or(true);
                        if newer_than_load {
                            if let Some(src_reg) = st.src.reg_id() {
                                if src_reg == to {
                                    if unmodified(&last_assign, to, st.at) {
                                        // destination already holds the
                                        // stored value
                                        remove.push(idx);
                                        handled = true;
                                    }
                                } else if unmodified(&last_assign, src_reg, st.at) {
                                    let src = st.src.clone();
                                    rewrite_to_assign(ch, idx, src);
                                    handled = true;
                                }
                            } else if st.src.is_imm() {
                                let src = st.src.clone();
                                rewrite_to_assign(ch, idx, src);
                                handled = true;
                            }
                        }
                    }

                    if !handled {
                        if let Some(ld) = loads.get(&addr) {
                            if !ld.was_overwritten {
                                if let Some(prev_to) = ld.to.reg_id() {
                                    if prev_to == to {
                                        if unmodified(&last_assign, to, ld.at) {
                                            remove.push(idx);
                                            handled = true;
                                        }
                                    } else if unmodified(&last_assign, prev_to, ld.at) {
                                        let src = ld.to.clone();
                                        rewrite_to_assign(ch, idx, src);
                                        handled = true;
                                    }
                                }
                            }
                        }
                    }

                    if handled {
                        changed = true;
                    } else {
                        loads.insert(
                            addr,
                            LoadInfo {
                                at: idx,
                                to: instr.operands[0].clone(),
                                was_overwritten: false,
                            },
                        );
                    }
                    last_assign.insert(to, idx);
                }

                Opcode::Store => {
                    let extra = instr.operands[2].imm().map(|m| m.as_u64()).unwrap_or(0);
                    let Some(addr) = addr_of(&instr.operands[1], extra, &addr_defs) else {
                        continue;
                    };
                    let src = &instr.operands[0];
                    let mut dropped = false;

                    // the address already holds this exact value
                    if let Some(st) = stores.get(&addr) {
                        if st.src == *src {
                            let src_stable = src
                                .reg_id()
                                .map(|r| unmodified(&last_assign, r, st.at))
                                .unwrap_or(src.is_imm());
                            if src_stable {
                                remove.push(idx);
                                dropped = true;
                            }
                        }
                    }
                    if !dropped {
                        if let (Some(ld), Some(src_reg)) = (loads.get(&addr), src.reg_id()) {
                            if !ld.was_overwritten
                                && ld.to.reg_id() == Some(src_reg)
                                && unmodified(&last_assign, src_reg, ld.at)
                            {
                                // storing back the value loaded from here
                                remove.push(idx);
                                dropped = true;
                            }
                        }
                    }

                    if dropped {
                        changed = true;
                    } else {
                        if let Some(ld) = loads.get_mut(&addr) {
                            ld.was_overwritten = true;
                        }
                        stores.insert(
                            addr,
                            StoreInfo {
                                at: idx,
                                src: src.clone(),
                            },
                        );
                    }
                }

                _ => {
                    if let Some(r) = instr.assigned_reg() {
                        last_assign.insert(r, idx);
                        invalidate(r, &mut addr_defs);

                        // recognize address derivation: dest = base + K
                        if instr.op == Opcode::UAdd {
                            if let Some(k) = instr.operands[2].imm().map(|m| m.as_u64()) {
                                if let Some(base) = addr_of(&instr.operands[1], k, &addr_defs) {
                                    addr_defs.insert(r, base);
                                }
                            }
                        }
                    }
                }
            }
        }

        if !remove.is_empty() {
            let mut to_remove = remove
                .iter()
                .copied()
                .collect::<std::collections::HashSet<_>>();
            let mut i = 0;
            ch.code.retain(|_| {
                let dead = to_remove.remove(&i);
                i += 1;
                !dead
            });
        }

        PassResult {
            changed,
            repeat_group: changed,
        }
    }
}

fn rewrite_to_assign(ch: &mut CodeHolder, idx: usize, src: Value) {
    tracing::debug!(index = idx, "redundant load rewritten to assign");
    let instr = &mut ch.code[idx];
    instr.op = Opcode::Assign;
    instr.operands[1] = src;
    instr.operands[2] = Value::invalid();
}
