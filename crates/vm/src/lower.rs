//! IR → bytecode lowering.
//!
//! One function at a time: run register allocation over the IR live ranges,
//! reserve prologue save slots and argument homes, then walk the
//! instructions linearly emitting bytecode. Callee-saved registers the
//! function assigns (plus `$ra` when it makes calls) are saved in the
//! prologue and restored in the epilogue; `jmpr $ra` is the canonical
//! return. Callers bump `$sp` by their own frame size around calls so the
//! callee's frame starts at the new `$sp`.

use crate::bytecode::{Instr, Vmi};
use crate::callconv::{arg_locations, return_register, ArgLoc};
use crate::program::Program;
use crate::regalloc::{allocate, Allocation, VregLoc};
use crate::registers::Reg;
use std::collections::HashMap;
use std::fmt;
use tsn_core::{
    CallTarget, CodeHolder, Context, FuncId, Instruction, LabelId, NumClass, Opcode, Signature,
    TypeId, Value, ValueKind,
};

/// Errors detected while lowering a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LowerError {
    UnknownFunction { id: FuncId },
    MissingSignature { func: FuncId },
    /// A `param` appeared without a following `call`, or counts mismatched.
    MalformedCallSequence { at: usize },
    UnsupportedOperand { at: usize },
}

impl fmt::Display for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LowerError::UnknownFunction { id } => write!(f, "unknown function id {id}"),
            LowerError::MissingSignature { func } => {
                write!(f, "function {func} has no signature type")
            }
            LowerError::MalformedCallSequence { at } => {
                write!(f, "malformed param/call sequence at instruction {at}")
            }
            LowerError::UnsupportedOperand { at } => {
                write!(f, "unsupported operand shape at instruction {at}")
            }
        }
    }
}

impl std::error::Error for LowerError {}

// lowering scratch; the register allocator never hands these out
const SCRATCH_GP: [Reg; 3] = [Reg::S13, Reg::S14, Reg::S15];
const SCRATCH_FP: [Reg; 3] = [Reg::F13, Reg::F14, Reg::F15];

/// The bytecode backend. Lowers functions into one shared [`Program`].
#[derive(Debug, Default)]
pub struct VmBackend {
    pub program: Program,
}

struct FnLowering<'a> {
    ctx: &'a Context,
    alloc: Allocation,
    code: Vec<Instr>,
    /// label id -> local instruction index
    labels: HashMap<LabelId, usize>,
    /// (local index, label) branch/jump fixups
    fixups: Vec<(usize, LabelId)>,
    /// local indices of jumps to the epilogue
    ret_fixups: Vec<usize>,
    /// sp-relative homes for incoming arguments (already frame-shifted)
    arg_homes: HashMap<u8, u32>,
    /// stack slot id -> frame offset, captured from the stack allocator
    stack_offsets: HashMap<u32, u32>,
    /// argument locations per signature position of the current function
    own_arg_locs: Vec<ArgLoc>,
    /// bytes at the bottom of the frame holding incoming stack-passed
    /// arguments; the function's own slots sit above this
    arg_spill_base: u32,
    frame_size: u32,
    params: Vec<Value>,
}

impl VmBackend {
    pub fn new() -> Self {
        VmBackend::default()
    }

    /// Lower one function, returning its entry address. The entry is also
    /// recorded on the function in the registry.
    pub fn lower(&mut self, ctx: &mut Context, ch: &mut CodeHolder) -> Result<u64, LowerError> {
        let owner = ch.owner;
        let func = ctx
            .funcs
            .get(owner)
            .ok_or(LowerError::UnknownFunction { id: owner })?;
        let own_sig = ctx
            .types
            .get(func.sig_type)
            .and_then(|t| t.sig.clone())
            .ok_or(LowerError::MissingSignature { func: owner })?;

        let is_fp = |tp: TypeId| {
            ctx.types
                .get(tp)
                .map(|t| t.flags.is_floating_point)
                .unwrap_or(false)
        };
        let ranges = ch.live_ranges(is_fp);
        let alloc = allocate(ch, ranges);

        let has_calls = ch.code.iter().any(|i| i.op == Opcode::Call);
        let own_arg_locs = arg_locations(ctx, &own_sig);

        // arguments past the register file arrive at the bottom of this
        // frame; everything the function allocates itself shifts up past
        // that area
        let arg_spill_base = own_arg_locs
            .iter()
            .map(|l| match l {
                ArgLoc::Stack(off) => off + 8,
                ArgLoc::Reg(_) => 0,
            })
            .max()
            .unwrap_or(0);

        let mut lower = FnLowering {
            ctx,
            alloc,
            code: Vec::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
            ret_fixups: Vec::new(),
            arg_homes: HashMap::new(),
            stack_offsets: ch.stack.slots().map(|(id, info)| (id, info.offset)).collect(),
            own_arg_locs,
            arg_spill_base,
            frame_size: 0,
            params: Vec::new(),
        };

        // argument registers are volatile; when this function calls out,
        // every register-carried argument gets a frame home
        let mut save_slots: Vec<(Reg, u32)> = Vec::new();
        if has_calls {
            for (i, loc) in lower.own_arg_locs.clone().iter().enumerate() {
                if let ArgLoc::Reg(r) = loc {
                    if *r == Reg::V3 {
                        continue;
                    }
                    let off = ch.stack.reserve_raw(8) + arg_spill_base;
                    lower.arg_homes.insert(i as u8, off);
                    save_slots.push((*r, off));
                }
            }
        }
        for reg in lower.alloc.used_callee_saved.clone() {
            let off = ch.stack.reserve_raw(8) + arg_spill_base;
            save_slots.push((reg, off));
        }
        if has_calls {
            let off = ch.stack.reserve_raw(8) + arg_spill_base;
            save_slots.push((Reg::Ra, off));
        }
        lower.frame_size = (arg_spill_base + ch.stack.frame_size()).next_multiple_of(16);

        // prologue
        for &(reg, off) in &save_slots {
            lower.push(Instr::new(Vmi::St64).r1(reg).r2(Reg::Sp).imm(off as u64));
        }

        for (idx, instr) in ch.code.iter().enumerate() {
            lower.lower_instr(idx, instr, ch, &own_sig)?;
        }

        // epilogue: restore in reverse, then return
        let epilogue_at = lower.code.len();
        for &(reg, off) in save_slots.iter().rev() {
            if reg == Reg::Sp {
                continue;
            }
            lower.push(Instr::new(Vmi::Ld64).r1(reg).r2(Reg::Sp).imm(off as u64));
        }
        lower.push(Instr::new(Vmi::Jmpr).r1(Reg::Ra));

        // patch local fixups to absolute addresses
        let base = self.program.code.len() as u64;
        for (at, label) in &lower.fixups {
            let target = *lower.labels.get(label).unwrap_or(&epilogue_at);
            lower.code[*at].imm = base + target as u64;
        }
        for at in &lower.ret_fixups {
            lower.code[*at].imm = base + epilogue_at as u64;
        }

        tracing::debug!(
            func = owner,
            entry = base,
            instrs = lower.code.len(),
            frame = lower.frame_size,
            "lowered function"
        );

        self.program.code.extend(lower.code);
        ctx.funcs.set_entry(owner, base);
        Ok(base)
    }
}

impl<'a> FnLowering<'a> {
    fn push(&mut self, i: Instr) {
        self.code.push(i);
    }

    fn is_fp_type(&self, tp: TypeId) -> bool {
        self.ctx
            .types
            .get(tp)
            .map(|t| t.flags.is_floating_point)
            .unwrap_or(false)
    }

    fn type_size(&self, tp: TypeId) -> u32 {
        self.ctx.types.get(tp).map(|t| t.size).unwrap_or(8)
    }

    fn num_class(&self, tp: TypeId) -> NumClass {
        self.ctx
            .types
            .get(tp)
            .map(|t| t.num_class())
            .unwrap_or(NumClass::Uint)
    }

    fn emit_move(&mut self, src: Reg, dst: Reg) {
        if src == dst {
            return;
        }
        match (src.is_fp(), dst.is_fp()) {
            (false, false) => self.push(Instr::new(Vmi::Addui).r1(dst).r2(src)),
            (false, true) => self.push(Instr::new(Vmi::Mtfp).r1(src).r2(dst)),
            (true, false) => self.push(Instr::new(Vmi::Mffp).r1(src).r2(dst)),
            (true, true) => {
                self.push(Instr::new(Vmi::Mffp).r1(src).r2(SCRATCH_GP[2]));
                self.push(Instr::new(Vmi::Mtfp).r1(SCRATCH_GP[2]).r2(dst));
            }
        }
    }

    fn materialize_imm(&mut self, bits: u64, dst: Reg) {
        if dst.is_fp() {
            self.push(Instr::new(Vmi::Addui).r1(SCRATCH_GP[2]).r2(Reg::Zero).imm(bits));
            self.push(Instr::new(Vmi::Mtfp).r1(SCRATCH_GP[2]).r2(dst));
        } else {
            self.push(Instr::new(Vmi::Addui).r1(dst).r2(Reg::Zero).imm(bits));
        }
    }

    /// Bring a value into a register, preferring where it already lives.
    /// `scratch_idx` selects which scratch register to use when one is
    /// needed (operands of the same instruction must use distinct indices).
    fn read_value(&mut self, v: &Value, scratch_idx: usize, at: usize) -> Result<Reg, LowerError> {
        let fp = self.is_fp_type(v.tp);
        let scratch = if fp {
            SCRATCH_FP[scratch_idx]
        } else {
            SCRATCH_GP[scratch_idx]
        };
        match &v.kind {
            ValueKind::Reg(r) => match self.alloc.map.get(r) {
                Some(VregLoc::Phys(p)) => Ok(*p),
                Some(VregLoc::Spill(off)) => {
                    let off = (*off + self.arg_spill_base) as u64;
                    self.push(Instr::new(Vmi::Ld64).r1(scratch).r2(Reg::Sp).imm(off));
                    Ok(scratch)
                }
                // a register that was never allocated is write-only dead
                // code; any scratch will do
                None => Ok(scratch),
            },
            ValueKind::Stack(slot) => {
                let gp = SCRATCH_GP[scratch_idx];
                let offset = self
                    .stack_offset(*slot)
                    .ok_or(LowerError::UnsupportedOperand { at })?;
                self.push(
                    Instr::new(Vmi::Addui)
                        .r1(gp)
                        .r2(Reg::Sp)
                        .imm(offset as u64),
                );
                Ok(gp)
            }
            ValueKind::Arg(i) => {
                if let Some(&home) = self.arg_homes.get(i) {
                    self.push(Instr::new(Vmi::Ld64).r1(scratch).r2(Reg::Sp).imm(home as u64));
                    Ok(scratch)
                } else {
                    match self.own_arg_locs.get(*i as usize) {
                        Some(ArgLoc::Reg(r)) => Ok(*r),
                        // a stack-passed argument: the caller left it at the
                        // bottom of this frame
                        Some(ArgLoc::Stack(off)) => {
                            let off = *off as u64;
                            self.push(Instr::new(Vmi::Ld64).r1(scratch).r2(Reg::Sp).imm(off));
                            Ok(scratch)
                        }
                        None => Err(LowerError::UnsupportedOperand { at }),
                    }
                }
            }
            ValueKind::Imm(imm) => {
                self.materialize_imm(imm.bits(), scratch);
                Ok(scratch)
            }
            ValueKind::Invalid => Err(LowerError::UnsupportedOperand { at }),
        }
    }

    /// Bring a value into one specific register (argument setup, returns).
    fn read_value_into(&mut self, v: &Value, dst: Reg, at: usize) -> Result<(), LowerError> {
        if let Some(imm) = v.imm() {
            self.materialize_imm(imm.bits(), dst);
            return Ok(());
        }
        let src = self.read_value(v, 0, at)?;
        self.emit_move(src, dst);
        Ok(())
    }

    /// Destination register for an assigned operand plus the spill slot to
    /// store it to afterwards, if any.
    fn write_target(&mut self, v: &Value, at: usize) -> Result<(Reg, Option<u32>), LowerError> {
        match &v.kind {
            ValueKind::Reg(r) => match self.alloc.map.get(r) {
                Some(VregLoc::Phys(p)) => Ok((*p, None)),
                Some(VregLoc::Spill(off)) => {
                    let fp = self.is_fp_type(v.tp);
                    let scratch = if fp { SCRATCH_FP[2] } else { SCRATCH_GP[2] };
                    Ok((scratch, Some(*off)))
                }
                None => {
                    let fp = self.is_fp_type(v.tp);
                    Ok((if fp { SCRATCH_FP[2] } else { SCRATCH_GP[2] }, None))
                }
            },
            _ => Err(LowerError::UnsupportedOperand { at }),
        }
    }

    fn finish_write(&mut self, dst: Reg, spill: Option<u32>) {
        if let Some(off) = spill {
            let src = if dst.is_fp() {
                self.push(Instr::new(Vmi::Mffp).r1(dst).r2(SCRATCH_GP[2]));
                SCRATCH_GP[2]
            } else {
                dst
            };
            let off = (off + self.arg_spill_base) as u64;
            self.push(Instr::new(Vmi::St64).r1(src).r2(Reg::Sp).imm(off));
        }
    }

    fn stack_offset(&self, slot: u32) -> Option<u32> {
        self.stack_offsets
            .get(&slot)
            .map(|off| off + self.arg_spill_base)
    }

    fn lower_instr(
        &mut self,
        idx: usize,
        instr: &Instruction,
        ch: &CodeHolder,
        own_sig: &Signature,
    ) -> Result<(), LowerError> {
        use Opcode::*;
        match instr.op {
            Label => {
                if let Some(l) = instr.label_at(0) {
                    self.labels.insert(l, self.code.len());
                }
            }
            MetaIfBranch | MetaForLoop | MetaWhileLoop | MetaDoWhileLoop => {}
            StackAlloc | StackFree => {
                // frame layout was fixed at compile time; lifetime markers
                // produce no code
            }
            Jump => {
                let l = instr
                    .label_at(0)
                    .ok_or(LowerError::UnsupportedOperand { at: idx })?;
                self.fixups.push((self.code.len(), l));
                self.push(Instr::new(Vmi::Jmp));
            }
            Branch => {
                let cond = self.read_value(&instr.operands[0], 0, idx)?;
                let l = instr
                    .label_at(1)
                    .ok_or(LowerError::UnsupportedOperand { at: idx })?;
                self.fixups.push((self.code.len(), l));
                self.push(Instr::new(Vmi::Bneqz).r1(cond));
            }
            Load => {
                let (dst, spill) = self.write_target(&instr.operands[0], idx)?;
                let addr = self.read_value(&instr.operands[1], 0, idx)?;
                let off = instr.operands[2].imm().map(|m| m.as_u64()).unwrap_or(0);
                let op = match self.type_size(instr.operands[0].tp) {
                    1 => Vmi::Ld8,
                    2 => Vmi::Ld16,
                    4 => Vmi::Ld32,
                    _ => Vmi::Ld64,
                };
                self.push(Instr::new(op).r1(dst).r2(addr).imm(off));
                self.finish_write(dst, spill);
            }
            Store => {
                let src = self.read_value(&instr.operands[0], 0, idx)?;
                let addr = self.read_value(&instr.operands[1], 1, idx)?;
                let off = instr.operands[2].imm().map(|m| m.as_u64()).unwrap_or(0);
                let op = match self.type_size(instr.operands[0].tp) {
                    1 => Vmi::St8,
                    2 => Vmi::St16,
                    4 => Vmi::St32,
                    _ => Vmi::St64,
                };
                self.push(Instr::new(op).r1(src).r2(addr).imm(off));
            }
            ModuleData => {
                let (dst, spill) = self.write_target(&instr.operands[0], idx)?;
                let module = instr.operands[1].imm().map(|m| m.as_u64()).unwrap_or(0);
                let off = instr.operands[2].imm().map(|m| m.as_u64()).unwrap_or(0);
                self.push(Instr::new(Vmi::Addui).r1(Reg::V3).r2(Reg::Zero).imm(module));
                self.push(Instr::new(Vmi::Mptr).r1(dst).imm(off));
                self.finish_write(dst, spill);
            }
            Assign => {
                let (dst, spill) = self.write_target(&instr.operands[0], idx)?;
                self.read_value_into(&instr.operands[1], dst, idx)?;
                self.finish_write(dst, spill);
            }
            Cvt => {
                self.lower_cvt(idx, instr)?;
            }
            INeg | FNeg | DNeg | Not | Inv => {
                let (dst, spill) = self.write_target(&instr.operands[0], idx)?;
                let a = self.read_value(&instr.operands[1], 0, idx)?;
                match instr.op {
                    INeg => self.push(Instr::new(Vmi::Neg).r1(dst).r2(a)),
                    FNeg => self.push(Instr::new(Vmi::Negf).r1(dst).r2(a)),
                    DNeg => self.push(Instr::new(Vmi::Negd).r1(dst).r2(a)),
                    Not => self.push(Instr::new(Vmi::Cmpi).r1(dst).r2(a)),
                    Inv => self.push(Instr::new(Vmi::Xori).r1(dst).r2(a).imm(u64::MAX)),
                    _ => unreachable!(),
                }
                self.finish_write(dst, spill);
            }
            Param => {
                self.params.push(instr.operands[0].clone());
            }
            Call => {
                self.lower_call(idx, instr)?;
            }
            Ret => {
                if instr.operands[0].is_valid() {
                    if let Some(rr) = return_register(self.ctx, own_sig) {
                        self.read_value_into(&instr.operands[0], rr, idx)?;
                    }
                }
                self.ret_fixups.push(self.code.len());
                self.push(Instr::new(Vmi::Jmp));
            }
            _ => {
                // three-operand arithmetic/bitwise/logical/compare
                self.lower_binary(idx, instr)?;
            }
        }
        let _ = ch;
        Ok(())
    }

    fn lower_binary(&mut self, idx: usize, instr: &Instruction) -> Result<(), LowerError> {
        let (dst, spill) = self.write_target(&instr.operands[0], idx)?;
        let a = self.read_value(&instr.operands[1], 0, idx)?;
        let b = &instr.operands[2];

        // use the immediate form when the right operand is a constant
        let (rr, ri) = select_binary(instr.op).ok_or(LowerError::UnsupportedOperand { at: idx })?;
        match b.imm() {
            Some(imm) => {
                self.push(Instr::new(ri).r1(dst).r2(a).imm(imm.bits()));
            }
            None => {
                let b = self.read_value(b, 1, idx)?;
                self.push(Instr::new(rr).r1(dst).r2(a).r3(b));
            }
        }
        self.finish_write(dst, spill);
        Ok(())
    }

    fn lower_cvt(&mut self, idx: usize, instr: &Instruction) -> Result<(), LowerError> {
        let (dst, spill) = self.write_target(&instr.operands[0], idx)?;
        let src = &instr.operands[1];
        let from = self.num_class(src.tp);
        let to = self.num_class(instr.operands[0].tp);

        self.read_value_into(src, dst, idx)?;
        use NumClass::*;
        let op = match (from, to) {
            (Sint, F32) => Some(Vmi::CvtIf),
            (Sint, F64) => Some(Vmi::CvtId),
            (Sint, Uint) => Some(Vmi::CvtIu),
            (Uint, F32) => Some(Vmi::CvtUf),
            (Uint, F64) => Some(Vmi::CvtUd),
            (Uint, Sint) => Some(Vmi::CvtUi),
            (F32, Sint) => Some(Vmi::CvtFi),
            (F32, Uint) => Some(Vmi::CvtFu),
            (F32, F64) => Some(Vmi::CvtFd),
            (F64, Sint) => Some(Vmi::CvtDi),
            (F64, Uint) => Some(Vmi::CvtDu),
            (F64, F32) => Some(Vmi::CvtDf),
            _ => None,
        };
        if let Some(op) = op {
            self.push(Instr::new(op).r1(dst));
        }
        self.finish_write(dst, spill);
        Ok(())
    }

    fn lower_call(&mut self, idx: usize, instr: &Instruction) -> Result<(), LowerError> {
        let params = std::mem::take(&mut self.params);
        let callee = instr
            .callee
            .clone()
            .ok_or(LowerError::MalformedCallSequence { at: idx })?;

        let sig = match &callee {
            CallTarget::Func(fid) => {
                let f = self
                    .ctx
                    .funcs
                    .get(*fid)
                    .ok_or(LowerError::UnknownFunction { id: *fid })?;
                self.ctx
                    .types
                    .get(f.sig_type)
                    .and_then(|t| t.sig.clone())
                    .ok_or(LowerError::MissingSignature { func: *fid })?
            }
            CallTarget::Ptr(v) => self
                .ctx
                .types
                .get(v.tp)
                .and_then(|t| t.sig.clone())
                .ok_or(LowerError::UnsupportedOperand { at: idx })?,
        };

        if params.len() != sig.args.len() {
            return Err(LowerError::MalformedCallSequence { at: idx });
        }
        let locs = arg_locations(self.ctx, &sig);

        for (value, loc) in params.iter().zip(&locs) {
            match loc {
                ArgLoc::Reg(r) => self.read_value_into(value, *r, idx)?,
                ArgLoc::Stack(off) => {
                    // overflow argument: store it at the bottom of the
                    // callee's frame, which starts past ours
                    let src = self.read_value(value, 0, idx)?;
                    let at = self.frame_size as u64 + *off as u64;
                    self.push(Instr::new(Vmi::St64).r1(src).r2(Reg::Sp).imm(at));
                }
            }
        }

        // indirect targets resolve before the frame shift: their loads are
        // sp-relative
        let cb = match &callee {
            CallTarget::Ptr(v) => Some(self.read_value(v, 2, idx)?),
            CallTarget::Func(_) => None,
        };

        // the callee's frame starts past ours
        let frame = self.frame_size as u64;
        self.push(Instr::new(Vmi::Addui).r1(Reg::Sp).r2(Reg::Sp).imm(frame));
        match (&callee, cb) {
            (CallTarget::Func(fid), _) => {
                self.push(Instr::new(Vmi::Jal).imm(*fid as u64));
            }
            (CallTarget::Ptr(_), Some(cb)) => {
                self.push(Instr::new(Vmi::Jalr).r1(cb));
            }
            _ => unreachable!(),
        }
        self.push(Instr::new(Vmi::Subui).r1(Reg::Sp).r2(Reg::Sp).imm(frame));

        if instr.operands[0].is_valid() {
            if let Some(rr) = return_register(self.ctx, &sig) {
                let (dst, spill) = self.write_target(&instr.operands[0], idx)?;
                self.emit_move(rr, dst);
                self.finish_write(dst, spill);
            }
        }
        Ok(())
    }
}

/// Register-register and register-immediate opcodes for a three-operand IR
/// instruction.
fn select_binary(op: Opcode) -> Option<(Vmi, Vmi)> {
    use Opcode::*;
    Some(match op {
        IAdd => (Vmi::Add, Vmi::Addi),
        ISub => (Vmi::Sub, Vmi::Subi),
        IMul => (Vmi::Mul, Vmi::Muli),
        IDiv => (Vmi::Div, Vmi::Divi),
        IMod => (Vmi::Mod, Vmi::Modi),
        UAdd => (Vmi::Addu, Vmi::Addui),
        USub => (Vmi::Subu, Vmi::Subui),
        UMul => (Vmi::Mulu, Vmi::Mului),
        UDiv => (Vmi::Divu, Vmi::Divui),
        UMod => (Vmi::Modu, Vmi::Modui),
        FAdd => (Vmi::Fadd, Vmi::Faddi),
        FSub => (Vmi::Fsub, Vmi::Fsubi),
        FMul => (Vmi::Fmul, Vmi::Fmuli),
        FDiv => (Vmi::Fdiv, Vmi::Fdivi),
        FMod => (Vmi::Fmod, Vmi::Fmodi),
        DAdd => (Vmi::Dadd, Vmi::Daddi),
        DSub => (Vmi::Dsub, Vmi::Dsubi),
        DMul => (Vmi::Dmul, Vmi::Dmuli),
        DDiv => (Vmi::Ddiv, Vmi::Ddivi),
        DMod => (Vmi::Dmod, Vmi::Dmodi),
        Shl => (Vmi::Sl, Vmi::Sli),
        Shr => (Vmi::Sr, Vmi::Sri),
        Band => (Vmi::Band, Vmi::Bandi),
        Bor => (Vmi::Bor, Vmi::Bori),
        Xor => (Vmi::Xor, Vmi::Xori),
        LAnd => (Vmi::And, Vmi::Andi),
        LOr => (Vmi::Or, Vmi::Ori),
        ILt => (Vmi::Lt, Vmi::Lti),
        ILte => (Vmi::Lte, Vmi::Ltei),
        IGt => (Vmi::Gt, Vmi::Gti),
        IGte => (Vmi::Gte, Vmi::Gtei),
        IEq => (Vmi::Cmp, Vmi::Cmpi),
        INeq => (Vmi::Ncmp, Vmi::Ncmpi),
        ULt => (Vmi::Ult, Vmi::Ulti),
        ULte => (Vmi::Ulte, Vmi::Ultei),
        UGt => (Vmi::Ugt, Vmi::Ugti),
        UGte => (Vmi::Ugte, Vmi::Ugtei),
        UEq => (Vmi::Ucmp, Vmi::Ucmpi),
        UNeq => (Vmi::Uncmp, Vmi::Uncmpi),
        FLt => (Vmi::Flt, Vmi::Flti),
        FLte => (Vmi::Flte, Vmi::Fltei),
        FGt => (Vmi::Fgt, Vmi::Fgti),
        FGte => (Vmi::Fgte, Vmi::Fgtei),
        FEq => (Vmi::Fcmp, Vmi::Fcmpi),
        FNeq => (Vmi::Fncmp, Vmi::Fncmpi),
        DLt => (Vmi::Dlt, Vmi::Dlti),
        DLte => (Vmi::Dlte, Vmi::Dltei),
        DGt => (Vmi::Dgt, Vmi::Dgti),
        DGte => (Vmi::Dgte, Vmi::Dgtei),
        DEq => (Vmi::Dcmp, Vmi::Dcmpi),
        DNeq => (Vmi::Dncmp, Vmi::Dncmpi),
        _ => return None,
    })
}
