//! The three-address IR.
//!
//! Instructions are flat structs: an opcode, up to three typed [`Value`]
//! operands, an optional call target, and a source ref. Label ids ride in
//! unsigned-immediate operands; [`OpInfo::label_mask`] says which operand
//! positions are labels. The per-opcode [`OpInfo`] table is the contract the
//! optimizer and backends rely on: operand counts, which operand is
//! assigned, side effects, and memory behavior.

use crate::function::FuncId;
use crate::src_ref::SrcRef;
use crate::value::{Value, ValueKind};
use serde::Serialize;
use std::fmt;

/// Label id, unique per function.
pub type LabelId = u32;

/// IR opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Opcode {
    // memory
    Load,
    Store,
    StackAlloc,
    StackFree,
    ModuleData,
    // signed integer arithmetic
    IAdd,
    ISub,
    IMul,
    IDiv,
    IMod,
    // unsigned integer arithmetic
    UAdd,
    USub,
    UMul,
    UDiv,
    UMod,
    // f32 arithmetic
    FAdd,
    FSub,
    FMul,
    FDiv,
    FMod,
    // f64 arithmetic
    DAdd,
    DSub,
    DMul,
    DDiv,
    DMod,
    // shift / bitwise
    Shl,
    Shr,
    Band,
    Bor,
    Xor,
    Inv,
    // logical
    LAnd,
    LOr,
    Not,
    // signed comparison
    ILt,
    ILte,
    IGt,
    IGte,
    IEq,
    INeq,
    // unsigned comparison
    ULt,
    ULte,
    UGt,
    UGte,
    UEq,
    UNeq,
    // f32 comparison
    FLt,
    FLte,
    FGt,
    FGte,
    FEq,
    FNeq,
    // f64 comparison
    DLt,
    DLte,
    DGt,
    DGte,
    DEq,
    DNeq,
    // negation
    INeg,
    FNeg,
    DNeg,
    // conversion; operand 2 is an immediate packing (from_type, to_type)
    Cvt,
    // control flow
    Branch,
    Jump,
    Label,
    // structured control flow markers, consumed by backends
    MetaIfBranch,
    MetaForLoop,
    MetaWhileLoop,
    MetaDoWhileLoop,
    // calls
    Call,
    Param,
    Ret,
    // register copy
    Assign,
}

/// Static description of one opcode; the optimizer/backend contract.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub name: &'static str,
    /// Operand slots this opcode uses when all optional slots are present.
    pub operand_count: u8,
    /// Trailing operands that may be absent (`call` without a result,
    /// `ret` without a value).
    pub optional_operands: u8,
    /// Operand position written by the instruction, if any. Position 0 by
    /// convention.
    pub assigns_operand_index: Option<u8>,
    /// Barrier for the optimizer: never removed, never reordered across.
    pub has_side_effects: bool,
    pub reads_memory: bool,
    pub writes_memory: bool,
    /// Bitmask over operand positions that hold label ids.
    pub label_mask: u8,
}

const fn op3(name: &'static str) -> OpInfo {
    OpInfo {
        name,
        operand_count: 3,
        optional_operands: 0,
        assigns_operand_index: Some(0),
        has_side_effects: false,
        reads_memory: false,
        writes_memory: false,
        label_mask: 0,
    }
}

const fn op2(name: &'static str) -> OpInfo {
    OpInfo {
        name,
        operand_count: 2,
        optional_operands: 0,
        assigns_operand_index: Some(0),
        has_side_effects: false,
        reads_memory: false,
        writes_memory: false,
        label_mask: 0,
    }
}

const fn meta(name: &'static str, labels: u8, mask: u8) -> OpInfo {
    OpInfo {
        name,
        operand_count: labels,
        optional_operands: 0,
        assigns_operand_index: None,
        has_side_effects: true,
        reads_memory: false,
        writes_memory: false,
        label_mask: mask,
    }
}

impl Opcode {
    pub const fn info(self) -> OpInfo {
        use Opcode::*;
        match self {
            Load => OpInfo {
                name: "load",
                operand_count: 3,
                optional_operands: 1,
                assigns_operand_index: Some(0),
                has_side_effects: false,
                reads_memory: true,
                writes_memory: false,
                label_mask: 0,
            },
            Store => OpInfo {
                name: "store",
                operand_count: 3,
                optional_operands: 1,
                assigns_operand_index: None,
                has_side_effects: false,
                reads_memory: false,
                writes_memory: true,
                label_mask: 0,
            },
            StackAlloc => OpInfo {
                name: "stack_alloc",
                operand_count: 2,
                optional_operands: 0,
                assigns_operand_index: Some(0),
                has_side_effects: true,
                reads_memory: false,
                writes_memory: false,
                label_mask: 0,
            },
            StackFree => OpInfo {
                name: "stack_free",
                operand_count: 1,
                optional_operands: 0,
                assigns_operand_index: None,
                has_side_effects: true,
                reads_memory: false,
                writes_memory: false,
                label_mask: 0,
            },
            ModuleData => OpInfo {
                name: "module_data",
                operand_count: 3,
                optional_operands: 0,
                assigns_operand_index: Some(0),
                has_side_effects: false,
                reads_memory: false,
                writes_memory: false,
                label_mask: 0,
            },
            IAdd => op3("iadd"),
            ISub => op3("isub"),
            IMul => op3("imul"),
            IDiv => op3("idiv"),
            IMod => op3("imod"),
            UAdd => op3("uadd"),
            USub => op3("usub"),
            UMul => op3("umul"),
            UDiv => op3("udiv"),
            UMod => op3("umod"),
            FAdd => op3("fadd"),
            FSub => op3("fsub"),
            FMul => op3("fmul"),
            FDiv => op3("fdiv"),
            FMod => op3("fmod"),
            DAdd => op3("dadd"),
            DSub => op3("dsub"),
            DMul => op3("dmul"),
            DDiv => op3("ddiv"),
            DMod => op3("dmod"),
            Shl => op3("shl"),
            Shr => op3("shr"),
            Band => op3("band"),
            Bor => op3("bor"),
            Xor => op3("xor"),
            Inv => op2("inv"),
            LAnd => op3("land"),
            LOr => op3("lor"),
            Not => op2("not"),
            ILt => op3("ilt"),
            ILte => op3("ilte"),
            IGt => op3("igt"),
            IGte => op3("igte"),
            IEq => op3("ieq"),
            INeq => op3("ineq"),
            ULt => op3("ult"),
            ULte => op3("ulte"),
            UGt => op3("ugt"),
            UGte => op3("ugte"),
            UEq => op3("ueq"),
            UNeq => op3("uneq"),
            FLt => op3("flt"),
            FLte => op3("flte"),
            FGt => op3("fgt"),
            FGte => op3("fgte"),
            FEq => op3("feq"),
            FNeq => op3("fneq"),
            DLt => op3("dlt"),
            DLte => op3("dlte"),
            DGt => op3("dgt"),
            DGte => op3("dgte"),
            DEq => op3("deq"),
            DNeq => op3("dneq"),
            INeg => op2("ineg"),
            FNeg => op2("fneg"),
            DNeg => op2("dneg"),
            Cvt => op3("cvt"),
            Branch => OpInfo {
                name: "branch",
                operand_count: 2,
                optional_operands: 0,
                assigns_operand_index: None,
                has_side_effects: true,
                reads_memory: false,
                writes_memory: false,
                label_mask: 0b010,
            },
            Jump => meta("jump", 1, 0b001),
            Label => meta("label", 1, 0b001),
            MetaIfBranch => meta("meta_if_branch", 3, 0b111),
            MetaForLoop => meta("meta_for_loop", 2, 0b011),
            MetaWhileLoop => meta("meta_while_loop", 2, 0b011),
            MetaDoWhileLoop => meta("meta_do_while_loop", 1, 0b001),
            Call => OpInfo {
                name: "call",
                operand_count: 1,
                optional_operands: 1,
                assigns_operand_index: Some(0),
                has_side_effects: true,
                reads_memory: true,
                writes_memory: true,
                label_mask: 0,
            },
            Param => OpInfo {
                name: "param",
                operand_count: 1,
                optional_operands: 0,
                assigns_operand_index: None,
                has_side_effects: true,
                reads_memory: false,
                writes_memory: false,
                label_mask: 0,
            },
            Ret => OpInfo {
                name: "ret",
                operand_count: 1,
                optional_operands: 1,
                assigns_operand_index: None,
                has_side_effects: true,
                reads_memory: false,
                writes_memory: false,
                label_mask: 0,
            },
            Assign => op2("assign"),
        }
    }

    /// Three-operand arithmetic/bitwise/logical/compare: the shapes constant
    /// folding understands.
    pub fn is_foldable_binary(self) -> bool {
        let info = self.info();
        info.operand_count == 3
            && info.assigns_operand_index == Some(0)
            && !info.reads_memory
            && !info.writes_memory
            && !matches!(self, Opcode::Cvt | Opcode::ModuleData)
    }

    /// Two-operand rewrites constant folding understands (`neg`, `not`,
    /// `inv`).
    pub fn is_foldable_unary(self) -> bool {
        matches!(
            self,
            Opcode::INeg | Opcode::FNeg | Opcode::DNeg | Opcode::Not | Opcode::Inv
        )
    }

    /// Comparison opcodes produce bool-typed results.
    pub fn is_compare(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            ILt | ILte
                | IGt
                | IGte
                | IEq
                | INeq
                | ULt
                | ULte
                | UGt
                | UGte
                | UEq
                | UNeq
                | FLt
                | FLte
                | FGt
                | FGte
                | FEq
                | FNeq
                | DLt
                | DLte
                | DGt
                | DGte
                | DEq
                | DNeq
        )
    }

    /// Control-flow boundary for the optimizer (labels, branches, jumps, and
    /// the structured markers).
    pub fn is_control(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Branch
                | Jump
                | Label
                | MetaIfBranch
                | MetaForLoop
                | MetaWhileLoop
                | MetaDoWhileLoop
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.info().name)
    }
}

/// Call destination: a known function or a callable value (raw callback).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CallTarget {
    Func(FuncId),
    Ptr(Value),
}

/// One IR instruction.
#[derive(Debug, Clone, Serialize)]
pub struct Instruction {
    pub op: Opcode,
    pub operands: [Value; 3],
    pub callee: Option<CallTarget>,
    pub src: SrcRef,
}

impl Instruction {
    pub fn new(op: Opcode, src: SrcRef) -> Self {
        Instruction {
            op,
            operands: [Value::invalid(), Value::invalid(), Value::invalid()],
            callee: None,
            src,
        }
    }

    /// Number of leading valid operands.
    pub fn operands_used(&self) -> u8 {
        let mut n = 0;
        for v in &self.operands {
            if v.is_valid() {
                n += 1;
            } else {
                break;
            }
        }
        n
    }

    /// The operand this instruction writes, if any.
    pub fn assigned(&self) -> Option<&Value> {
        let idx = self.op.info().assigns_operand_index? as usize;
        let v = &self.operands[idx];
        if v.is_valid() {
            Some(v)
        } else {
            None
        }
    }

    /// Register id written by this instruction, if it writes one.
    pub fn assigned_reg(&self) -> Option<u32> {
        self.assigned().and_then(|v| v.reg_id())
    }

    /// Operand positions read (valid, not assigned, not labels).
    pub fn read_operands(&self) -> impl Iterator<Item = &Value> {
        let info = self.op.info();
        let assigns = info.assigns_operand_index.map(|i| i as usize);
        self.operands
            .iter()
            .enumerate()
            .filter(move |(i, v)| {
                v.is_valid() && Some(*i) != assigns && info.label_mask & (1 << *i) == 0
            })
            .map(|(_, v)| v)
    }

    /// Label id stored at operand position `idx`.
    pub fn label_at(&self, idx: usize) -> Option<LabelId> {
        if self.op.info().label_mask & (1 << idx) == 0 {
            return None;
        }
        self.operands[idx].imm().map(|imm| imm.as_u64() as LabelId)
    }

    /// All label ids this instruction refers to.
    pub fn labels(&self) -> impl Iterator<Item = LabelId> + '_ {
        (0..3).filter_map(|i| self.label_at(i))
    }

    /// Check operand shape against the opcode table.
    pub fn validate(&self) -> bool {
        let info = self.op.info();
        let used = self.operands_used();
        let min = info.operand_count - info.optional_operands;
        if used < min || used > info.operand_count {
            return false;
        }
        if let Some(idx) = info.assigns_operand_index {
            // the assigned slot, when present, must be a register or stack
            // address, never an immediate
            if (idx as u8) < used {
                let v = &self.operands[idx as usize];
                if matches!(v.kind, ValueKind::Imm(_)) {
                    return false;
                }
            }
        }
        true
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op.info().name)?;
        let info = self.op.info();
        for (i, v) in self.operands.iter().enumerate() {
            if !v.is_valid() {
                break;
            }
            if info.label_mask & (1 << i) != 0 {
                write!(f, " L{}", v.imm().map(|m| m.as_u64()).unwrap_or(0))?;
                continue;
            }
            match &v.kind {
                ValueKind::Reg(r) => write!(f, " $r{r}")?,
                ValueKind::Stack(s) => write!(f, " $s{s}")?,
                ValueKind::Arg(a) => write!(f, " $a{a}")?,
                ValueKind::Imm(imm) => match imm {
                    crate::value::Imm::I(v) => write!(f, " {v}")?,
                    crate::value::Imm::U(v) => write!(f, " {v}")?,
                    crate::value::Imm::F(v) => write!(f, " {v}")?,
                    crate::value::Imm::D(v) => write!(f, " {v}")?,
                    crate::value::Imm::Bytes(b) => write!(f, " <{} bytes>", b.len())?,
                },
                ValueKind::Invalid => {}
            }
        }
        if let Some(target) = &self.callee {
            match target {
                CallTarget::Func(id) => write!(f, " @f{id}")?,
                CallTarget::Ptr(v) => write!(f, " @[{:?}]", v.kind)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_info_shapes() {
        assert_eq!(Opcode::IAdd.info().operand_count, 3);
        assert_eq!(Opcode::IAdd.info().assigns_operand_index, Some(0));
        assert!(!Opcode::IAdd.info().has_side_effects);

        assert!(Opcode::Call.info().has_side_effects);
        assert!(Opcode::Load.info().reads_memory);
        assert!(Opcode::Store.info().writes_memory);
        assert_eq!(Opcode::Store.info().assigns_operand_index, None);
        assert_eq!(Opcode::MetaIfBranch.info().label_mask, 0b111);
    }

    #[test]
    fn test_every_opcode_has_coherent_info() {
        use Opcode::*;
        let all = [
            Load, Store, StackAlloc, StackFree, ModuleData, IAdd, ISub, IMul, IDiv, IMod, UAdd,
            USub, UMul, UDiv, UMod, FAdd, FSub, FMul, FDiv, FMod, DAdd, DSub, DMul, DDiv, DMod,
            Shl, Shr, Band, Bor, Xor, Inv, LAnd, LOr, Not, ILt, ILte, IGt, IGte, IEq, INeq, ULt,
            ULte, UGt, UGte, UEq, UNeq, FLt, FLte, FGt, FGte, FEq, FNeq, DLt, DLte, DGt, DGte,
            DEq, DNeq, INeg, FNeg, DNeg, Cvt, Branch, Jump, Label, MetaIfBranch, MetaForLoop,
            MetaWhileLoop, MetaDoWhileLoop, Call, Param, Ret, Assign,
        ];
        for op in all {
            let info = op.info();
            assert!(info.operand_count <= 3, "{}", info.name);
            assert!(info.optional_operands <= info.operand_count, "{}", info.name);
            if let Some(idx) = info.assigns_operand_index {
                assert!(idx < info.operand_count, "{}", info.name);
            }
        }
    }

    #[test]
    fn test_validate_operand_counts() {
        let mut i = Instruction::new(Opcode::IAdd, SrcRef::default());
        i.operands[0] = Value::reg(0, 1);
        i.operands[1] = Value::imm_i(1, 1);
        assert!(!i.validate());
        i.operands[2] = Value::imm_i(2, 1);
        assert!(i.validate());

        // assigned operand must not be an immediate
        let mut bad = Instruction::new(Opcode::Assign, SrcRef::default());
        bad.operands[0] = Value::imm_i(0, 1);
        bad.operands[1] = Value::reg(1, 1);
        assert!(!bad.validate());
    }

    #[test]
    fn test_call_result_is_optional() {
        let mut call = Instruction::new(Opcode::Call, SrcRef::default());
        call.callee = Some(CallTarget::Func(3));
        assert!(call.validate());
        call.operands[0] = Value::reg(0, 1);
        assert!(call.validate());
    }

    #[test]
    fn test_labels_are_extracted() {
        let mut b = Instruction::new(Opcode::Branch, SrcRef::default());
        b.operands[0] = Value::reg(1, 1);
        b.operands[1] = Value::imm_u(7, 0);
        assert_eq!(b.labels().collect::<Vec<_>>(), vec![7]);
        assert_eq!(b.read_operands().count(), 1);
    }
}
