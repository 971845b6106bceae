//! Constant folding.
//!
//! Any arithmetic/compare/bitwise/logical instruction whose source operands
//! are all immediates is computed here and rewritten to `assign D K`. The
//! computation is directed by the opcode's numeric class (signed, unsigned,
//! f32, f64); comparisons and logical operators produce bool. Divisions by a
//! constant zero are left alone; the runtime owns that failure.

use crate::{OptimizationPass, PassResult};
use tsn_core::{CodeHolder, Context, Imm, Opcode, Primitive, TypeId, Value};

#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantFolding;

impl OptimizationPass for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant_folding"
    }

    fn run(&mut self, ctx: &mut Context, ch: &mut CodeHolder) -> PassResult {
        let bool_t = ctx.types.primitive(Primitive::Bool);
        let mut changed = false;

        for idx in 0..ch.code.len() {
            let instr = &ch.code[idx];
            let folded = if instr.op.is_foldable_binary() {
                let (a, b) = (&instr.operands[1], &instr.operands[2]);
                match (a.imm(), b.imm()) {
                    (Some(a_imm), Some(b_imm)) => {
                        fold_binary(instr.op, a_imm, b_imm, a.tp, bool_t)
                    }
                    _ => None,
                }
            } else if instr.op.is_foldable_unary() {
                let a = &instr.operands[1];
                a.imm().and_then(|imm| fold_unary(instr.op, imm, a.tp, bool_t))
            } else {
                None
            };

            if let Some(result) = folded {
                let instr = &mut ch.code[idx];
                tracing::debug!(index = idx, op = %instr.op, "folded constant-only operation");
                instr.op = Opcode::Assign;
                instr.operands[1] = result;
                instr.operands[2] = Value::invalid();
                changed = true;
            }
        }

        PassResult {
            changed,
            repeat_group: changed,
        }
    }
}

/// Keep the payload family of `a` for bitwise results so signed immediates
/// stay signed through rewrites.
fn bits_like(a: &Imm, bits: u64, tp: TypeId) -> Value {
    match a {
        Imm::I(_) => Value::imm_i(bits as i64, tp),
        _ => Value::imm_u(bits, tp),
    }
}

fn bool_imm(v: bool, bool_t: TypeId) -> Value {
    Value::imm_u(v as u64, bool_t)
}

/// Compute an immediate × immediate operation, or `None` when the rewrite
/// must be rejected (division by a constant zero, oversized shifts). Shared
/// with the compiler, which folds constant subexpressions while lowering.
pub fn fold_binary(op: Opcode, a: &Imm, b: &Imm, a_tp: TypeId, bool_t: TypeId) -> Option<Value> {
    use Opcode::*;

    let iv = |v: i64| Some(Value::imm_i(v, a_tp));
    let uv = |v: u64| Some(Value::imm_u(v, a_tp));
    let fv = |v: f32| Some(Value::imm_f(v, a_tp));
    let dv = |v: f64| Some(Value::imm_d(v, a_tp));
    let bv = |v: bool| Some(bool_imm(v, bool_t));

    let (ai, bi) = (a.as_i64(), b.as_i64());
    let (au, bu) = (a.as_u64(), b.as_u64());
    let (ad, bd) = (a.as_f64(), b.as_f64());
    let (af, bf) = (ad as f32, bd as f32);

    match op {
        IAdd => iv(ai.wrapping_add(bi)),
        ISub => iv(ai.wrapping_sub(bi)),
        IMul => iv(ai.wrapping_mul(bi)),
        IDiv if bi != 0 => iv(ai.wrapping_div(bi)),
        IMod if bi != 0 => iv(ai.wrapping_rem(bi)),
        IDiv | IMod => None,

        UAdd => uv(au.wrapping_add(bu)),
        USub => uv(au.wrapping_sub(bu)),
        UMul => uv(au.wrapping_mul(bu)),
        UDiv if bu != 0 => uv(au / bu),
        UMod if bu != 0 => uv(au % bu),
        UDiv | UMod => None,

        FAdd => fv(af + bf),
        FSub => fv(af - bf),
        FMul => fv(af * bf),
        FDiv => fv(af / bf),
        FMod => fv(af % bf),

        DAdd => dv(ad + bd),
        DSub => dv(ad - bd),
        DMul => dv(ad * bd),
        DDiv => dv(ad / bd),
        DMod => dv(ad % bd),

        Shl if bu < 64 => Some(bits_like(a, a.bits() << bu, a_tp)),
        Shr if bu < 64 => match a {
            Imm::I(v) => iv(v >> bu),
            _ => uv(a.bits() >> bu),
        },
        Shl | Shr => None,
        Band => Some(bits_like(a, a.bits() & b.bits(), a_tp)),
        Bor => Some(bits_like(a, a.bits() | b.bits(), a_tp)),
        Xor => Some(bits_like(a, a.bits() ^ b.bits(), a_tp)),

        LAnd => bv(a.is_truthy() && b.is_truthy()),
        LOr => bv(a.is_truthy() || b.is_truthy()),

        ILt => bv(ai < bi),
        ILte => bv(ai <= bi),
        IGt => bv(ai > bi),
        IGte => bv(ai >= bi),
        IEq => bv(ai == bi),
        INeq => bv(ai != bi),

        ULt => bv(au < bu),
        ULte => bv(au <= bu),
        UGt => bv(au > bu),
        UGte => bv(au >= bu),
        UEq => bv(au == bu),
        UNeq => bv(au != bu),

        FLt => bv(af < bf),
        FLte => bv(af <= bf),
        FGt => bv(af > bf),
        FGte => bv(af >= bf),
        FEq => bv(af == bf),
        FNeq => bv(af != bf),

        DLt => bv(ad < bd),
        DLte => bv(ad <= bd),
        DGt => bv(ad > bd),
        DGte => bv(ad >= bd),
        DEq => bv(ad == bd),
        DNeq => bv(ad != bd),

        _ => None,
    }
}

pub fn fold_unary(op: Opcode, a: &Imm, a_tp: TypeId, bool_t: TypeId) -> Option<Value> {
    match op {
        Opcode::INeg => Some(Value::imm_i(a.as_i64().wrapping_neg(), a_tp)),
        Opcode::FNeg => Some(Value::imm_f(-(a.as_f64() as f32), a_tp)),
        Opcode::DNeg => Some(Value::imm_d(-a.as_f64(), a_tp)),
        Opcode::Not => Some(bool_imm(!a.is_truthy(), bool_t)),
        Opcode::Inv => Some(bits_like(a, !a.bits(), a_tp)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsn_core::{Instruction, SrcRef};

    fn holder_with(instrs: Vec<Instruction>) -> CodeHolder {
        let mut ch = CodeHolder::new(1);
        for i in instrs {
            ch.emit(i);
        }
        ch
    }

    fn binary(op: Opcode, a: Value, b: Value, dest_tp: TypeId) -> Instruction {
        let mut i = Instruction::new(op, SrcRef::default());
        i.operands[0] = Value::reg(0, dest_tp);
        i.operands[1] = a;
        i.operands[2] = b;
        i
    }

    #[test]
    fn test_folds_integer_arithmetic() {
        let mut ctx = Context::new();
        let i32t = ctx.types.primitive(Primitive::I32);
        let mut ch = holder_with(vec![binary(
            Opcode::IAdd,
            Value::imm_i(2, i32t),
            Value::imm_i(12, i32t),
            i32t,
        )]);

        let result = ConstantFolding.run(&mut ctx, &mut ch);
        assert!(result.changed);
        assert_eq!(ch.code[0].op, Opcode::Assign);
        assert_eq!(ch.code[0].operands[1], Value::imm_i(14, i32t));
    }

    #[test]
    fn test_comparison_folds_to_bool() {
        let mut ctx = Context::new();
        let i32t = ctx.types.primitive(Primitive::I32);
        let bool_t = ctx.types.primitive(Primitive::Bool);
        let mut ch = holder_with(vec![binary(
            Opcode::ILt,
            Value::imm_i(3, i32t),
            Value::imm_i(5, i32t),
            bool_t,
        )]);

        ConstantFolding.run(&mut ctx, &mut ch);
        assert_eq!(ch.code[0].op, Opcode::Assign);
        assert_eq!(ch.code[0].operands[1], Value::imm_u(1, bool_t));
    }

    #[test]
    fn test_division_by_zero_is_left_for_runtime() {
        let mut ctx = Context::new();
        let i32t = ctx.types.primitive(Primitive::I32);
        let mut ch = holder_with(vec![binary(
            Opcode::IDiv,
            Value::imm_i(1, i32t),
            Value::imm_i(0, i32t),
            i32t,
        )]);

        let result = ConstantFolding.run(&mut ctx, &mut ch);
        assert!(!result.changed);
        assert_eq!(ch.code[0].op, Opcode::IDiv);
    }

    #[test]
    fn test_float_modulo_uses_fmod_semantics() {
        let mut ctx = Context::new();
        let f64t = ctx.types.primitive(Primitive::F64);
        let mut ch = holder_with(vec![binary(
            Opcode::DMod,
            Value::imm_d(7.5, f64t),
            Value::imm_d(2.0, f64t),
            f64t,
        )]);

        ConstantFolding.run(&mut ctx, &mut ch);
        assert_eq!(ch.code[0].operands[1], Value::imm_d(1.5, f64t));
    }

    #[test]
    fn test_non_immediate_operands_are_untouched() {
        let mut ctx = Context::new();
        let i32t = ctx.types.primitive(Primitive::I32);
        let mut ch = holder_with(vec![binary(
            Opcode::IAdd,
            Value::reg(1, i32t),
            Value::imm_i(1, i32t),
            i32t,
        )]);

        let result = ConstantFolding.run(&mut ctx, &mut ch);
        assert!(!result.changed);
    }

    #[test]
    fn test_unary_folds() {
        let mut ctx = Context::new();
        let i64t = ctx.types.primitive(Primitive::I64);
        let bool_t = ctx.types.primitive(Primitive::Bool);

        let mut neg = Instruction::new(Opcode::INeg, SrcRef::default());
        neg.operands[0] = Value::reg(0, i64t);
        neg.operands[1] = Value::imm_i(9, i64t);

        let mut not = Instruction::new(Opcode::Not, SrcRef::default());
        not.operands[0] = Value::reg(1, bool_t);
        not.operands[1] = Value::imm_u(0, bool_t);

        let mut ch = holder_with(vec![neg, not]);
        ConstantFolding.run(&mut ctx, &mut ch);
        assert_eq!(ch.code[0].operands[1], Value::imm_i(-9, i64t));
        assert_eq!(ch.code[1].operands[1], Value::imm_u(1, bool_t));
    }

    #[test]
    fn test_monotone_rewrite_only_produces_assigns() {
        let mut ctx = Context::new();
        let i32t = ctx.types.primitive(Primitive::I32);
        let before_arith = 2;
        let mut ch = holder_with(vec![
            binary(Opcode::IMul, Value::imm_i(3, i32t), Value::imm_i(4, i32t), i32t),
            binary(Opcode::IAdd, Value::imm_i(2, i32t), Value::imm_i(12, i32t), i32t),
        ]);

        ConstantFolding.run(&mut ctx, &mut ch);
        let arith_after = ch
            .code
            .iter()
            .filter(|i| i.op.is_foldable_binary())
            .count();
        assert!(arith_after <= before_arith);
        assert!(ch.code.iter().all(|i| i.op == Opcode::Assign));
    }
}
