//! Type conversion.
//!
//! `convert` chooses, in order: identity (after alias resolution), a `cvt`
//! for numeric-to-numeric (constants convert at compile time), a
//! single-argument constructor on the target type, and otherwise reports
//! `no valid conversion`.

use super::{calls, Lowering};
use crate::ast::SrcLoc;
use crate::symtab::conversion_cost;
use tsn_core::{Imm, MessageCode, NumClass, Opcode, TypeId, Value};

/// Pack the (from, to) type ids a `cvt` instruction carries.
pub fn pack_cvt(from: TypeId, to: TypeId) -> u64 {
    ((from as u64) << 32) | to as u64
}

pub fn unpack_cvt(packed: u64) -> (TypeId, TypeId) {
    ((packed >> 32) as TypeId, packed as TypeId)
}

pub fn convert(lw: &mut Lowering, v: Value, target: TypeId, loc: SrcLoc) -> Value {
    if lw.is_err(&v) {
        return v;
    }
    let from = lw.ctx.types.resolve_alias(v.tp);
    let to = lw.ctx.types.resolve_alias(target);
    if from == to {
        return v.with_type(target);
    }

    let (Some(ft), Some(tt)) = (lw.ctx.types.get(from), lw.ctx.types.get(to)) else {
        return lw.err_value();
    };

    if ft.is_numeric() && tt.is_numeric() {
        let fc = ft.num_class();
        let tc = tt.num_class();

        // constants convert at compile time
        if let Some(imm) = v.imm() {
            return fold_imm(imm, tc, target);
        }

        if fc == tc {
            // same class: the register representation is already correct
            return v.with_type(target);
        }

        let dest = lw.reg(target);
        lw.emit3(
            Opcode::Cvt,
            dest.clone(),
            v,
            Value::imm_u(pack_cvt(from, to), 0),
            loc,
        );
        return dest;
    }

    // a single-argument constructor on the target type
    if let Some(ctor) = calls::find_ctor(lw, to, &[v.tp]) {
        let tmp = lw.stack_alloc(target, loc);
        let tmp = lw.raise_stack_flag(tmp);
        calls::emit_call(lw, calls::Callee::Func(ctor), Some(tmp.clone()), &[v], loc);
        return tmp;
    }

    let from_name = lw.ctx.type_name(v.tp).to_string();
    let to_name = lw.ctx.type_name(target).to_string();
    lw.error(
        MessageCode::CNoValidConversion,
        loc,
        format!("no valid conversion from '{from_name}' to '{to_name}'"),
    );
    lw.err_value()
}

fn fold_imm(imm: &Imm, target_class: NumClass, target: TypeId) -> Value {
    match target_class {
        NumClass::Sint => Value::imm_i(imm.as_i64(), target),
        NumClass::Uint => Value::imm_u(imm.as_u64(), target),
        NumClass::F32 => Value::imm_f(imm.as_f64() as f32, target),
        NumClass::F64 => Value::imm_d(imm.as_f64(), target),
    }
}

/// Reduce a value to a bool by comparing against zero (identity for bool).
pub fn to_bool(lw: &mut Lowering, v: Value, loc: SrcLoc) -> Value {
    if lw.is_err(&v) {
        return v;
    }
    let bool_t = lw.ctx.types.primitive(tsn_core::Primitive::Bool);
    let resolved = lw.ctx.types.resolve_alias(v.tp);
    if resolved == bool_t {
        return v;
    }
    let Some(t) = lw.ctx.types.get(resolved) else {
        return lw.err_value();
    };
    if !t.is_numeric() {
        let name = lw.ctx.type_name(v.tp).to_string();
        lw.error(
            MessageCode::CNoValidConversion,
            loc,
            format!("no valid conversion from '{name}' to 'bool'"),
        );
        return lw.err_value();
    }

    let op = match t.num_class() {
        NumClass::Sint => Opcode::INeq,
        NumClass::Uint => Opcode::UNeq,
        NumClass::F32 => Opcode::FNeq,
        NumClass::F64 => Opcode::DNeq,
    };
    let zero = match t.num_class() {
        NumClass::Sint => Value::imm_i(0, v.tp),
        NumClass::Uint => Value::imm_u(0, v.tp),
        NumClass::F32 => Value::imm_f(0.0, v.tp),
        NumClass::F64 => Value::imm_d(0.0, v.tp),
    };
    let dest = lw.reg(bool_t);
    lw.emit3(op, dest.clone(), v, zero, loc);
    dest
}

/// Usual arithmetic promotion: the wider/floatier operand type wins.
pub fn promote(lw: &Lowering, a: TypeId, b: TypeId) -> TypeId {
    let ra = lw.ctx.types.resolve_alias(a);
    let rb = lw.ctx.types.resolve_alias(b);
    if ra == rb {
        return ra;
    }
    let (Some(ta), Some(tb)) = (lw.ctx.types.get(ra), lw.ctx.types.get(rb)) else {
        return ra;
    };
    let rank = |t: &tsn_core::Type| match t.num_class() {
        NumClass::F64 => (3, 8),
        NumClass::F32 => (2, 4),
        NumClass::Sint => (1, t.size),
        NumClass::Uint => (0, t.size),
    };
    if rank(ta) >= rank(tb) {
        ra
    } else {
        rb
    }
}

/// True when `convert(convert(v, to), from)` would round-trip without loss.
pub fn is_lossless(lw: &Lowering, from: TypeId, to: TypeId) -> bool {
    conversion_cost(lw.ctx, from, to) == Some(1) || from == to
}
