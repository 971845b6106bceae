//! Expression lowering. Every expression produces a [`Value`].

use super::convert::{convert, promote, to_bool};
use super::{calls, closures, Lowering};
use crate::ast::{BinaryOp, Expr, SrcLoc, UnaryOp};
use crate::symtab::Symbol;
use tsn_core::{
    FuncId, MessageCode, NumClass, Opcode, Primitive, TypeId, Value,
};

/// A resolved assignment target.
pub enum Place {
    /// A named variable: a register for primitives, an address for
    /// aggregates.
    Var(Value),
    /// A property of an object.
    Prop {
        this: Value,
        prop_tp: TypeId,
        offset: u32,
        setter: Option<FuncId>,
        getter: Option<FuncId>,
        writable: bool,
    },
    /// A pointer produced by an `operator[]` returning a reference.
    Deref { ptr: Value, tp: TypeId },
}

pub fn lower_expr(lw: &mut Lowering, e: &Expr) -> Value {
    match e {
        Expr::IntLit { value, .. } => {
            let tp = if i32::try_from(*value).is_ok() {
                lw.ctx.types.primitive(Primitive::I32)
            } else {
                lw.ctx.types.primitive(Primitive::I64)
            };
            Value::imm_i(*value, tp)
        }
        Expr::UintLit { value, .. } => Value::imm_u(*value, lw.ctx.types.primitive(Primitive::U64)),
        Expr::FloatLit { value, is_f32, .. } => {
            if *is_f32 {
                Value::imm_f(*value as f32, lw.ctx.types.primitive(Primitive::F32))
            } else {
                Value::imm_d(*value, lw.ctx.types.primitive(Primitive::F64))
            }
        }
        Expr::BoolLit { value, .. } => {
            Value::imm_u(*value as u64, lw.ctx.types.primitive(Primitive::Bool))
        }
        Expr::StrLit { value, loc } => lower_str_lit(lw, value, *loc),
        Expr::ObjectLit { fields, loc } => lower_object_lit(lw, fields, *loc),
        Expr::Ident { name, loc } => lower_ident(lw, name, *loc),
        Expr::Member { obj, name, loc } => lower_member(lw, obj, name, *loc),
        Expr::Index { obj, index, loc } => lower_index(lw, obj, index, *loc),
        Expr::Call { .. } => calls::lower_call(lw, e),
        Expr::Binary { op, lhs, rhs, loc } => lower_binary(lw, *op, lhs, rhs, *loc),
        Expr::Unary { op, expr, loc } => lower_unary(lw, *op, expr, *loc),
        Expr::Assign {
            target,
            value,
            op,
            loc,
        } => lower_assign(lw, target, value, *op, *loc),
        Expr::Conditional {
            cond, then, els, loc,
        } => lower_conditional(lw, cond, then, els, *loc),
        Expr::Lambda {
            params, ret, body, loc,
        } => closures::lower_lambda(lw, params, ret.as_ref(), body, *loc),
        Expr::New { ty, args, loc } => lower_new(lw, ty, args, *loc),
        Expr::Cast { expr, ty, loc } => {
            let v = lower_expr(lw, expr);
            match lw.type_from_ref(ty, *loc) {
                Some(target) => convert(lw, v, target, *loc),
                None => lw.err_value(),
            }
        }
    }
}

fn lower_str_lit(lw: &mut Lowering, value: &str, loc: SrcLoc) -> Value {
    let mut bytes = value.as_bytes().to_vec();
    bytes.push(0);
    let module_id = lw.module;
    let off = lw
        .ctx
        .modules
        .get_mut(module_id)
        .map(|m| m.add_data(&bytes))
        .unwrap_or(0);
    let string_t = lw.ctx.types.string();
    let dest = lw.reg(string_t);
    lw.emit3(
        Opcode::ModuleData,
        dest.clone(),
        Value::imm_u(module_id as u64, 0),
        Value::imm_u(off as u64, 0),
        loc,
    );
    dest
}

fn lower_object_lit(lw: &mut Lowering, fields: &[(String, Expr)], loc: SrcLoc) -> Value {
    // lower the field values first so their types shape the anonymous type
    let values: Vec<Value> = fields.iter().map(|(_, e)| lower_expr(lw, e)).collect();
    if values.iter().any(|v| lw.is_err(v)) {
        return lw.err_value();
    }

    let key = lw.next_ast_key();
    let module_name = lw
        .ctx
        .modules
        .get(lw.module)
        .map(|m| m.name.clone())
        .unwrap_or_default();
    let mut t = tsn_core::Type::structure(
        format!("$anon_{key}"),
        format!("{module_name}::$anon_{key}"),
    );
    t.flags.is_anonymous = true;
    t.flags.is_trivially_copyable = true;
    t.flags.is_trivially_destructible = true;
    let mut offset = 0u32;
    for ((name, _), v) in fields.iter().zip(&values) {
        let size = lw.type_size(v.tp).max(1);
        offset = offset.next_multiple_of(size.min(8));
        t.props.push(tsn_core::TypeProp {
            name: name.clone(),
            tp: v.tp,
            offset,
            access: tsn_core::Access::Public,
            getter: None,
            setter: None,
            flags: tsn_core::PropFlags {
                is_static: false,
                is_pointer: false,
                can_read: true,
                can_write: true,
            },
        });
        offset += size;
    }
    t.size = offset.next_multiple_of(8).max(8);
    let tp = lw.ctx.types.intern(t);
    if let Some(m) = lw.ctx.modules.get_mut(lw.module) {
        m.types.push(tp);
    }

    let obj = lw.stack_alloc(tp, loc);
    let obj = lw.raise_stack_flag(obj);
    let offsets: Vec<(u32, TypeId)> = lw
        .ctx
        .types
        .get(tp)
        .map(|t| t.props.iter().map(|p| (p.offset, p.tp)).collect())
        .unwrap_or_default();
    for (v, (off, ptp)) in values.into_iter().zip(offsets) {
        let v = convert(lw, v, ptp, loc);
        store_at(lw, v, obj.clone(), off, loc);
    }
    obj
}

fn lower_ident(lw: &mut Lowering, name: &str, loc: SrcLoc) -> Value {
    match lw.symtab.get(name).cloned() {
        Some(Symbol::Var(v)) => v,
        Some(Symbol::Capture { tp, offset, .. }) => closures::load_capture(lw, tp, offset, loc),
        Some(Symbol::Funcs(_)) => {
            lw.error(
                MessageCode::CInvalidOperands,
                loc,
                format!("function '{name}' is not a value; wrap it in a lambda"),
            );
            lw.err_value()
        }
        Some(Symbol::Type(_)) | Some(Symbol::Module(_)) => {
            lw.error(
                MessageCode::CInvalidOperands,
                loc,
                format!("'{name}' is not a value"),
            );
            lw.err_value()
        }
        None => {
            // inside a method, a bare property name resolves through `this`
            if let Some((this, prop)) = this_prop(lw, name) {
                if let Some(getter) = prop.getter {
                    return calls::emit_call(lw, calls::Callee::Func(getter), Some(this), &[], loc);
                }
                let addr = prop_addr(lw, this, prop.offset, prop.tp, loc);
                if lw.is_primitive(prop.tp) {
                    let dest = lw.reg(prop.tp);
                    lw.emit2(Opcode::Load, dest.clone(), addr, loc);
                    return dest;
                }
                return addr;
            }
            lw.error(
                MessageCode::CUndefinedIdentifier,
                loc,
                format!("undefined identifier '{name}'"),
            );
            lw.err_value()
        }
    }
}

/// Resolve a bare name as a property of the enclosing method's receiver.
fn this_prop(lw: &Lowering, name: &str) -> Option<(Value, tsn_core::TypeProp)> {
    let Some(Symbol::Var(this)) = lw.symtab.get("this") else {
        return None;
    };
    let tp = lw.ctx.types.resolve_alias(this.tp);
    let prop = lw.ctx.types.get(tp)?.prop(name)?.clone();
    Some((this.clone(), prop))
}

/// Address of `base + offset`, typed as the property type. Offset zero is
/// the base itself.
pub fn prop_addr(lw: &mut Lowering, base: Value, offset: u32, tp: TypeId, loc: SrcLoc) -> Value {
    if offset == 0 {
        return base.with_type(tp);
    }
    let u64t = lw.ctx.types.primitive(Primitive::U64);
    let dest = lw.reg(u64t);
    lw.emit3(
        Opcode::UAdd,
        dest.clone(),
        base,
        Value::imm_u(offset as u64, u64t),
        loc,
    );
    dest.with_type(tp)
}

/// Store `v` at `base + offset`, using `v`'s type for the width.
pub fn store_at(lw: &mut Lowering, v: Value, base: Value, offset: u32, loc: SrcLoc) {
    let addr = prop_addr(lw, base, offset, v.tp, loc);
    lw.emit2(Opcode::Store, v, addr, loc);
}

fn lower_member(lw: &mut Lowering, obj: &Expr, name: &str, loc: SrcLoc) -> Value {
    // module member: a global, loaded from the module data segment
    if let Expr::Ident { name: mod_name, .. } = obj {
        if let Some(Symbol::Module(mid)) = lw.symtab.get(mod_name).cloned() {
            return lower_module_member(lw, mid, name, loc);
        }
    }

    let base = lower_expr(lw, obj);
    if lw.is_err(&base) {
        return base;
    }
    let tp = lw.ctx.types.resolve_alias(base.tp);
    let Some(prop) = lw.ctx.types.get(tp).and_then(|t| t.prop(name)).cloned() else {
        let tn = lw.ctx.type_name(base.tp).to_string();
        lw.error(
            MessageCode::CNoSuchProperty,
            loc,
            format!("type '{tn}' has no property '{name}'"),
        );
        return lw.err_value();
    };

    if let Some(getter) = prop.getter {
        return calls::emit_call(lw, calls::Callee::Func(getter), Some(base), &[], loc);
    }

    let addr = prop_addr(lw, base, prop.offset, prop.tp, loc);
    if lw.is_primitive(prop.tp) {
        let dest = lw.reg(prop.tp);
        lw.emit2(Opcode::Load, dest.clone(), addr, loc);
        dest
    } else {
        addr
    }
}

fn lower_module_member(lw: &mut Lowering, mid: u32, name: &str, loc: SrcLoc) -> Value {
    let global = lw
        .ctx
        .modules
        .get(mid)
        .and_then(|m| m.globals.iter().find(|g| g.name == name))
        .cloned();
    let Some(global) = global else {
        lw.error(
            MessageCode::CNoSuchProperty,
            loc,
            format!("module has no member '{name}'"),
        );
        return lw.err_value();
    };
    let u64t = lw.ctx.types.primitive(Primitive::U64);
    let addr = lw.reg(u64t);
    lw.emit3(
        Opcode::ModuleData,
        addr.clone(),
        Value::imm_u(mid as u64, 0),
        Value::imm_u(global.offset as u64, 0),
        loc,
    );
    let addr = addr.with_type(global.tp);
    if lw.is_primitive(global.tp) {
        let dest = lw.reg(global.tp);
        lw.emit2(Opcode::Load, dest.clone(), addr, loc);
        dest
    } else {
        addr
    }
}

fn lower_index(lw: &mut Lowering, obj: &Expr, index: &Expr, loc: SrcLoc) -> Value {
    let base = lower_expr(lw, obj);
    let idx = lower_expr(lw, index);
    if lw.is_err(&base) || lw.is_err(&idx) {
        return lw.err_value();
    }
    let Some(method) = calls::find_method(lw, base.tp, "operator[]", &[idx.tp]) else {
        let tn = lw.ctx.type_name(base.tp).to_string();
        lw.error(
            MessageCode::CInvalidOperands,
            loc,
            format!("type '{tn}' is not indexable"),
        );
        return lw.err_value();
    };
    let result = calls::emit_call(lw, calls::Callee::Func(method), Some(base), &[idx], loc);
    // a reference result dereferences to the element
    if calls::returns_pointer(lw, method) && lw.is_primitive(result.tp) {
        let dest = lw.reg(result.tp);
        lw.emit2(Opcode::Load, dest.clone(), result, loc);
        dest
    } else {
        result
    }
}

fn lower_binary(
    lw: &mut Lowering,
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    loc: SrcLoc,
) -> Value {
    if op.is_logical() {
        return lower_short_circuit(lw, op, lhs, rhs, loc);
    }

    let a = lower_expr(lw, lhs);
    let b = lower_expr(lw, rhs);
    if lw.is_err(&a) || lw.is_err(&b) {
        return lw.err_value();
    }

    let (ra, rb) = (
        lw.ctx.types.resolve_alias(a.tp),
        lw.ctx.types.resolve_alias(b.tp),
    );
    let numeric = |lw: &Lowering, t: TypeId| {
        lw.ctx.types.get(t).map(|t| t.is_numeric()).unwrap_or(false)
    };

    if numeric(lw, ra) && numeric(lw, rb) {
        let common = promote(lw, ra, rb);
        let a = convert(lw, a, common, loc);
        let b = convert(lw, b, common, loc);
        let class = lw
            .ctx
            .types
            .get(common)
            .map(|t| t.num_class())
            .unwrap_or(NumClass::Sint);
        let Some(opcode) = select_binary_opcode(op, class) else {
            lw.error(
                MessageCode::CInvalidOperands,
                loc,
                format!("operator not defined for '{}'", lw.ctx.type_name(common)),
            );
            return lw.err_value();
        };
        let result_tp = if op.is_compare() {
            lw.ctx.types.primitive(Primitive::Bool)
        } else {
            common
        };
        // constant subexpressions fold during lowering
        if let (Some(ai), Some(bi)) = (a.imm(), b.imm()) {
            let bool_t = lw.ctx.types.primitive(Primitive::Bool);
            if let Some(v) = tsn_optimizer::fold::fold_binary(opcode, ai, bi, a.tp, bool_t) {
                return v;
            }
        }
        let dest = lw.reg(result_tp);
        lw.emit3(opcode, dest.clone(), a, b, loc);
        return dest;
    }

    // user type with a matching operator method
    if let Some(method) = calls::find_method(lw, a.tp, op.method_name(), &[b.tp]) {
        return calls::emit_call(lw, calls::Callee::Func(method), Some(a), &[b], loc);
    }

    let (ta, tb) = (
        lw.ctx.type_name(a.tp).to_string(),
        lw.ctx.type_name(b.tp).to_string(),
    );
    lw.error(
        MessageCode::CInvalidOperands,
        loc,
        format!("no operator '{}' for '{ta}' and '{tb}'", op.method_name()),
    );
    lw.err_value()
}

/// `&&`/`||` lower to explicit control flow so the right-hand side only
/// evaluates when needed; the result merges through one register at the
/// join point.
fn lower_short_circuit(
    lw: &mut Lowering,
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    loc: SrcLoc,
) -> Value {
    let bool_t = lw.ctx.types.primitive(Primitive::Bool);
    let result = lw.reg(bool_t);
    let rhs_label = lw.label();
    let join = lw.label();

    let a = lower_expr(lw, lhs);
    let a = to_bool(lw, a, loc);
    lw.emit2(Opcode::Assign, result.clone(), a.clone(), loc);

    {
        let rv = lw.label_value(rhs_label);
        let jv = lw.label_value(join);
        let mut meta = lw.instr(Opcode::MetaIfBranch, loc);
        meta.operands[0] = rv;
        meta.operands[1] = jv.clone();
        meta.operands[2] = jv;
        lw.add(meta);
    }

    match op {
        BinaryOp::LogicAnd => {
            // only evaluate the rhs when the lhs was true
            lw.branch(a, rhs_label, loc);
            lw.jump(join, loc);
        }
        BinaryOp::LogicOr => {
            // skip the rhs when the lhs was already true
            let not_a = lw.reg(bool_t);
            lw.emit2(Opcode::Not, not_a.clone(), a, loc);
            lw.branch(not_a, rhs_label, loc);
            lw.jump(join, loc);
        }
        _ => unreachable!(),
    }

    lw.place_label(rhs_label, loc);
    let b = lower_expr(lw, rhs);
    let b = to_bool(lw, b, loc);
    lw.emit2(Opcode::Assign, result.clone(), b, loc);
    lw.place_label(join, loc);
    result
}

fn lower_unary(lw: &mut Lowering, op: UnaryOp, expr: &Expr, loc: SrcLoc) -> Value {
    match op {
        UnaryOp::Neg => {
            let v = lower_expr(lw, expr);
            if lw.is_err(&v) {
                return v;
            }
            let class = lw
                .ctx
                .types
                .get(lw.ctx.types.resolve_alias(v.tp))
                .filter(|t| t.is_numeric())
                .map(|t| t.num_class());
            let Some(class) = class else {
                lw.error(MessageCode::CInvalidOperands, loc, "cannot negate this value");
                return lw.err_value();
            };
            let (opcode, tp) = match class {
                NumClass::F32 => (Opcode::FNeg, v.tp),
                NumClass::F64 => (Opcode::DNeg, v.tp),
                _ => (Opcode::INeg, v.tp),
            };
            if let Some(imm) = v.imm() {
                let bool_t = lw.ctx.types.primitive(Primitive::Bool);
                if let Some(folded) = tsn_optimizer::fold::fold_unary(opcode, imm, tp, bool_t) {
                    return folded;
                }
            }
            let dest = lw.reg(tp);
            lw.emit2(opcode, dest.clone(), v, loc);
            dest
        }
        UnaryOp::Not => {
            let v = lower_expr(lw, expr);
            let v = to_bool(lw, v, loc);
            if lw.is_err(&v) {
                return v;
            }
            let bool_t = lw.ctx.types.primitive(Primitive::Bool);
            let dest = lw.reg(bool_t);
            lw.emit2(Opcode::Not, dest.clone(), v, loc);
            dest
        }
        UnaryOp::BitNot => {
            let v = lower_expr(lw, expr);
            if lw.is_err(&v) {
                return v;
            }
            let dest = lw.reg(v.tp);
            lw.emit2(Opcode::Inv, dest.clone(), v, loc);
            dest
        }
        UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
            lower_incdec(lw, op, expr, loc)
        }
    }
}

fn lower_incdec(lw: &mut Lowering, op: UnaryOp, expr: &Expr, loc: SrcLoc) -> Value {
    let Some(place) = lower_lvalue(lw, expr) else {
        return lw.err_value();
    };
    let current = read_place(lw, &place, loc);
    if lw.is_err(&current) {
        return current;
    }
    let class = lw
        .ctx
        .types
        .get(lw.ctx.types.resolve_alias(current.tp))
        .map(|t| t.num_class())
        .unwrap_or(NumClass::Sint);
    let (add, sub, one) = match class {
        NumClass::Sint => (Opcode::IAdd, Opcode::ISub, Value::imm_i(1, current.tp)),
        NumClass::Uint => (Opcode::UAdd, Opcode::USub, Value::imm_u(1, current.tp)),
        NumClass::F32 => (Opcode::FAdd, Opcode::FSub, Value::imm_f(1.0, current.tp)),
        NumClass::F64 => (Opcode::DAdd, Opcode::DSub, Value::imm_d(1.0, current.tp)),
    };
    let opcode = match op {
        UnaryOp::PreInc | UnaryOp::PostInc => add,
        _ => sub,
    };
    // the postfix result must survive the write-back, so snapshot it
    let old = match op {
        UnaryOp::PostInc | UnaryOp::PostDec => {
            let snapshot = lw.reg(current.tp);
            lw.emit2(Opcode::Assign, snapshot.clone(), current.clone(), loc);
            Some(snapshot)
        }
        _ => None,
    };
    let updated = lw.reg(current.tp);
    lw.emit3(opcode, updated.clone(), current.clone(), one, loc);
    write_place(lw, &place, updated.clone(), loc);
    match old {
        Some(snapshot) => snapshot,
        None => updated,
    }
}

fn lower_assign(
    lw: &mut Lowering,
    target: &Expr,
    value: &Expr,
    op: Option<BinaryOp>,
    loc: SrcLoc,
) -> Value {
    let Some(place) = lower_lvalue(lw, target) else {
        return lw.err_value();
    };
    let rhs = match op {
        None => lower_expr(lw, value),
        Some(op) => {
            // compound assignment reads the target once, applies, writes
            let current = read_place(lw, &place, loc);
            let b = lower_expr(lw, value);
            if lw.is_err(&current) || lw.is_err(&b) {
                return lw.err_value();
            }
            apply_binary_values(lw, op, current, b, loc)
        }
    };
    if lw.is_err(&rhs) {
        return rhs;
    }
    write_place(lw, &place, rhs.clone(), loc)
}

fn apply_binary_values(
    lw: &mut Lowering,
    op: BinaryOp,
    a: Value,
    b: Value,
    loc: SrcLoc,
) -> Value {
    let common = promote(lw, a.tp, b.tp);
    let a = convert(lw, a, common, loc);
    let b = convert(lw, b, common, loc);
    let class = lw
        .ctx
        .types
        .get(common)
        .map(|t| t.num_class())
        .unwrap_or(NumClass::Sint);
    let Some(opcode) = select_binary_opcode(op, class) else {
        lw.error(MessageCode::CInvalidOperands, loc, "invalid compound assignment");
        return lw.err_value();
    };
    let tp = if op.is_compare() {
        lw.ctx.types.primitive(Primitive::Bool)
    } else {
        common
    };
    let dest = lw.reg(tp);
    lw.emit3(opcode, dest.clone(), a, b, loc);
    dest
}

/// Resolve an expression as an assignment target.
pub fn lower_lvalue(lw: &mut Lowering, e: &Expr) -> Option<Place> {
    match e {
        Expr::Ident { name, loc } => match lw.symtab.get(name).cloned() {
            Some(Symbol::Var(v)) => Some(Place::Var(v)),
            Some(Symbol::Capture { .. }) => {
                lw.error(
                    MessageCode::CInvalidOperands,
                    *loc,
                    format!("captured variable '{name}' is read-only"),
                );
                None
            }
            _ => {
                if let Some((this, prop)) = this_prop(lw, name) {
                    let writable =
                        prop.setter.is_some() || (prop.flags.can_write && prop.getter.is_none());
                    if !writable {
                        lw.error(
                            MessageCode::CPropertyNotWritable,
                            *loc,
                            format!("property '{name}' has no setter"),
                        );
                        return None;
                    }
                    return Some(Place::Prop {
                        this,
                        prop_tp: prop.tp,
                        offset: prop.offset,
                        setter: prop.setter,
                        getter: prop.getter,
                        writable: prop.flags.can_write,
                    });
                }
                lw.error(
                    MessageCode::CUndefinedIdentifier,
                    *loc,
                    format!("undefined identifier '{name}'"),
                );
                None
            }
        },
        Expr::Member { obj, name, loc } => {
            let base = lower_expr(lw, obj);
            if lw.is_err(&base) {
                return None;
            }
            let tp = lw.ctx.types.resolve_alias(base.tp);
            let prop = lw.ctx.types.get(tp).and_then(|t| t.prop(name)).cloned();
            let Some(prop) = prop else {
                let tn = lw.ctx.type_name(base.tp).to_string();
                lw.error(
                    MessageCode::CNoSuchProperty,
                    *loc,
                    format!("type '{tn}' has no property '{name}'"),
                );
                return None;
            };
            let writable = prop.setter.is_some() || (prop.flags.can_write && prop.getter.is_none());
            if !writable {
                lw.error(
                    MessageCode::CPropertyNotWritable,
                    *loc,
                    format!("property '{name}' has no setter"),
                );
                return None;
            }
            Some(Place::Prop {
                this: base,
                prop_tp: prop.tp,
                offset: prop.offset,
                setter: prop.setter,
                getter: prop.getter,
                writable: prop.flags.can_write,
            })
        }
        Expr::Index { obj, index, loc } => {
            let base = lower_expr(lw, obj);
            let idx = lower_expr(lw, index);
            if lw.is_err(&base) || lw.is_err(&idx) {
                return None;
            }
            let method = calls::find_method(lw, base.tp, "operator[]", &[idx.tp]);
            let Some(method) = method else {
                lw.error(
                    MessageCode::CInvalidIndexAssignment,
                    *loc,
                    "assignment target is not indexable",
                );
                return None;
            };
            if !calls::returns_pointer(lw, method) {
                // an index result that is not a reference cannot be written
                lw.error(
                    MessageCode::CInvalidIndexAssignment,
                    *loc,
                    "index expression does not yield a reference",
                );
                return None;
            }
            let ptr = calls::emit_call(lw, calls::Callee::Func(method), Some(base), &[idx], *loc);
            let tp = ptr.tp;
            Some(Place::Deref { ptr, tp })
        }
        other => {
            lw.error(
                MessageCode::CInvalidOperands,
                other.loc(),
                "expression is not assignable",
            );
            None
        }
    }
}

pub fn read_place(lw: &mut Lowering, place: &Place, loc: SrcLoc) -> Value {
    match place {
        Place::Var(v) => v.clone(),
        Place::Prop {
            this,
            prop_tp,
            offset,
            getter,
            ..
        } => {
            if let Some(g) = getter {
                return calls::emit_call(lw, calls::Callee::Func(*g), Some(this.clone()), &[], loc);
            }
            let addr = prop_addr(lw, this.clone(), *offset, *prop_tp, loc);
            if lw.is_primitive(*prop_tp) {
                let dest = lw.reg(*prop_tp);
                lw.emit2(Opcode::Load, dest.clone(), addr, loc);
                dest
            } else {
                addr
            }
        }
        Place::Deref { ptr, tp } => {
            let dest = lw.reg(*tp);
            lw.emit2(Opcode::Load, dest.clone(), ptr.clone(), loc);
            dest
        }
    }
}

pub fn write_place(lw: &mut Lowering, place: &Place, value: Value, loc: SrcLoc) -> Value {
    match place {
        Place::Var(v) => {
            let converted = convert(lw, value, v.tp, loc);
            if lw.is_err(&converted) {
                return converted;
            }
            if v.is_reg() || lw.is_primitive(v.tp) {
                lw.emit2(Opcode::Assign, v.clone(), converted.clone(), loc);
            } else {
                copy_aggregate(lw, converted.clone(), v.clone(), loc);
            }
            converted
        }
        Place::Prop {
            this,
            prop_tp,
            offset,
            setter,
            ..
        } => {
            let converted = convert(lw, value, *prop_tp, loc);
            if lw.is_err(&converted) {
                return converted;
            }
            if let Some(s) = setter {
                calls::emit_call(
                    lw,
                    calls::Callee::Func(*s),
                    Some(this.clone()),
                    &[converted.clone()],
                    loc,
                );
            } else {
                let addr = prop_addr(lw, this.clone(), *offset, *prop_tp, loc);
                lw.emit2(Opcode::Store, converted.clone(), addr, loc);
            }
            converted
        }
        Place::Deref { ptr, tp } => {
            let converted = convert(lw, value, *tp, loc);
            if lw.is_err(&converted) {
                return converted;
            }
            lw.emit2(Opcode::Store, converted.clone(), ptr.clone(), loc);
            converted
        }
    }
}

/// Word-wise copy between two aggregate addresses of the same type.
pub fn copy_aggregate(lw: &mut Lowering, src: Value, dst: Value, loc: SrcLoc) {
    let u64t = lw.ctx.types.primitive(Primitive::U64);
    let size = lw.type_size(dst.tp);
    let mut off = 0;
    while off < size {
        let tmp = lw.reg(u64t);
        let mut load = lw.instr(Opcode::Load, loc);
        load.operands[0] = tmp.clone();
        load.operands[1] = src.clone().with_type(u64t);
        load.operands[2] = Value::imm_u(off as u64, u64t);
        lw.add(load);
        let mut store = lw.instr(Opcode::Store, loc);
        store.operands[0] = tmp;
        store.operands[1] = dst.clone().with_type(u64t);
        store.operands[2] = Value::imm_u(off as u64, u64t);
        lw.add(store);
        off += 8;
    }
}

fn lower_conditional(
    lw: &mut Lowering,
    cond: &Expr,
    then: &Expr,
    els: &Expr,
    loc: SrcLoc,
) -> Value {
    let bool_t = lw.ctx.types.primitive(Primitive::Bool);
    let c = lower_expr(lw, cond);
    let c = to_bool(lw, c, loc);
    if lw.is_err(&c) {
        return c;
    }

    let else_label = lw.label();
    let join = lw.label();
    {
        let ev = lw.label_value(else_label);
        let jv = lw.label_value(join);
        let mut meta = lw.instr(Opcode::MetaIfBranch, loc);
        meta.operands[0] = ev.clone();
        meta.operands[1] = ev;
        meta.operands[2] = jv;
        lw.add(meta);
    }
    let not_c = lw.reg(bool_t);
    lw.emit2(Opcode::Not, not_c.clone(), c, loc);
    lw.branch(not_c, else_label, loc);

    let then_v = lower_expr(lw, then);
    let result = lw.reg(then_v.tp);
    lw.emit2(Opcode::Assign, result.clone(), then_v.clone(), loc);
    lw.jump(join, loc);

    lw.place_label(else_label, loc);
    let else_v = lower_expr(lw, els);
    let else_v = convert(lw, else_v, then_v.tp, loc);
    lw.emit2(Opcode::Assign, result.clone(), else_v, loc);
    lw.place_label(join, loc);
    result
}

fn lower_new(
    lw: &mut Lowering,
    ty: &crate::ast::TypeRef,
    args: &[Expr],
    loc: SrcLoc,
) -> Value {
    let Some(tp) = lw.type_from_ref(ty, loc) else {
        return lw.err_value();
    };
    let arg_values: Vec<Value> = args.iter().map(|a| lower_expr(lw, a)).collect();
    if arg_values.iter().any(|v| lw.is_err(v)) {
        return lw.err_value();
    }
    let obj = lw.stack_alloc(tp, loc);
    let obj = lw.raise_stack_flag(obj);

    let arg_types: Vec<TypeId> = arg_values.iter().map(|v| v.tp).collect();
    match calls::find_ctor(lw, tp, &arg_types) {
        Some(ctor) => {
            calls::emit_call(lw, calls::Callee::Func(ctor), Some(obj.clone()), &arg_values, loc);
        }
        None if args.is_empty() => {
            // trivially constructible or zero-initialized
        }
        None => {
            let tn = lw.ctx.type_name(tp).to_string();
            lw.error(
                MessageCode::CNoSuchFunction,
                loc,
                format!("no matching constructor for '{tn}'"),
            );
        }
    }
    obj
}

/// Opcode for a numeric binary operation in the given class.
pub fn select_binary_opcode(op: BinaryOp, class: NumClass) -> Option<Opcode> {
    use NumClass::*;
    use Opcode::*;
    Some(match (op, class) {
        (BinaryOp::Add, Sint) => IAdd,
        (BinaryOp::Add, Uint) => UAdd,
        (BinaryOp::Add, F32) => FAdd,
        (BinaryOp::Add, F64) => DAdd,
        (BinaryOp::Sub, Sint) => ISub,
        (BinaryOp::Sub, Uint) => USub,
        (BinaryOp::Sub, F32) => FSub,
        (BinaryOp::Sub, F64) => DSub,
        (BinaryOp::Mul, Sint) => IMul,
        (BinaryOp::Mul, Uint) => UMul,
        (BinaryOp::Mul, F32) => FMul,
        (BinaryOp::Mul, F64) => DMul,
        (BinaryOp::Div, Sint) => IDiv,
        (BinaryOp::Div, Uint) => UDiv,
        (BinaryOp::Div, F32) => FDiv,
        (BinaryOp::Div, F64) => DDiv,
        (BinaryOp::Mod, Sint) => IMod,
        (BinaryOp::Mod, Uint) => UMod,
        (BinaryOp::Mod, F32) => FMod,
        (BinaryOp::Mod, F64) => DMod,
        (BinaryOp::Shl, Sint | Uint) => Shl,
        (BinaryOp::Shr, Sint | Uint) => Shr,
        (BinaryOp::BitAnd, Sint | Uint) => Band,
        (BinaryOp::BitOr, Sint | Uint) => Bor,
        (BinaryOp::BitXor, Sint | Uint) => Xor,
        (BinaryOp::Lt, Sint) => ILt,
        (BinaryOp::Lt, Uint) => ULt,
        (BinaryOp::Lt, F32) => FLt,
        (BinaryOp::Lt, F64) => DLt,
        (BinaryOp::Lte, Sint) => ILte,
        (BinaryOp::Lte, Uint) => ULte,
        (BinaryOp::Lte, F32) => FLte,
        (BinaryOp::Lte, F64) => DLte,
        (BinaryOp::Gt, Sint) => IGt,
        (BinaryOp::Gt, Uint) => UGt,
        (BinaryOp::Gt, F32) => FGt,
        (BinaryOp::Gt, F64) => DGt,
        (BinaryOp::Gte, Sint) => IGte,
        (BinaryOp::Gte, Uint) => UGte,
        (BinaryOp::Gte, F32) => FGte,
        (BinaryOp::Gte, F64) => DGte,
        (BinaryOp::Eq, Sint) => IEq,
        (BinaryOp::Eq, Uint) => UEq,
        (BinaryOp::Eq, F32) => FEq,
        (BinaryOp::Eq, F64) => DEq,
        (BinaryOp::Neq, Sint) => INeq,
        (BinaryOp::Neq, Uint) => UNeq,
        (BinaryOp::Neq, F32) => FNeq,
        (BinaryOp::Neq, F64) => DNeq,
        _ => return None,
    })
}
