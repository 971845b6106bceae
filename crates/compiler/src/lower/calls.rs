//! Call resolution and emission.
//!
//! Resolution follows the callee's AST shape: module-qualified statics,
//! module functions, type statics, instance methods (with a static retry
//! that prepends the receiver), then bare names with a callable-variable
//! fallback. Emission pushes the implicit parameters first (`this_ptr`,
//! `moduletype_id`, `ret_ptr`, `capture_data_ptr`), then the converted
//! explicit arguments, then the `call`.

use super::convert::convert;
use super::expr::lower_expr;
use super::Lowering;
use crate::ast::{Expr, SrcLoc};
use crate::symtab::{resolve_overload, FuncLookup, Symbol};
use tsn_core::{
    CallTarget, FuncId, ImplicitArg, MessageCode, ModuleId, Opcode, Primitive, Signature, TypeId,
    Value,
};

/// What is being called.
#[derive(Debug, Clone)]
pub enum Callee {
    Func(FuncId),
    /// A callable value: the address of a `raw_callback`.
    Ptr(Value),
}

pub fn returns_pointer(lw: &Lowering, fid: FuncId) -> bool {
    signature_of(lw, fid)
        .map(|s| s.returns_pointer)
        .unwrap_or(false)
}

fn signature_of(lw: &Lowering, fid: FuncId) -> Option<Signature> {
    let f = lw.ctx.funcs.get(fid)?;
    lw.ctx.types.get(f.sig_type)?.sig.clone()
}

/// Resolve a named method on a type (operators included).
pub fn find_method(lw: &Lowering, tp: TypeId, name: &str, arg_types: &[TypeId]) -> Option<FuncId> {
    let resolved = lw.ctx.types.resolve_alias(tp);
    let methods = lw.ctx.types.get(resolved)?.methods.clone();
    let named: Vec<FuncId> = methods
        .into_iter()
        .filter(|&fid| {
            lw.ctx
                .funcs
                .get(fid)
                .map(|f| f.name == name && !f.is_static)
                .unwrap_or(false)
        })
        .collect();
    match resolve_overload(lw.ctx, &named, None, arg_types, true) {
        FuncLookup::Found(fid) => Some(fid),
        _ => None,
    }
}

fn find_static(lw: &Lowering, tp: TypeId, name: &str, arg_types: &[TypeId]) -> FuncLookup {
    let resolved = lw.ctx.types.resolve_alias(tp);
    let Some(t) = lw.ctx.types.get(resolved) else {
        return FuncLookup::NotFound;
    };
    let named: Vec<FuncId> = t
        .methods
        .iter()
        .copied()
        .filter(|&fid| {
            lw.ctx
                .funcs
                .get(fid)
                .map(|f| f.name == name && f.is_static)
                .unwrap_or(false)
        })
        .collect();
    resolve_overload(lw.ctx, &named, None, arg_types, true)
}

/// Resolve a constructor for `tp` accepting `arg_types`.
pub fn find_ctor(lw: &Lowering, tp: TypeId, arg_types: &[TypeId]) -> Option<FuncId> {
    find_method(lw, tp, "constructor", arg_types)
}

pub fn lower_call(lw: &mut Lowering, e: &Expr) -> Value {
    let Expr::Call {
        callee,
        args,
        type_args,
        loc,
    } = e
    else {
        return lw.err_value();
    };
    let loc = *loc;

    let arg_values: Vec<Value> = args.iter().map(|a| lower_expr(lw, a)).collect();
    if arg_values.iter().any(|v| lw.is_err(v)) {
        return lw.err_value();
    }
    let arg_types: Vec<TypeId> = arg_values.iter().map(|v| v.tp).collect();

    // explicit template arguments instantiate the template first
    if !type_args.is_empty() {
        if let Expr::Ident { name, .. } = callee.as_ref() {
            return match super::templates::instantiate_function(lw, name, type_args, loc) {
                Some(fid) => emit_call(lw, Callee::Func(fid), None, &arg_values, loc),
                None => lw.err_value(),
            };
        }
    }

    match callee.as_ref() {
        // [module].[type].[static]
        Expr::Member { obj, name, loc: mloc } => {
            if let Expr::Member {
                obj: inner,
                name: type_name,
                ..
            } = obj.as_ref()
            {
                if let Expr::Ident { name: mod_name, .. } = inner.as_ref() {
                    if let Some(Symbol::Module(mid)) = lw.symtab.get(mod_name).cloned() {
                        if let Some(tp) = module_type(lw, mid, type_name) {
                            return call_static(lw, tp, name, &arg_values, &arg_types, loc);
                        }
                    }
                }
            }

            if let Expr::Ident { name: base, .. } = obj.as_ref() {
                match lw.symtab.get(base).cloned() {
                    // [module].[function] or [module].[function pointer]
                    Some(Symbol::Module(mid)) => {
                        return call_module_function(lw, mid, name, &arg_values, &arg_types, loc);
                    }
                    // [type].[static]
                    Some(Symbol::Type(tp)) => {
                        return call_static(lw, tp, name, &arg_values, &arg_types, loc);
                    }
                    _ => {}
                }
            }

            // [expression].[method]
            let this = lower_expr(lw, obj);
            if lw.is_err(&this) {
                return this;
            }
            if let Some(method) = find_method(lw, this.tp, name, &arg_types) {
                return emit_call(lw, Callee::Func(method), Some(this), &arg_values, loc);
            }
            // retry as a static taking the receiver as its first formal
            let mut retry_types = vec![this.tp];
            retry_types.extend_from_slice(&arg_types);
            if let FuncLookup::Found(fid) = find_static(lw, this.tp, name, &retry_types) {
                let mut retry_args = vec![this];
                retry_args.extend_from_slice(&arg_values);
                return emit_call(lw, Callee::Func(fid), None, &retry_args, loc);
            }
            let tn = lw.ctx.type_name(this.tp).to_string();
            lw.error(
                MessageCode::CNoSuchFunction,
                *mloc,
                format!("type '{tn}' has no method '{name}' matching these arguments"),
            );
            lw.err_value()
        }

        // [function] or [function-pointer variable]
        Expr::Ident { name, loc: iloc } => {
            match lw.symtab.get_func(lw.ctx, name, None, &arg_types, true) {
                FuncLookup::Found(fid) => {
                    return emit_call(lw, Callee::Func(fid), None, &arg_values, loc)
                }
                FuncLookup::Ambiguous(set) => {
                    lw.error(
                        MessageCode::CAmbiguousCall,
                        *iloc,
                        format!("call to '{name}' is ambiguous between {} overloads", set.len()),
                    );
                    return lw.err_value();
                }
                FuncLookup::NotFound => {}
            }
            // fall back to a variable holding a callable
            match lw.symtab.get(name).cloned() {
                Some(Symbol::Var(v)) if is_callable(lw, v.tp) => {
                    call_indirect(lw, v, &arg_values, loc)
                }
                Some(Symbol::Capture { tp, offset, .. }) if is_callable(lw, tp) => {
                    let cb = super::closures::load_capture_addr(lw, tp, offset, loc);
                    call_indirect(lw, cb, &arg_values, loc)
                }
                _ => {
                    lw.error(
                        MessageCode::CNoSuchFunction,
                        *iloc,
                        format!("no function '{name}' matching these arguments"),
                    );
                    lw.err_value()
                }
            }
        }

        // anything else that evaluates to a callable value
        other => {
            let v = lower_expr(lw, other);
            if lw.is_err(&v) {
                return v;
            }
            if is_callable(lw, v.tp) {
                call_indirect(lw, v, &arg_values, loc)
            } else {
                lw.error(MessageCode::CNotCallable, loc, "expression is not callable");
                lw.err_value()
            }
        }
    }
}

fn is_callable(lw: &Lowering, tp: TypeId) -> bool {
    lw.ctx
        .types
        .get(lw.ctx.types.resolve_alias(tp))
        .map(|t| t.flags.is_function)
        .unwrap_or(false)
}

fn module_type(lw: &Lowering, mid: ModuleId, name: &str) -> Option<TypeId> {
    let m = lw.ctx.modules.get(mid)?;
    m.types
        .iter()
        .copied()
        .find(|&t| lw.ctx.types.get(t).map(|t| t.name == name).unwrap_or(false))
}

fn call_static(
    lw: &mut Lowering,
    tp: TypeId,
    name: &str,
    args: &[Value],
    arg_types: &[TypeId],
    loc: SrcLoc,
) -> Value {
    match find_static(lw, tp, name, arg_types) {
        FuncLookup::Found(fid) => emit_call(lw, Callee::Func(fid), None, args, loc),
        FuncLookup::Ambiguous(set) => {
            lw.error(
                MessageCode::CAmbiguousCall,
                loc,
                format!("call to '{name}' is ambiguous between {} overloads", set.len()),
            );
            lw.err_value()
        }
        FuncLookup::NotFound => {
            let tn = lw.ctx.type_name(tp).to_string();
            lw.error(
                MessageCode::CNoSuchFunction,
                loc,
                format!("type '{tn}' has no static method '{name}'"),
            );
            lw.err_value()
        }
    }
}

fn call_module_function(
    lw: &mut Lowering,
    mid: ModuleId,
    name: &str,
    args: &[Value],
    arg_types: &[TypeId],
    loc: SrcLoc,
) -> Value {
    let candidates: Vec<FuncId> = lw
        .ctx
        .modules
        .get(mid)
        .map(|m| {
            m.funcs
                .iter()
                .copied()
                .filter(|&fid| {
                    lw.ctx
                        .funcs
                        .get(fid)
                        .map(|f| f.name == name)
                        .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_default();

    match resolve_overload(lw.ctx, &candidates, None, arg_types, true) {
        FuncLookup::Found(fid) => emit_call(lw, Callee::Func(fid), None, args, loc),
        FuncLookup::Ambiguous(set) => {
            lw.error(
                MessageCode::CAmbiguousCall,
                loc,
                format!("call to '{name}' is ambiguous between {} overloads", set.len()),
            );
            lw.err_value()
        }
        FuncLookup::NotFound => {
            // a module global holding a callable
            let global = lw
                .ctx
                .modules
                .get(mid)
                .and_then(|m| m.globals.iter().find(|g| g.name == name))
                .cloned();
            if let Some(g) = global {
                if is_callable(lw, g.tp) {
                    let u64t = lw.ctx.types.primitive(Primitive::U64);
                    let addr = lw.reg(u64t);
                    lw.emit3(
                        Opcode::ModuleData,
                        addr.clone(),
                        Value::imm_u(mid as u64, 0),
                        Value::imm_u(g.offset as u64, 0),
                        loc,
                    );
                    return call_indirect(lw, addr.with_type(g.tp), args, loc);
                }
            }
            lw.error(
                MessageCode::CNoSuchFunction,
                loc,
                format!("module has no function '{name}'"),
            );
            lw.err_value()
        }
    }
}

fn call_indirect(lw: &mut Lowering, cb: Value, args: &[Value], loc: SrcLoc) -> Value {
    emit_call(lw, Callee::Ptr(cb), None, args, loc)
}

/// Emit the parameter sequence and the call itself.
pub fn emit_call(
    lw: &mut Lowering,
    callee: Callee,
    this: Option<Value>,
    args: &[Value],
    loc: SrcLoc,
) -> Value {
    emit_call_with_mtid(lw, callee, this, args, None, loc)
}

/// As [`emit_call`], with an explicit moduletype id for subtype-carrying
/// callees (host template methods).
pub fn emit_call_with_mtid(
    lw: &mut Lowering,
    callee: Callee,
    this: Option<Value>,
    args: &[Value],
    mtid: Option<u64>,
    loc: SrcLoc,
) -> Value {
    let sig = match &callee {
        Callee::Func(fid) => signature_of(lw, *fid),
        Callee::Ptr(v) => lw
            .ctx
            .types
            .get(lw.ctx.types.resolve_alias(v.tp))
            .and_then(|t| t.sig.clone()),
    };
    let Some(sig) = sig else {
        lw.error(MessageCode::CNotCallable, loc, "callee has no signature");
        return lw.err_value();
    };

    let target = match &callee {
        Callee::Func(fid) => CallTarget::Func(*fid),
        Callee::Ptr(v) => CallTarget::Ptr(v.clone()),
    };

    let u64t = lw.ctx.types.primitive(Primitive::U64);
    let mut ret_slot: Option<Value> = None;
    let mut params: Vec<Value> = Vec::with_capacity(sig.args.len());
    let mut explicit = args.iter();

    for arg in &sig.args {
        let value = match arg.implicit {
            ImplicitArg::ThisPtr => match &this {
                Some(v) => v.clone(),
                None => {
                    lw.error(MessageCode::CInvalidThis, loc, "method call without a receiver");
                    return lw.err_value();
                }
            },
            ImplicitArg::ModuletypeId => Value::imm_u(mtid.unwrap_or(0), u64t),
            ImplicitArg::RetPtr => {
                let slot = lw.stack_alloc(sig.return_type, loc);
                let slot = lw.raise_stack_flag(slot);
                ret_slot = Some(slot.clone());
                slot
            }
            ImplicitArg::CaptureDataPtr => match &callee {
                Callee::Ptr(cb) => extract_capture_ptr(lw, cb.clone(), loc),
                Callee::Func(_) => Value::imm_u(0, u64t),
            },
            ImplicitArg::None => {
                let Some(v) = explicit.next() else {
                    lw.error(
                        MessageCode::CNoSuchFunction,
                        loc,
                        "wrong number of arguments",
                    );
                    return lw.err_value();
                };
                convert(lw, v.clone(), arg.tp, loc)
            }
            _ => Value::imm_u(0, u64t),
        };
        if lw.is_err(&value) {
            return value;
        }
        params.push(value);
    }
    if explicit.next().is_some() {
        lw.error(MessageCode::CNoSuchFunction, loc, "wrong number of arguments");
        return lw.err_value();
    }

    for p in params {
        let mut instr = lw.instr(Opcode::Param, loc);
        instr.operands[0] = p;
        instr.callee = Some(target.clone());
        lw.add(instr);
    }

    let ret_size = lw.type_size(sig.return_type);
    let mut call = lw.instr(Opcode::Call, loc);
    call.callee = Some(target);

    if let Some(slot) = ret_slot {
        lw.add(call);
        return slot;
    }
    if ret_size == 0 {
        lw.add(call);
        return Value::imm_u(0, lw.ctx.types.void());
    }
    let dest = lw.reg(sig.return_type);
    call.operands[0] = dest.clone();
    lw.add(call);
    dest
}

/// Walk the raw-callback offset chain to the capture context pointer:
/// `fp = *(cb + 0)`, then `ctx = *(fp + 8)`.
fn extract_capture_ptr(lw: &mut Lowering, cb: Value, loc: SrcLoc) -> Value {
    let u64t = lw.ctx.types.primitive(Primitive::U64);

    let fp = lw.reg(u64t);
    let mut load_fp = lw.instr(Opcode::Load, loc);
    load_fp.operands[0] = fp.clone();
    load_fp.operands[1] = cb.with_type(u64t);
    load_fp.operands[2] = Value::imm_u(tsn_core::ffi::RAW_CALLBACK_PTR_OFFSET, u64t);
    lw.add(load_fp);

    let data_addr = lw.reg(u64t);
    lw.emit3(
        Opcode::UAdd,
        data_addr.clone(),
        fp,
        Value::imm_u(tsn_core::ffi::FUNCTION_POINTER_DATA_OFFSET, u64t),
        loc,
    );

    let data = lw.reg(u64t);
    lw.emit2(Opcode::Load, data.clone(), data_addr, loc);
    data
}
