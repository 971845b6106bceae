//! Lambda lifting and capture records.
//!
//! A lambda becomes a standalone function whose first implicit argument is
//! the capture record pointer. The record lives on the heap, laid out as
//! `[u32 count][u64 moduletype_id × count][value bytes]`; primitive captures
//! copy by value, aggregates construct in place. `$makefunc` wraps the
//! function id and the record into a `function_pointer`, which the creation
//! site stores into the stack-allocated `raw_callback`.

use super::decls::open_fn;
use super::expr::{copy_aggregate, prop_addr, store_at};
use super::{calls, stmt, Lowering};
use crate::ast::{Expr, Param, SrcLoc, Stmt, TypeRef};
use crate::symtab::Symbol;
use std::collections::HashSet;
use tsn_core::ffi::{capture_typeid_offset, capture_values_offset};
use tsn_core::{
    join_moduletype, Access, FuncAccess, Function, ImplicitArg, MessageCode, Opcode, Primitive,
    SigArg, Signature, TypeId, Value,
};

/// One captured variable at the creation site.
struct CaptureSpec {
    name: String,
    source: Value,
    tp: TypeId,
    offset: u32,
}

pub fn lower_lambda(
    lw: &mut Lowering,
    params: &[Param],
    ret: Option<&TypeRef>,
    body: &[Stmt],
    loc: SrcLoc,
) -> Value {
    // free variables: names the body reads that it does not declare and the
    // enclosing function binds
    let free = free_variables(params, body);
    let mut captures: Vec<CaptureSpec> = Vec::new();
    let mut offset = 0u32;
    for name in &free {
        let symbol = lw.symtab.get(name).cloned();
        let (source, tp) = match symbol {
            Some(Symbol::Var(v)) => {
                let tp = v.tp;
                (v, tp)
            }
            Some(Symbol::Capture { tp, offset, .. }) => {
                // capturing an outer capture: materialize it here first
                let v = load_capture(lw, tp, offset, loc);
                (v, tp)
            }
            _ => continue,
        };
        let size = lw.type_size(tp).max(1);
        offset = offset.next_multiple_of(size.min(8));
        captures.push(CaptureSpec {
            name: name.clone(),
            source,
            tp,
            offset,
        });
        offset += size;
    }
    let values_size = offset;

    // the lambda's signature: capture record pointer first, then parameters
    let data_t = lw.ctx.types.data();
    let ret_tp = match ret {
        Some(r) => match lw.type_from_ref(r, loc) {
            Some(t) => t,
            None => return lw.err_value(),
        },
        None => lw.ctx.types.void(),
    };
    let mut sig_args = vec![SigArg::implicit(data_t, ImplicitArg::CaptureDataPtr)];
    let mut param_types = Vec::new();
    for p in params {
        let Some(tp) = lw.type_from_ref(&p.ty, loc) else {
            return lw.err_value();
        };
        param_types.push(tp);
        sig_args.push(SigArg::value(tp));
    }
    let sig_type = lw.ctx.types.signature_type(Signature {
        return_type: ret_tp,
        returns_on_stack: false,
        returns_pointer: false,
        args: sig_args,
    });

    let name = lw.next_lambda_name();
    let module_name = lw
        .ctx
        .modules
        .get(lw.module)
        .map(|m| m.name.clone())
        .unwrap_or_default();
    let fid = lw.ctx.funcs.add(Function {
        id: 0,
        name: name.clone(),
        display_name: name.clone(),
        fqn: format!("{module_name}::{name}"),
        access: Access::Private,
        sig_type,
        method_of: None,
        is_static: false,
        is_thiscall: false,
        access_kind: FuncAccess::Script { entry: None },
    });
    if let Some(m) = lw.ctx.modules.get_mut(lw.module) {
        m.funcs.push(fid);
    }

    // compile the lambda body as its own function
    open_fn(lw, fid, ret_tp, false, None, Some(0), true);
    stmt::open_block(lw);
    for (i, (p, tp)) in params.iter().zip(&param_types).enumerate() {
        lw.symtab
            .set(&p.name, Symbol::Var(Value::arg((i + 1) as u8, *tp)));
    }
    let value_base = capture_values_offset(captures.len() as u64) as u32;
    for c in &captures {
        lw.symtab.set(
            &c.name,
            Symbol::Capture {
                source: c.source.clone(),
                tp: c.tp,
                // absolute offset within the record
                offset: value_base + c.offset,
            },
        );
    }
    stmt::lower_stmts(lw, body);
    stmt::close_block(lw, loc);
    lw.finish_fn(loc);

    // creation site: build the callable value
    let out = lw.stack_alloc(sig_type, loc);
    let out = lw.raise_stack_flag(out);
    let u64t = lw.ctx.types.primitive(Primitive::U64);
    let u32t = lw.ctx.types.primitive(Primitive::U32);

    let (ctx_ptr, data_size) = if captures.is_empty() {
        (Value::imm_u(0, data_t), 0u64)
    } else {
        let count = captures.len() as u64;
        let data_size = capture_values_offset(count) + values_size as u64;

        let Some(alloc_fn) = builtin_func(lw, "alloc") else {
            lw.error(MessageCode::GInternal, loc, "runtime helper 'alloc' is missing");
            return lw.err_value();
        };
        let ctx_ptr = calls::emit_call(
            lw,
            calls::Callee::Func(alloc_fn),
            None,
            &[Value::imm_u(data_size, u32t)],
            loc,
        );

        store_at(lw, Value::imm_u(count, u32t), ctx_ptr.clone(), 0, loc);
        for (i, c) in captures.iter().enumerate() {
            let mtid = join_moduletype(lw.module, c.tp);
            store_at(
                lw,
                Value::imm_u(mtid, u64t),
                ctx_ptr.clone(),
                capture_typeid_offset(i as u64) as u32,
                loc,
            );
        }
        let base = capture_values_offset(count) as u32;
        for c in &captures {
            if lw.is_primitive(c.tp) {
                store_at(lw, c.source.clone(), ctx_ptr.clone(), base + c.offset, loc);
            } else {
                let dst = prop_addr(lw, ctx_ptr.clone(), base + c.offset, c.tp, loc);
                // in-place construction, falling back to a raw copy for
                // types without a copy constructor
                if let Some(copy_ctor) = calls::find_ctor(lw, c.tp, &[c.tp]) {
                    calls::emit_call(
                        lw,
                        calls::Callee::Func(copy_ctor),
                        Some(dst),
                        &[c.source.clone()],
                        loc,
                    );
                } else {
                    copy_aggregate(lw, c.source.clone(), dst, loc);
                }
            }
        }
        (ctx_ptr, data_size)
    };

    let Some(makefunc) = builtin_func(lw, "$makefunc") else {
        lw.error(MessageCode::GInternal, loc, "runtime helper '$makefunc' is missing");
        return lw.err_value();
    };
    let fp = calls::emit_call(
        lw,
        calls::Callee::Func(makefunc),
        None,
        &[
            Value::imm_u(fid as u64, u32t),
            ctx_ptr,
            Value::imm_u(data_size, u64t),
        ],
        loc,
    );
    lw.emit2(Opcode::Store, fp, out.clone().with_type(u64t), loc);

    out
}

/// Read a captured value inside a lambda body: `uadd ctx, offset`, then a
/// load for primitives; aggregates use the address directly.
pub fn load_capture(lw: &mut Lowering, tp: TypeId, offset: u32, loc: SrcLoc) -> Value {
    let addr = load_capture_addr(lw, tp, offset, loc);
    if lw.is_primitive(tp) {
        let dest = lw.reg(tp);
        lw.emit2(Opcode::Load, dest.clone(), addr, loc);
        dest
    } else {
        addr
    }
}

/// Address of a captured value inside the record. Capture symbols carry
/// their absolute offset (past the count and moduletype-id table).
pub fn load_capture_addr(lw: &mut Lowering, tp: TypeId, offset: u32, loc: SrcLoc) -> Value {
    let u64t = lw.ctx.types.primitive(Primitive::U64);
    let ectx_idx = lw.cur_ref().ectx_arg.unwrap_or(0);
    let ectx = Value::arg(ectx_idx, u64t);
    let dest = lw.reg(u64t);
    lw.emit3(
        Opcode::UAdd,
        dest.clone(),
        ectx,
        Value::imm_u(offset as u64, u64t),
        loc,
    );
    dest.with_type(tp)
}

fn builtin_func(lw: &Lowering, name: &str) -> Option<tsn_core::FuncId> {
    match lw.symtab.get(name) {
        Some(Symbol::Funcs(set)) => set.first().copied(),
        _ => None,
    }
}

/// Names the lambda body reads that neither its parameters nor its own
/// declarations bind, in first-use order.
fn free_variables(params: &[Param], body: &[Stmt]) -> Vec<String> {
    let mut bound: HashSet<String> = params.iter().map(|p| p.name.clone()).collect();
    let mut used: Vec<String> = Vec::new();
    scan_stmts(body, &mut bound, &mut used);
    used
}

fn note(name: &str, bound: &HashSet<String>, used: &mut Vec<String>) {
    if !bound.contains(name) && !used.iter().any(|u| u == name) {
        used.push(name.to_string());
    }
}

fn scan_stmts(stmts: &[Stmt], bound: &mut HashSet<String>, used: &mut Vec<String>) {
    for s in stmts {
        match s {
            Stmt::Expr { expr } => scan_expr(expr, bound, used),
            Stmt::Let { name, init, .. } => {
                if let Some(e) = init {
                    scan_expr(e, bound, used);
                }
                bound.insert(name.clone());
            }
            Stmt::Return { value, .. } => {
                if let Some(e) = value {
                    scan_expr(e, bound, used);
                }
            }
            Stmt::If { cond, then, els, .. } => {
                scan_expr(cond, bound, used);
                scan_stmts(then, &mut bound.clone(), used);
                if let Some(els) = els {
                    scan_stmts(els, &mut bound.clone(), used);
                }
            }
            Stmt::While { cond, body, .. } => {
                scan_expr(cond, bound, used);
                scan_stmts(body, &mut bound.clone(), used);
            }
            Stmt::DoWhile { body, cond, .. } => {
                scan_stmts(body, &mut bound.clone(), used);
                scan_expr(cond, bound, used);
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                let mut inner = bound.clone();
                if let Some(init) = init {
                    scan_stmts(std::slice::from_ref(init), &mut inner, used);
                }
                if let Some(cond) = cond {
                    scan_expr_with(cond, &inner, used);
                }
                if let Some(step) = step {
                    scan_expr_with(step, &inner, used);
                }
                scan_stmts(body, &mut inner, used);
            }
            Stmt::Break { .. } | Stmt::Continue { .. } => {}
            Stmt::Block { body } => scan_stmts(body, &mut bound.clone(), used),
        }
    }
}

fn scan_expr_with(e: &Expr, bound: &HashSet<String>, used: &mut Vec<String>) {
    let mut b = bound.clone();
    scan_expr(e, &mut b, used);
}

fn scan_expr(e: &Expr, bound: &mut HashSet<String>, used: &mut Vec<String>) {
    match e {
        Expr::Ident { name, .. } => note(name, bound, used),
        Expr::Member { obj, .. } => scan_expr(obj, bound, used),
        Expr::Index { obj, index, .. } => {
            scan_expr(obj, bound, used);
            scan_expr(index, bound, used);
        }
        Expr::Call { callee, args, .. } => {
            scan_expr(callee, bound, used);
            for a in args {
                scan_expr(a, bound, used);
            }
        }
        Expr::Binary { lhs, rhs, .. } => {
            scan_expr(lhs, bound, used);
            scan_expr(rhs, bound, used);
        }
        Expr::Unary { expr, .. } => scan_expr(expr, bound, used),
        Expr::Assign { target, value, .. } => {
            scan_expr(target, bound, used);
            scan_expr(value, bound, used);
        }
        Expr::Conditional { cond, then, els, .. } => {
            scan_expr(cond, bound, used);
            scan_expr(then, bound, used);
            scan_expr(els, bound, used);
        }
        Expr::Lambda { params, body, .. } => {
            // an inner lambda's free names are free here too unless we bind
            // them
            let mut inner: HashSet<String> = bound.clone();
            inner.extend(params.iter().map(|p| p.name.clone()));
            scan_stmts(body, &mut inner, used);
        }
        Expr::New { args, .. } => {
            for a in args {
                scan_expr(a, bound, used);
            }
        }
        Expr::ObjectLit { fields, .. } => {
            for (_, v) in fields {
                scan_expr(v, bound, used);
            }
        }
        Expr::Cast { expr, .. } => scan_expr(expr, bound, used),
        Expr::IntLit { .. }
        | Expr::UintLit { .. }
        | Expr::FloatLit { .. }
        | Expr::BoolLit { .. }
        | Expr::StrLit { .. } => {}
    }
}
