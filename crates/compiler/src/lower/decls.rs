//! Top-level declarations: functions, classes, globals, aliases.
//!
//! Declarations compile in source order; an error in one declaration is
//! logged and compilation continues with its siblings.

use super::convert::convert;
use super::expr::{lower_expr, store_at};
use super::{calls, stmt, templates, Lowering};
use crate::ast::{ClassDecl, Decl, FunctionDecl, ModuleAst, SrcLoc};
use crate::symtab::Symbol;
use tsn_core::{
    Access, FuncAccess, FuncId, Function, ImplicitArg, MessageCode, Opcode, PropFlags, SigArg,
    Signature, Type, TypeId, TypeProp, Value,
};

pub fn lower_module(lw: &mut Lowering, ast: &ModuleAst) {
    for decl in &ast.decls {
        match decl {
            Decl::Function(f) => {
                compile_function(lw, f, None);
            }
            Decl::Class(c) => {
                compile_class(lw, c, None);
            }
            Decl::TemplateClass { params, decl } => {
                templates::declare_template_class(lw, params, decl);
            }
            Decl::TemplateFunction { params, decl } => {
                templates::declare_template_function(lw, params, decl);
            }
            Decl::Alias { name, target, loc } => {
                if let Some(tp) = lw.type_from_ref(target, *loc) {
                    let module_name = lw
                        .ctx
                        .modules
                        .get(lw.module)
                        .map(|m| m.name.clone())
                        .unwrap_or_default();
                    let id = lw
                        .ctx
                        .types
                        .alias(name, &format!("{module_name}::{name}"), tp);
                    if let Some(m) = lw.ctx.modules.get_mut(lw.module) {
                        m.types.push(id);
                    }
                    lw.symtab.set(name, Symbol::Type(id));
                }
            }
            Decl::Global { name, ty, init, loc } => {
                compile_global(lw, name, ty, init.as_ref(), *loc);
            }
        }
    }
}

fn compile_global(
    lw: &mut Lowering,
    name: &str,
    ty: &crate::ast::TypeRef,
    init: Option<&crate::ast::Expr>,
    loc: SrcLoc,
) {
    let Some(tp) = lw.type_from_ref(ty, loc) else {
        return;
    };
    let size = lw.type_size(tp).max(1);
    let module_id = lw.module;
    let Some(offset) = lw
        .ctx
        .modules
        .get_mut(module_id)
        .map(|m| m.add_global(name, tp, size))
    else {
        return;
    };

    // globals initialize from constants baked into the data segment
    if let Some(init) = init {
        let v = lower_const_expr(lw, init);
        match v {
            Some(imm) => {
                let bytes = imm.bits().to_le_bytes();
                if let Some(m) = lw.ctx.modules.get_mut(module_id) {
                    let start = offset as usize;
                    let end = (start + size as usize).min(m.data.len());
                    m.data[start..end].copy_from_slice(&bytes[..end - start]);
                }
            }
            None => {
                lw.error(
                    MessageCode::CInvalidOperands,
                    loc,
                    format!("global '{name}' requires a constant initializer"),
                );
            }
        }
    }
}

/// Evaluate a literal initializer without emitting code.
fn lower_const_expr(lw: &mut Lowering, e: &crate::ast::Expr) -> Option<tsn_core::Imm> {
    use crate::ast::Expr;
    match e {
        Expr::IntLit { value, .. } => Some(tsn_core::Imm::I(*value)),
        Expr::UintLit { value, .. } => Some(tsn_core::Imm::U(*value)),
        Expr::FloatLit { value, is_f32, .. } => Some(if *is_f32 {
            tsn_core::Imm::F(*value as f32)
        } else {
            tsn_core::Imm::D(*value)
        }),
        Expr::BoolLit { value, .. } => Some(tsn_core::Imm::U(*value as u64)),
        _ => {
            let _ = lw;
            None
        }
    }
}

/// Begin compiling a function body: push its state and leave the caller to
/// bind parameters.
pub fn open_fn(
    lw: &mut Lowering,
    func: FuncId,
    ret_type: TypeId,
    returns_on_stack: bool,
    ret_arg: Option<u8>,
    ectx_arg: Option<u8>,
    is_lambda: bool,
) {
    lw.fns.push(super::FnState {
        func,
        ch: tsn_core::CodeHolder::new(func),
        blocks: Vec::new(),
        loops: Vec::new(),
        ret_type,
        returns_on_stack,
        ret_arg,
        ectx_arg,
        is_lambda,
    });
}

/// Build a signature from resolved parameter/return types, inserting the
/// implicit arguments a method or aggregate return requires.
fn build_signature(
    lw: &mut Lowering,
    owner: Option<TypeId>,
    param_types: &[TypeId],
    ret: TypeId,
) -> (Signature, Option<u8>) {
    let data_t = lw.ctx.types.data();
    let mut args = Vec::new();
    if let Some(owner) = owner {
        args.push(SigArg {
            tp: owner,
            is_ptr: true,
            implicit: ImplicitArg::ThisPtr,
        });
    }
    let returns_on_stack = lw.type_size(ret) > 0 && !lw.is_primitive(ret);
    let mut ret_arg = None;
    if returns_on_stack {
        ret_arg = Some(args.len() as u8);
        args.push(SigArg {
            tp: data_t,
            is_ptr: true,
            implicit: ImplicitArg::RetPtr,
        });
    }
    for &tp in param_types {
        if lw.is_primitive(tp) {
            args.push(SigArg::value(tp));
        } else {
            args.push(SigArg::pointer(tp));
        }
    }
    (
        Signature {
            return_type: ret,
            returns_on_stack,
            returns_pointer: false,
            args,
        },
        ret_arg,
    )
}

/// Create the registry entry for a function without compiling its body.
fn declare_function(
    lw: &mut Lowering,
    decl: &FunctionDecl,
    owner: Option<(TypeId, String)>,
) -> Option<(FuncId, Vec<TypeId>, Option<u8>)> {
    let mut param_types = Vec::new();
    for p in &decl.params {
        param_types.push(lw.type_from_ref(&p.ty, decl.loc)?);
    }
    let ret = match &decl.ret {
        Some(r) => lw.type_from_ref(r, decl.loc)?,
        None => lw.ctx.types.void(),
    };

    let this_type = owner.as_ref().filter(|_| !decl.is_static).map(|(t, _)| *t);
    let (sig, ret_arg) = build_signature(lw, this_type, &param_types, ret);
    let sig_type = lw.ctx.types.signature_type(sig);

    let module_name = lw
        .ctx
        .modules
        .get(lw.module)
        .map(|m| m.name.clone())
        .unwrap_or_default();
    let (display, fqn) = match &owner {
        Some((_, type_name)) => (
            format!("{type_name}::{}", decl.name),
            format!("{module_name}::{type_name}::{}", decl.name),
        ),
        None => (
            decl.name.clone(),
            format!("{module_name}::{}", decl.name),
        ),
    };

    let fid = lw.ctx.funcs.add(Function {
        id: 0,
        name: decl.name.clone(),
        display_name: display,
        fqn,
        access: Access::Public,
        sig_type,
        method_of: owner.as_ref().map(|(t, _)| *t),
        is_static: decl.is_static,
        is_thiscall: owner.is_some() && !decl.is_static,
        access_kind: FuncAccess::Script { entry: None },
    });
    if let Some(m) = lw.ctx.modules.get_mut(lw.module) {
        m.funcs.push(fid);
    }
    Some((fid, param_types, ret_arg))
}

/// Bind parameters to their argument slots and compile the body.
fn compile_body(
    lw: &mut Lowering,
    fid: FuncId,
    decl: &FunctionDecl,
    owner: Option<TypeId>,
    param_types: &[TypeId],
    ret_arg: Option<u8>,
    prologue: impl FnOnce(&mut Lowering),
) {
    let (ret, returns_on_stack) = {
        let sig = lw
            .ctx
            .funcs
            .get(fid)
            .and_then(|f| lw.ctx.types.get(f.sig_type))
            .and_then(|t| t.sig.as_ref());
        match sig {
            Some(s) => (s.return_type, s.returns_on_stack),
            None => (lw.ctx.types.void(), false),
        }
    };

    open_fn(lw, fid, ret, returns_on_stack, ret_arg, None, false);
    stmt::open_block(lw);

    let mut arg_idx = 0u8;
    if let Some(owner) = owner.filter(|_| !decl.is_static) {
        lw.symtab.set("this", Symbol::Var(Value::arg(arg_idx, owner)));
        arg_idx += 1;
    }
    if ret_arg.is_some() {
        arg_idx += 1;
    }
    for (p, &tp) in decl.params.iter().zip(param_types) {
        lw.symtab.set(&p.name, Symbol::Var(Value::arg(arg_idx, tp)));
        arg_idx += 1;
    }

    prologue(lw);
    stmt::lower_stmts(lw, &decl.body);
    stmt::close_block(lw, decl.loc);
    lw.finish_fn(decl.loc);
}

pub fn compile_function(
    lw: &mut Lowering,
    decl: &FunctionDecl,
    owner: Option<(TypeId, String)>,
) -> Option<FuncId> {
    let (fid, param_types, ret_arg) = declare_function(lw, decl, owner.clone())?;
    if owner.is_none() {
        lw.symtab.set(&decl.name, Symbol::Funcs(vec![fid]));
    }
    let owner_tp = owner.filter(|_| !decl.is_static).map(|(t, _)| t);
    compile_body(lw, fid, decl, owner_tp, &param_types, ret_arg, |_| {});
    Some(fid)
}

/// Compile a class declaration. `rename` overrides the type name for
/// template instantiation (`Pair<f32>`).
pub fn compile_class(
    lw: &mut Lowering,
    decl: &ClassDecl,
    rename: Option<String>,
) -> Option<TypeId> {
    let name = rename.unwrap_or_else(|| decl.name.clone());
    let module_name = lw
        .ctx
        .modules
        .get(lw.module)
        .map(|m| m.name.clone())
        .unwrap_or_default();
    let fqn = format!("{module_name}::{name}");
    if let Some(existing) = lw.ctx.types.lookup(&fqn) {
        return Some(existing);
    }

    // layout
    let mut props = Vec::new();
    let mut offset = 0u32;
    let mut all_trivial = true;
    for p in &decl.props {
        let tp = lw.type_from_ref(&p.ty, p.loc)?;
        let size = lw.type_size(tp).max(1);
        offset = offset.next_multiple_of(size.min(8));
        if lw.needs_dtor(tp).is_some() {
            all_trivial = false;
        }
        props.push(TypeProp {
            name: p.name.clone(),
            tp,
            offset,
            access: Access::Public,
            getter: None,
            setter: None,
            flags: PropFlags {
                is_static: false,
                is_pointer: false,
                can_read: true,
                can_write: true,
            },
        });
        offset += size;
    }

    let mut t = Type::structure(name.clone(), fqn);
    t.size = offset.next_multiple_of(8).max(8);
    t.props = props;
    t.flags.is_trivially_destructible = decl.dtor.is_none() && all_trivial;
    t.flags.is_trivially_constructible = decl.ctor.is_none();
    t.flags.is_trivially_copyable = true;
    let tid = lw.ctx.types.intern(t);
    if let Some(m) = lw.ctx.modules.get_mut(lw.module) {
        m.types.push(tid);
    }
    lw.symtab.set(&name, Symbol::Type(tid));

    // declare every member first so bodies can call across the class
    let mut method_fids = Vec::new();
    let ctor_decl = decl.ctor.as_ref().map(|c| FunctionDecl {
        name: "constructor".into(),
        params: c.params.clone(),
        ret: None,
        is_static: false,
        body: c.body.clone(),
        loc: c.loc,
    });
    let ctor_fid = match &ctor_decl {
        Some(f) => {
            let r = declare_function(lw, f, Some((tid, name.clone())))?;
            method_fids.push(r.0);
            Some(r)
        }
        None => None,
    };

    let needs_dtor = decl.dtor.is_some()
        || decl
            .props
            .iter()
            .any(|p| {
                lw.type_from_ref(&p.ty, p.loc)
                    .map(|t| lw.needs_dtor(t).is_some())
                    .unwrap_or(false)
            });
    let dtor_decl = needs_dtor.then(|| FunctionDecl {
        name: "destructor".into(),
        params: vec![],
        ret: None,
        is_static: false,
        body: decl.dtor.clone().unwrap_or_default(),
        loc: decl.loc,
    });
    let dtor_fid = match &dtor_decl {
        Some(f) => {
            let r = declare_function(lw, f, Some((tid, name.clone())))?;
            method_fids.push(r.0);
            Some(r)
        }
        None => None,
    };

    let mut declared_methods = Vec::new();
    for m in &decl.methods {
        if let Some(r) = declare_function(lw, m, Some((tid, name.clone()))) {
            method_fids.push(r.0);
            declared_methods.push((m, r));
        }
    }

    if let Some(t) = lw.ctx.types.get_mut(tid) {
        t.methods = method_fids;
        t.dtor = dtor_fid.as_ref().map(|(fid, _, _)| *fid);
    }

    // constructor: every property must be covered
    if let (Some(ctor_ast), Some((fid, param_types, ret_arg))) = (&decl.ctor, ctor_fid) {
        validate_ctor_coverage(lw, tid, ctor_ast, decl.loc);
        let inits = ctor_ast.inits.clone();
        let f = ctor_decl.as_ref().unwrap();
        compile_body(lw, fid, f, Some(tid), &param_types, ret_arg, |lw| {
            emit_property_inits(lw, tid, &inits, f.loc);
        });
    }

    // destructor: user body, then reverse-order property destruction
    if let (Some(f), Some((fid, param_types, ret_arg))) = (&dtor_decl, dtor_fid) {
        let body_decl = f.clone();
        compile_body(lw, fid, &body_decl, Some(tid), &param_types, ret_arg, |_| {});
        // property destructor calls are appended inside the compiled body by
        // rewriting: simpler to emit them as part of the body itself
        emit_property_dtors_into_last(lw, tid, body_decl.loc);
    }

    for (m, (fid, param_types, ret_arg)) in declared_methods {
        let owner_tp = (!m.is_static).then_some(tid);
        compile_body(lw, fid, m, owner_tp, &param_types, ret_arg, |_| {});
    }

    Some(tid)
}

/// Every property must be primitive, explicitly initialized, or
/// default-constructible.
fn validate_ctor_coverage(
    lw: &mut Lowering,
    tid: TypeId,
    ctor: &crate::ast::CtorDecl,
    loc: SrcLoc,
) {
    let props: Vec<(String, TypeId)> = lw
        .ctx
        .types
        .get(tid)
        .map(|t| t.props.iter().map(|p| (p.name.clone(), p.tp)).collect())
        .unwrap_or_default();
    for (name, tp) in props {
        if lw.is_primitive(tp) {
            continue;
        }
        if ctor.inits.iter().any(|(n, _)| *n == name) {
            continue;
        }
        if calls::find_ctor(lw, tp, &[]).is_some()
            || lw
                .ctx
                .types
                .get(lw.ctx.types.resolve_alias(tp))
                .map(|t| t.flags.is_trivially_constructible)
                .unwrap_or(false)
        {
            continue;
        }
        lw.error(
            MessageCode::CPropertyHasNoDefaultConstructor,
            loc,
            format!("property '{name}' has no default constructor"),
        );
    }
}

/// Property initializations, in declaration order.
fn emit_property_inits(
    lw: &mut Lowering,
    tid: TypeId,
    inits: &[(String, crate::ast::Expr)],
    loc: SrcLoc,
) {
    let props: Vec<(String, TypeId, u32)> = lw
        .ctx
        .types
        .get(tid)
        .map(|t| {
            t.props
                .iter()
                .map(|p| (p.name.clone(), p.tp, p.offset))
                .collect()
        })
        .unwrap_or_default();
    let this = Value::arg(0, tid);

    for (name, tp, offset) in props {
        let init = inits.iter().find(|(n, _)| *n == name);
        match init {
            Some((_, expr)) => {
                let v = lower_expr(lw, expr);
                if lw.is_err(&v) {
                    continue;
                }
                if lw.is_primitive(tp) {
                    let v = convert(lw, v, tp, loc);
                    store_at(lw, v, this.clone(), offset, loc);
                } else {
                    let dst = super::expr::prop_addr(lw, this.clone(), offset, tp, loc);
                    if let Some(ctor) = calls::find_ctor(lw, tp, &[v.tp]) {
                        calls::emit_call(lw, calls::Callee::Func(ctor), Some(dst), &[v], loc);
                    } else {
                        super::expr::copy_aggregate(lw, v, dst, loc);
                    }
                }
            }
            None => {
                if !lw.is_primitive(tp) {
                    if let Some(ctor) = calls::find_ctor(lw, tp, &[]) {
                        let dst = super::expr::prop_addr(lw, this.clone(), offset, tp, loc);
                        calls::emit_call(lw, calls::Callee::Func(ctor), Some(dst), &[], loc);
                    }
                }
            }
        }
    }
}

/// Append reverse-declaration-order property destructor calls to the most
/// recently finished function (the destructor), ahead of its final `ret`.
fn emit_property_dtors_into_last(lw: &mut Lowering, tid: TypeId, loc: SrcLoc) {
    let props: Vec<(TypeId, u32)> = lw
        .ctx
        .types
        .get(tid)
        .map(|t| t.props.iter().map(|p| (p.tp, p.offset)).collect())
        .unwrap_or_default();
    let dtor_calls: Vec<(FuncId, TypeId, u32)> = props
        .iter()
        .rev()
        .filter_map(|&(tp, off)| lw.needs_dtor(tp).map(|d| (d, tp, off)))
        .collect();
    if dtor_calls.is_empty() {
        return;
    }

    let mut ch = lw.out.pop().expect("destructor body was not produced");
    // drop the trailing ret; re-emitted after the property teardown
    let ret = ch
        .code
        .pop()
        .filter(|i| i.op == Opcode::Ret)
        .unwrap_or_else(|| tsn_core::Instruction::new(Opcode::Ret, Default::default()));

    lw.fns.push(super::FnState {
        func: ch.owner,
        ch,
        blocks: Vec::new(),
        loops: Vec::new(),
        ret_type: lw.ctx.types.void(),
        returns_on_stack: false,
        ret_arg: None,
        ectx_arg: None,
        is_lambda: false,
    });
    let this = Value::arg(0, tid);
    for (dtor, tp, off) in dtor_calls {
        let addr = super::expr::prop_addr(lw, this.clone(), off, tp, loc);
        calls::emit_call(lw, calls::Callee::Func(dtor), Some(addr), &[], loc);
    }
    lw.add(ret);
    let state = lw.fns.pop().unwrap();
    lw.out.push(state.ch);
}
