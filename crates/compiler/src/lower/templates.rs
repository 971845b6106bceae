//! Template declaration and instantiation.
//!
//! A template declaration parks its AST in a side table and registers a
//! placeholder entry. Referencing it with explicit arguments builds the
//! instantiated fully-qualified name, returns the existing type if the
//! registry already holds it, and otherwise compiles a fresh copy of the
//! declaration with the parameters bound; the `subtype` placeholder
//! resolves to the first argument throughout.

use super::{decls, Lowering};
use crate::ast::{ClassDecl, FunctionDecl, SrcLoc, TypeRef};
use crate::symtab::Symbol;
use tsn_core::{
    Access, FuncAccess, FuncId, Function, MessageCode, TemplateInfo, Type, TypeId,
};

pub fn declare_template_class(lw: &mut Lowering, params: &[String], decl: &ClassDecl) {
    let key = lw.next_ast_key();
    lw.template_classes
        .insert(key, (params.to_vec(), decl.clone()));

    let module_name = lw
        .ctx
        .modules
        .get(lw.module)
        .map(|m| m.name.clone())
        .unwrap_or_default();
    let mut t = Type::structure(decl.name.clone(), format!("{module_name}::{}", decl.name));
    t.flags.is_template = true;
    t.template = Some(TemplateInfo {
        params: params.to_vec(),
        ast_key: key,
    });
    let tid = lw.ctx.types.intern(t);
    if let Some(m) = lw.ctx.modules.get_mut(lw.module) {
        m.types.push(tid);
    }
    lw.symtab.set(&decl.name, Symbol::Type(tid));
}

pub fn declare_template_function(lw: &mut Lowering, params: &[String], decl: &FunctionDecl) {
    let key = lw.next_ast_key();
    lw.template_funcs
        .insert(key, (params.to_vec(), decl.clone()));

    let module_name = lw
        .ctx
        .modules
        .get(lw.module)
        .map(|m| m.name.clone())
        .unwrap_or_default();
    // never directly callable; instantiation produces the real entries
    let void_sig = lw.ctx.types.signature_type(tsn_core::Signature {
        return_type: lw.ctx.types.void(),
        returns_on_stack: false,
        returns_pointer: false,
        args: vec![],
    });
    let fid = lw.ctx.funcs.add(Function {
        id: 0,
        name: decl.name.clone(),
        display_name: format!("{}<>", decl.name),
        fqn: format!("{module_name}::{}<>", decl.name),
        access: Access::Public,
        sig_type: void_sig,
        method_of: None,
        is_static: false,
        is_thiscall: false,
        access_kind: FuncAccess::Template { ast_key: key },
    });
    lw.symtab.set(&decl.name, Symbol::Funcs(vec![fid]));
}

/// Resolve `Name<Args>` to a concrete type, instantiating on first use.
pub fn instantiate_class(
    lw: &mut Lowering,
    name: &str,
    args: &[TypeRef],
    loc: SrcLoc,
) -> Option<TypeId> {
    let base = match lw.symtab.get(name) {
        Some(Symbol::Type(tid)) => *tid,
        _ => {
            lw.error(
                MessageCode::CNoSuchType,
                loc,
                format!("no such template type '{name}'"),
            );
            return None;
        }
    };
    let template = lw.ctx.types.get(base).and_then(|t| t.template.clone());
    let Some(template) = template else {
        lw.error(
            MessageCode::CTemplateArgumentMismatch,
            loc,
            format!("type '{name}' is not a template"),
        );
        return None;
    };
    if template.params.len() != args.len() {
        lw.error(
            MessageCode::CTemplateArgumentMismatch,
            loc,
            format!(
                "'{name}' expects {} template arguments, got {}",
                template.params.len(),
                args.len()
            ),
        );
        return None;
    }

    let mut arg_ids = Vec::with_capacity(args.len());
    for a in args {
        arg_ids.push(lw.type_from_ref(a, loc)?);
    }

    let inst_name = instantiated_name(lw, name, &arg_ids);
    let module_name = lw
        .ctx
        .modules
        .get(lw.module)
        .map(|m| m.name.clone())
        .unwrap_or_default();
    if let Some(existing) = lw.ctx.types.lookup(&format!("{module_name}::{inst_name}")) {
        return Some(existing);
    }

    let (params, decl) = lw.template_classes.get(&template.ast_key)?.clone();

    // bind the parameters; `subtype` resolves to the first argument
    lw.symtab.push();
    for (p, &a) in params.iter().zip(&arg_ids) {
        lw.symtab.set(p, Symbol::Type(a));
    }
    let saved = lw.subtype_binding;
    lw.subtype_binding = arg_ids.first().copied();

    let result = decls::compile_class(lw, &decl, Some(inst_name));

    lw.subtype_binding = saved;
    lw.symtab.pop();
    result
}

/// Instantiate a template function for explicit arguments.
pub fn instantiate_function(
    lw: &mut Lowering,
    name: &str,
    args: &[TypeRef],
    loc: SrcLoc,
) -> Option<FuncId> {
    let template_fid = match lw.symtab.get(name) {
        Some(Symbol::Funcs(set)) => set
            .iter()
            .copied()
            .find(|&fid| lw.ctx.funcs.get(fid).map(|f| f.is_template()).unwrap_or(false)),
        _ => None,
    };
    let Some(template_fid) = template_fid else {
        lw.error(
            MessageCode::CNoSuchFunction,
            loc,
            format!("no template function '{name}'"),
        );
        return None;
    };
    let FuncAccess::Template { ast_key } = lw.ctx.funcs.get(template_fid)?.access_kind else {
        return None;
    };
    let (params, decl) = lw.template_funcs.get(&ast_key)?.clone();
    if params.len() != args.len() {
        lw.error(
            MessageCode::CTemplateArgumentMismatch,
            loc,
            format!(
                "'{name}' expects {} template arguments, got {}",
                params.len(),
                args.len()
            ),
        );
        return None;
    }

    let mut arg_ids = Vec::with_capacity(args.len());
    for a in args {
        arg_ids.push(lw.type_from_ref(a, loc)?);
    }
    let inst_name = instantiated_name(lw, name, &arg_ids);

    // reuse a previous instantiation
    let module_name = lw
        .ctx
        .modules
        .get(lw.module)
        .map(|m| m.name.clone())
        .unwrap_or_default();
    if let Some(existing) = lw.ctx.funcs.lookup(&format!("{module_name}::{inst_name}")) {
        return Some(existing);
    }

    lw.symtab.push();
    for (p, &a) in params.iter().zip(&arg_ids) {
        lw.symtab.set(p, Symbol::Type(a));
    }
    let saved = lw.subtype_binding;
    lw.subtype_binding = arg_ids.first().copied();

    let mut inst_decl = decl;
    inst_decl.name = inst_name;
    let result = decls::compile_function(lw, &inst_decl, None);

    lw.subtype_binding = saved;
    lw.symtab.pop();
    result
}

fn instantiated_name(lw: &Lowering, name: &str, args: &[TypeId]) -> String {
    let parts: Vec<String> = args
        .iter()
        .map(|&a| lw.ctx.type_name(a).to_string())
        .collect();
    format!("{name}<{}>", parts.join(","))
}
