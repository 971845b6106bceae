//! Host function registration.
//!
//! The always-present core library (`print`, `alloc`, `free`, `$makefunc`)
//! gets registry entries here; binding manifests declare additional host
//! functions in TOML, mapping script-visible names onto descriptor symbols
//! the VM bridge resolves at call time.

use serde::Deserialize;
use tsn_core::{
    Access, Context, FfiKind, FfiParam, FuncAccess, FuncId, Function, SigArg, Signature, TypeId,
};

fn add_host_fn(
    ctx: &mut Context,
    name: &str,
    symbol: &str,
    params: &[TypeId],
    ret: TypeId,
) -> FuncId {
    let args = params
        .iter()
        .map(|&tp| {
            let primitive = ctx
                .types
                .get(tp)
                .map(|t| t.flags.is_primitive || t.flags.is_host)
                .unwrap_or(true);
            if primitive {
                SigArg::value(tp)
            } else {
                SigArg::pointer(tp)
            }
        })
        .collect();
    let sig_type = ctx.types.signature_type(Signature {
        return_type: ret,
        returns_on_stack: false,
        returns_pointer: false,
        args,
    });
    ctx.funcs.add(Function {
        id: 0,
        name: name.into(),
        display_name: name.into(),
        fqn: format!("$host::{name}"),
        access: Access::Trusted,
        sig_type,
        method_of: None,
        is_static: false,
        is_thiscall: false,
        access_kind: FuncAccess::Host {
            symbol: symbol.into(),
        },
    })
}

/// Install the core host library and return the (name, id) pairs the
/// pipeline binds into every module's scope.
pub fn install_core_host_functions(ctx: &mut Context) -> Vec<(String, FuncId)> {
    let void = ctx.types.void();
    let data = ctx.types.data();
    let string = ctx.types.string();
    let u32t = ctx.types.primitive(tsn_core::Primitive::U32);
    let u64t = ctx.types.primitive(tsn_core::Primitive::U64);

    let entries = [
        ("print", add_host_fn(ctx, "print", "print", &[string], void)),
        ("alloc", add_host_fn(ctx, "alloc", "alloc", &[u32t], data)),
        ("free", add_host_fn(ctx, "free", "free", &[data], void)),
        (
            "$makefunc",
            add_host_fn(ctx, "$makefunc", "$makefunc", &[u32t, data, u64t], data),
        ),
    ];
    entries.map(|(n, f)| (n.to_string(), f)).to_vec()
}

/// One function entry of a binding manifest.
#[derive(Debug, Deserialize)]
pub struct ManifestFn {
    /// Script-visible name.
    pub name: String,
    /// Descriptor symbol the VM resolves. Alphanumerics, underscores, `$`,
    /// and periods only.
    pub symbol: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub returns: Option<String>,
}

/// A TOML host-binding manifest:
///
/// ```toml
/// [[function]]
/// name = "sqrt"
/// symbol = "host_sqrt"
/// params = ["f64"]
/// returns = "f64"
/// ```
#[derive(Debug, Deserialize)]
pub struct HostManifest {
    #[serde(default, rename = "function")]
    pub functions: Vec<ManifestFn>,
}

fn validate_symbol(symbol: &str) -> Result<(), String> {
    if symbol.is_empty() {
        return Err("symbol name cannot be empty".into());
    }
    for c in symbol.chars() {
        if !c.is_alphanumeric() && c != '_' && c != '.' && c != '$' {
            return Err(format!("invalid character '{c}' in symbol '{symbol}'"));
        }
    }
    Ok(())
}

fn resolve_type(ctx: &Context, name: &str) -> Result<TypeId, String> {
    if name == "void" {
        return Ok(ctx.types.void());
    }
    ctx.types
        .lookup(name)
        .ok_or_else(|| format!("unknown type '{name}' in binding manifest"))
}

/// Parse a manifest and install its functions. Returns the (name, id) pairs
/// to expose to scripts.
pub fn load_manifest(ctx: &mut Context, text: &str) -> Result<Vec<(String, FuncId)>, String> {
    let manifest: HostManifest =
        toml::from_str(text).map_err(|e| format!("malformed binding manifest: {e}"))?;
    let mut out = Vec::with_capacity(manifest.functions.len());
    for f in &manifest.functions {
        validate_symbol(&f.symbol)?;
        let mut params = Vec::with_capacity(f.params.len());
        for p in &f.params {
            params.push(resolve_type(ctx, p)?);
        }
        let ret = match &f.returns {
            Some(r) => resolve_type(ctx, r)?,
            None => ctx.types.void(),
        };
        let fid = add_host_fn(ctx, &f.name, &f.symbol, &params, ret);
        out.push((f.name.clone(), fid));
    }
    Ok(out)
}

/// The descriptor kind a manifest type maps to, for hosts registering shims.
pub fn ffi_param_for(ctx: &Context, tp: TypeId) -> FfiParam {
    let t = ctx.types.get(tp);
    let kind = match t {
        Some(t) if t.flags.is_floating_point && t.size == 4 => FfiKind::F32,
        Some(t) if t.flags.is_floating_point => FfiKind::F64,
        Some(t) if t.flags.is_integral && t.flags.is_unsigned => FfiKind::Uint,
        Some(t) if t.flags.is_integral => FfiKind::Sint,
        _ => FfiKind::Ptr,
    };
    FfiParam {
        kind,
        is_ptr: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_library_installs() {
        let mut ctx = Context::new();
        let fns = install_core_host_functions(&mut ctx);
        assert_eq!(fns.len(), 4);
        let print = ctx.funcs.get(fns[0].1).unwrap();
        assert!(print.is_host());
        assert_eq!(print.fqn, "$host::print");
    }

    #[test]
    fn test_manifest_parses_and_installs() {
        let mut ctx = Context::new();
        let text = r#"
            [[function]]
            name = "sqrt"
            symbol = "host_sqrt"
            params = ["f64"]
            returns = "f64"

            [[function]]
            name = "log_line"
            symbol = "host_log"
            params = ["string"]
        "#;
        let fns = load_manifest(&mut ctx, text).unwrap();
        assert_eq!(fns.len(), 2);
        let sqrt = ctx.funcs.get(fns[0].1).unwrap();
        match &sqrt.access_kind {
            FuncAccess::Host { symbol } => assert_eq!(symbol, "host_sqrt"),
            _ => panic!("expected host function"),
        }
    }

    #[test]
    fn test_manifest_rejects_bad_symbols() {
        let mut ctx = Context::new();
        let text = r#"
            [[function]]
            name = "evil"
            symbol = "do bad things"
        "#;
        assert!(load_manifest(&mut ctx, text).is_err());
    }

    #[test]
    fn test_manifest_rejects_unknown_types() {
        let mut ctx = Context::new();
        let text = r#"
            [[function]]
            name = "f"
            symbol = "f"
            params = ["quaternion"]
        "#;
        assert!(load_manifest(&mut ctx, text).is_err());
    }
}
