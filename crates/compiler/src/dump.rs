//! JSON dumps of the compiled artifacts (`tsnc -o ...`).

use crate::ast::ModuleAst;
use serde_json::{json, Value as Json};
use tsn_core::{CodeHolder, Context};

pub fn dump_ast(asts: &[ModuleAst]) -> Json {
    let modules: Vec<Json> = asts
        .iter()
        .map(|m| serde_json::to_value(m).unwrap_or(Json::Null))
        .collect();
    json!({ "ast": modules })
}

pub fn dump_types(ctx: &Context) -> Json {
    let types: Vec<Json> = ctx
        .types
        .iter()
        .map(|t| serde_json::to_value(t).unwrap_or(Json::Null))
        .collect();
    json!({ "types": types })
}

pub fn dump_funcs(ctx: &Context) -> Json {
    let funcs: Vec<Json> = ctx
        .funcs
        .iter()
        .map(|f| serde_json::to_value(f).unwrap_or(Json::Null))
        .collect();
    json!({ "functions": funcs })
}

/// Per-function IR listings, one rendered line per instruction.
pub fn dump_code(ctx: &Context, holders: &[CodeHolder]) -> Json {
    let funcs: Vec<Json> = holders
        .iter()
        .map(|ch| {
            let name = ctx
                .funcs
                .get(ch.owner)
                .map(|f| f.display_name.clone())
                .unwrap_or_else(|| format!("#{}", ch.owner));
            let code: Vec<String> = ch
                .code
                .iter()
                .enumerate()
                .map(|(i, instr)| format!("[{i}] {instr}"))
                .collect();
            json!({
                "function": name,
                "stack_size": ch.stack.frame_size(),
                "code": code,
            })
        })
        .collect();
    json!({ "ir": funcs })
}

pub fn dump_logs(ctx: &Context) -> Json {
    let entries: Vec<Json> = ctx
        .log
        .entries()
        .iter()
        .map(|e| {
            json!({
                "code": e.code.code(),
                "kind": e.kind,
                "line": e.range.line,
                "col": e.range.col,
                "message": e.message,
            })
        })
        .collect();
    json!({ "logs": entries })
}

pub fn dump_backend(program: &tsn_vm::Program) -> Json {
    let code: Vec<String> = program
        .code
        .iter()
        .enumerate()
        .map(|(i, instr)| format!("0x{i:03x} {instr}"))
        .collect();
    json!({ "backend": { "instructions": code } })
}

pub fn render(value: &Json, minified: bool) -> String {
    if minified {
        value.to_string()
    } else {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_types_dump_contains_primitives() {
        let ctx = Context::new();
        let d = dump_types(&ctx);
        let names: Vec<&str> = d["types"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert!(names.contains(&"i32"));
        assert!(names.contains(&"string"));
    }

    #[test]
    fn test_render_minified_is_single_line() {
        let v = json!({ "a": [1, 2, 3] });
        assert!(!render(&v, true).contains('\n'));
        assert!(render(&v, false).contains('\n'));
    }
}
