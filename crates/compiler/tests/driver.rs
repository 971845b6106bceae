//! Driver-level integration: JSON module interchange on disk, config
//! loading, dumps.

use std::fs;
use tsn_vm::VmConfig;
use tsnc_lib::{dump, CompilerConfig, FsLoader, Pipeline};

const APP_JSON: &str = r#"{
    "name": "app",
    "imports": ["mathlib"],
    "decls": [{
        "kind": "function",
        "name": "main",
        "ret": {"kind": "named", "name": "i32"},
        "body": [{
            "kind": "return",
            "value": {
                "kind": "call",
                "callee": {
                    "kind": "member",
                    "obj": {"kind": "ident", "name": "mathlib"},
                    "name": "triple"
                },
                "args": [{"kind": "int_lit", "value": 14}]
            }
        }]
    }]
}"#;

const MATHLIB_JSON: &str = r#"{
    "name": "mathlib",
    "decls": [{
        "kind": "function",
        "name": "triple",
        "params": [{"name": "v", "ty": {"kind": "named", "name": "i32"}}],
        "ret": {"kind": "named", "name": "i32"},
        "body": [{
            "kind": "return",
            "value": {
                "kind": "binary",
                "op": "mul",
                "lhs": {"kind": "ident", "name": "v"},
                "rhs": {"kind": "int_lit", "value": 3}
            }
        }]
    }]
}"#;

#[test]
fn test_compile_workspace_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("app.tsn.json"), APP_JSON).unwrap();
    fs::write(dir.path().join("mathlib.tsn.json"), MATHLIB_JSON).unwrap();

    let mut pipeline = Pipeline::new(Box::new(FsLoader {
        root: dir.path().to_path_buf(),
    }));
    let id = pipeline.compile("app").unwrap();
    assert!(!pipeline.ctx.log.has_errors());

    let result = tsnc_lib::run_main(&pipeline, id, &VmConfig::default()).unwrap();
    assert_eq!(result as i64, 42);
}

#[test]
fn test_missing_workspace_file_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new(Box::new(FsLoader {
        root: dir.path().to_path_buf(),
    }));
    assert!(pipeline.compile("nope").is_err());
    assert!(pipeline.ctx.log.has_errors());
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{
            "workspace_root": "scripts",
            "optimize": false,
            "max_group_iterations": 8,
            "vm": {"stack_size": 8192, "mem_size": 131072, "stack_padding": 8}
        }"#,
    )
    .unwrap();

    let config = CompilerConfig::from_file(&path).unwrap();
    assert_eq!(config.workspace_root, std::path::PathBuf::from("scripts"));
    assert!(!config.optimize);
    assert_eq!(config.max_group_iterations, 8);
    assert_eq!(config.vm.stack_size, 8192);
}

#[test]
fn test_dumps_render_compiled_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("app.tsn.json"), APP_JSON).unwrap();
    fs::write(dir.path().join("mathlib.tsn.json"), MATHLIB_JSON).unwrap();

    let mut pipeline = Pipeline::new(Box::new(FsLoader {
        root: dir.path().to_path_buf(),
    }));
    pipeline.compile("app").unwrap();

    let types = dump::dump_types(&pipeline.ctx);
    assert!(types["types"].as_array().unwrap().len() > 10);

    let funcs = dump::dump_funcs(&pipeline.ctx);
    let names: Vec<&str> = funcs["functions"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f["name"].as_str())
        .collect();
    assert!(names.contains(&"main"));
    assert!(names.contains(&"triple"));

    let code = dump::dump_code(&pipeline.ctx, &pipeline.holders);
    assert!(!code["ir"].as_array().unwrap().is_empty());

    let backend = dump::dump_backend(&pipeline.backend.program);
    assert!(!backend["backend"]["instructions"].as_array().unwrap().is_empty());
}

#[test]
fn test_unoptimized_pipeline_still_runs() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("app.tsn.json"), APP_JSON).unwrap();
    fs::write(dir.path().join("mathlib.tsn.json"), MATHLIB_JSON).unwrap();

    let mut pipeline = Pipeline::new(Box::new(FsLoader {
        root: dir.path().to_path_buf(),
    }));
    pipeline.optimize = false;
    let id = pipeline.compile("app").unwrap();
    let result = tsnc_lib::run_main(&pipeline, id, &VmConfig::default()).unwrap();
    assert_eq!(result as i64, 42);
}
