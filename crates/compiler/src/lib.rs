//! TSN Compiler Library
//!
//! Lowers frontend ASTs to three-address IR, drives the optimizer and the
//! VM backend through the module pipeline, and exposes the driver's
//! configuration, host-binding, and dump surfaces.
//!
//! The typical embedding:
//!
//! ```rust,ignore
//! use tsnc_lib::{MemoryLoader, Pipeline};
//!
//! let mut loader = MemoryLoader::new();
//! loader.insert(module_ast);
//! let mut pipeline = Pipeline::new(Box::new(loader));
//! let module = pipeline.compile("app")?;
//! let exit = tsnc_lib::run_main(&pipeline, module, &Default::default())?;
//! ```

pub mod ast;
pub mod config;
pub mod dump;
pub mod host;
pub mod lower;
pub mod pipeline;
pub mod symtab;

pub use ast::{
    BinaryOp, ClassDecl, CtorDecl, Decl, Expr, FunctionDecl, ModuleAst, Param, PropDecl, SrcLoc,
    Stmt, TypeRef, UnaryOp,
};
pub use config::{CompilerConfig, VmSizes};
pub use host::{install_core_host_functions, load_manifest, HostManifest};
pub use pipeline::{FsLoader, MemoryLoader, ModuleLoader, Pipeline, PipelineError};
pub use symtab::{FuncLookup, Symbol, SymbolTable};

use tsn_core::ModuleId;
use tsn_vm::{Vm, VmConfig, VmError};

/// Execute a compiled module's `main` under a fresh VM, returning its raw
/// result word. The VM (with any captured `print` output) is discarded; use
/// [`run_main_with_vm`] to keep it.
pub fn run_main(pipeline: &Pipeline, module: ModuleId, config: &VmConfig) -> Result<u64, VmError> {
    run_main_with_vm(pipeline, module, config).map(|(v, _)| v)
}

pub fn run_main_with_vm(
    pipeline: &Pipeline,
    module: ModuleId,
    config: &VmConfig,
) -> Result<(u64, Vm), VmError> {
    let entry = pipeline
        .entry_function(module)
        .ok_or(VmError::InvalidFunctionId { id: 0 })?;
    let mut vm = Vm::new(config.clone());
    vm.install_modules(&pipeline.ctx);
    let result = vm.call(&pipeline.ctx, &pipeline.backend.program, entry, &[])?;
    Ok((result, vm))
}
