//! The compile pipeline.
//!
//! Per module: `UNLOADED → PARSED → COMPILED → OPTIMIZED → LOWERED → READY`,
//! irreversible within one context run. Imports compile recursively before
//! the importing module; a visit set catches cycles. Semantic errors freeze
//! the module at its last successful state and compilation continues with
//! siblings; the driver inspects the log afterwards.

use crate::ast::ModuleAst;
use crate::host;
use crate::lower::{decls, Lowering};
use crate::symtab::Symbol;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tsn_core::{
    CodeHolder, Context, FuncId, LogKind, MessageCode, Module, ModuleId, ModuleState, SrcRef,
};
use tsn_optimizer::Optimizer;
use tsn_vm::VmBackend;

/// Source of module ASTs. The parser is an external collaborator; loaders
/// deliver its output.
pub trait ModuleLoader {
    fn load(&mut self, name: &str) -> Result<ModuleAst, String>;
}

/// Loads `<root>/<name>.tsn.json` interchange files.
pub struct FsLoader {
    pub root: PathBuf,
}

impl ModuleLoader for FsLoader {
    fn load(&mut self, name: &str) -> Result<ModuleAst, String> {
        let path = self.root.join(format!("{name}.tsn.json"));
        let text = std::fs::read_to_string(&path)
            .map_err(|e| format!("cannot read '{}': {e}", path.display()))?;
        serde_json::from_str(&text).map_err(|e| format!("malformed AST in '{}': {e}", path.display()))
    }
}

/// In-memory loader for tests and embedding hosts.
#[derive(Default)]
pub struct MemoryLoader {
    modules: HashMap<String, ModuleAst>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        MemoryLoader::default()
    }

    pub fn insert(&mut self, ast: ModuleAst) {
        self.modules.insert(ast.name.clone(), ast);
    }
}

impl ModuleLoader for MemoryLoader {
    fn load(&mut self, name: &str) -> Result<ModuleAst, String> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| format!("no module '{name}'"))
    }
}

/// A stage failure that stops the pipeline (resource errors, cycles).
/// Semantic errors do not produce this; they collect on the log.
#[derive(Debug)]
pub struct PipelineError {
    pub message: String,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for PipelineError {}

pub struct Pipeline {
    pub ctx: Context,
    loader: Box<dyn ModuleLoader>,
    pub backend: VmBackend,
    /// Retained IR (post-optimization) for dumps and inspection.
    pub holders: Vec<CodeHolder>,
    /// Loaded ASTs, retained for the `-o ast` dump.
    pub asts: Vec<ModuleAst>,
    pub optimize: bool,
    pub max_group_iterations: u32,
    /// Host functions visible to every module.
    core_host: Vec<(String, FuncId)>,
    visiting: Vec<String>,
    by_name: HashMap<String, ModuleId>,
}

impl Pipeline {
    pub fn new(loader: Box<dyn ModuleLoader>) -> Self {
        let mut ctx = Context::new();
        let core_host = host::install_core_host_functions(&mut ctx);
        tsn_vm::install_builtin_descriptors(&mut ctx.host);
        Pipeline {
            ctx,
            loader,
            backend: VmBackend::new(),
            holders: Vec::new(),
            asts: Vec::new(),
            optimize: true,
            max_group_iterations: Optimizer::DEFAULT_MAX_GROUP_ITERATIONS,
            core_host,
            visiting: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Register extra host functions (binding manifests) before compiling.
    pub fn add_host_functions(&mut self, funcs: Vec<(String, FuncId)>) {
        self.core_host.extend(funcs);
    }

    /// Compile a module and, recursively, everything it imports.
    pub fn compile(&mut self, name: &str) -> Result<ModuleId, PipelineError> {
        if let Some(&id) = self.by_name.get(name) {
            return Ok(id);
        }
        if self.visiting.iter().any(|n| n == name) {
            let chain = self.visiting.join(" -> ");
            self.ctx.log.submit(
                LogKind::Error,
                MessageCode::CImportCycle,
                SrcRef::default(),
                format!("import cycle: {chain} -> {name}"),
            );
            return Err(PipelineError {
                message: format!("import cycle involving '{name}'"),
            });
        }

        let ast = match self.loader.load(name) {
            Ok(ast) => ast,
            Err(e) => {
                self.ctx.log.submit(
                    LogKind::Error,
                    MessageCode::IFileNotFound,
                    SrcRef::default(),
                    e.clone(),
                );
                return Err(PipelineError { message: e });
            }
        };

        self.visiting.push(name.to_string());
        let result = self.compile_loaded(name, &ast);
        self.visiting.pop();
        self.asts.push(ast);
        result
    }

    fn compile_loaded(&mut self, name: &str, ast: &ModuleAst) -> Result<ModuleId, PipelineError> {
        // imports first; their failures propagate, their semantic errors
        // just accumulate
        let mut imported: Vec<(String, ModuleId)> = Vec::new();
        for import in &ast.imports {
            let id = self.compile(import)?;
            imported.push((import.clone(), id));
        }

        let mut module = Module::new(name);
        module.state = ModuleState::Parsed;
        let module_id = self.ctx.modules.add(module);
        self.by_name.insert(name.to_string(), module_id);

        let errors_before = self.ctx.log.error_count();
        tracing::debug!(module = name, "compiling module");

        let mut lw = Lowering::new(&mut self.ctx, module_id);
        for (host_name, fid) in &self.core_host {
            lw.symtab.set(host_name, Symbol::Funcs(vec![*fid]));
        }
        for (import_name, id) in &imported {
            lw.symtab.set(import_name, Symbol::Module(*id));
        }
        decls::lower_module(&mut lw, ast);
        let mut holders = std::mem::take(&mut lw.out);
        drop(lw);

        if self.ctx.log.error_count() > errors_before {
            // frozen at PARSED; siblings continue
            tracing::debug!(module = name, "module failed semantic compilation");
            return Ok(module_id);
        }
        self.set_state(module_id, ModuleState::Compiled);

        if self.optimize {
            let mut optimizer = Optimizer::default_pipeline();
            optimizer.max_group_iterations = self.max_group_iterations;
            for ch in &mut holders {
                optimizer.run(&mut self.ctx, ch);
            }
        }
        self.set_state(module_id, ModuleState::Optimized);

        for ch in &mut holders {
            if let Err(e) = self.backend.lower(&mut self.ctx, ch) {
                self.ctx.log.submit(
                    LogKind::Error,
                    MessageCode::GInternal,
                    SrcRef::default(),
                    format!("backend: {e}"),
                );
                return Ok(module_id);
            }
        }
        self.set_state(module_id, ModuleState::Lowered);

        self.holders.extend(holders);
        self.set_state(module_id, ModuleState::Ready);
        Ok(module_id)
    }

    fn set_state(&mut self, id: ModuleId, state: ModuleState) {
        if let Some(m) = self.ctx.modules.get_mut(id) {
            // transitions are forward-only
            if state > m.state {
                m.state = state;
            }
        }
    }

    pub fn module_state(&self, id: ModuleId) -> Option<ModuleState> {
        self.ctx.modules.get(id).map(|m| m.state)
    }

    /// The entry function of a module, by convention `main`.
    pub fn entry_function(&self, id: ModuleId) -> Option<FuncId> {
        let m = self.ctx.modules.get(id)?;
        m.funcs.iter().copied().find(|&fid| {
            self.ctx
                .funcs
                .get(fid)
                .map(|f| f.name == "main")
                .unwrap_or(false)
        })
    }
}
