//! The owning handle for one compilation/execution context.

use crate::ffi::HostRegistry;
use crate::function::FunctionRegistry;
use crate::log::CompileLog;
use crate::module::ModuleRegistry;
use crate::types::TypeRegistry;

/// One independent compile/run universe.
///
/// A context owns every registry and the diagnostic log. Contexts share no
/// state; separate contexts may live on separate threads. All pipeline
/// stages take `&mut Context` on one thread; there is no interior locking.
#[derive(Debug)]
pub struct Context {
    pub types: TypeRegistry,
    pub funcs: FunctionRegistry,
    pub modules: ModuleRegistry,
    pub host: HostRegistry,
    pub log: CompileLog,
}

impl Context {
    /// Create a context with the built-in types installed.
    pub fn new() -> Self {
        Context {
            types: TypeRegistry::new(),
            funcs: FunctionRegistry::new(),
            modules: ModuleRegistry::new(),
            host: HostRegistry::new(),
            log: CompileLog::new(),
        }
    }

    /// Short display name for a type id in diagnostics.
    pub fn type_name(&self, tp: crate::types::TypeId) -> &str {
        self.types.get(tp).map(|t| t.name.as_str()).unwrap_or("?")
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}
