//! Script and host functions.

use crate::types::{Access, TypeId};
use serde::Serialize;
use std::collections::HashMap;

/// Index into the function arena. Id 0 is reserved.
pub type FuncId = u32;

/// How a function is reached at run time.
#[derive(Debug, Clone, Serialize)]
pub enum FuncAccess {
    /// Native function; the symbol resolves to a descriptor in the host
    /// registry when the VM bridges the call.
    Host { symbol: String },
    /// Script function; `entry` is the bytecode address once the backend has
    /// lowered it.
    Script { entry: Option<u64> },
    /// Template function; never directly callable, instantiated on demand.
    /// The declaration AST lives in a compiler-side table under `ast_key`.
    Template { ast_key: u32 },
}

/// A callable.
#[derive(Debug, Clone, Serialize)]
pub struct Function {
    pub id: FuncId,
    pub name: String,
    /// Name as shown in diagnostics, e.g. `Pair<f32>::constructor`.
    pub display_name: String,
    pub fqn: String,
    pub access: Access,
    /// Function-signature type in the type registry.
    pub sig_type: TypeId,
    /// Owning type for methods.
    pub method_of: Option<TypeId>,
    pub is_static: bool,
    pub is_thiscall: bool,
    pub access_kind: FuncAccess,
}

impl Function {
    pub fn is_host(&self) -> bool {
        matches!(self.access_kind, FuncAccess::Host { .. })
    }

    pub fn is_template(&self) -> bool {
        matches!(self.access_kind, FuncAccess::Template { .. })
    }

    pub fn entry(&self) -> Option<u64> {
        match self.access_kind {
            FuncAccess::Script { entry } => entry,
            _ => None,
        }
    }
}

/// Arena of every function in a context.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    funcs: Vec<Option<Function>>,
    by_fqn: HashMap<String, FuncId>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry {
            // slot 0 reserved, same convention as the type arena
            funcs: vec![None],
            by_fqn: HashMap::new(),
        }
    }

    pub fn add(&mut self, mut f: Function) -> FuncId {
        let id = self.funcs.len() as FuncId;
        f.id = id;
        // overloads share an fqn prefix but differ in signature; the map keys
        // the exact fqn, first registration wins for plain-name lookups
        self.by_fqn.entry(f.fqn.clone()).or_insert(id);
        self.funcs.push(Some(f));
        id
    }

    pub fn get(&self, id: FuncId) -> Option<&Function> {
        self.funcs.get(id as usize).and_then(|f| f.as_ref())
    }

    pub fn get_mut(&mut self, id: FuncId) -> Option<&mut Function> {
        self.funcs.get_mut(id as usize).and_then(|f| f.as_mut())
    }

    pub fn lookup(&self, fqn: &str) -> Option<FuncId> {
        self.by_fqn.get(fqn).copied()
    }

    /// Record the bytecode entry address after lowering.
    pub fn set_entry(&mut self, id: FuncId, entry: u64) {
        if let Some(f) = self.get_mut(id) {
            f.access_kind = FuncAccess::Script { entry: Some(entry) };
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Function> {
        self.funcs.iter().filter_map(|f| f.as_ref())
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Access;

    fn sample(name: &str) -> Function {
        Function {
            id: 0,
            name: name.into(),
            display_name: name.into(),
            fqn: format!("test::{name}"),
            access: Access::Public,
            sig_type: 1,
            method_of: None,
            is_static: false,
            is_thiscall: false,
            access_kind: FuncAccess::Script { entry: None },
        }
    }

    #[test]
    fn test_ids_are_stable_and_nonzero() {
        let mut reg = FunctionRegistry::new();
        let a = reg.add(sample("a"));
        let b = reg.add(sample("b"));
        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert_eq!(reg.get(a).unwrap().name, "a");
        assert!(reg.get(0).is_none());
    }

    #[test]
    fn test_entry_recorded_after_lowering() {
        let mut reg = FunctionRegistry::new();
        let id = reg.add(sample("main"));
        assert_eq!(reg.get(id).unwrap().entry(), None);
        reg.set_entry(id, 42);
        assert_eq!(reg.get(id).unwrap().entry(), Some(42));
    }
}
