//! TSN Core: shared data model for the TSN compiler and runtime
//!
//! This crate holds everything the compiler, optimizer, and VM backend agree
//! on: the type system arenas, the function/module registries, compiler
//! values, the three-address IR with its opcode contract table, and the
//! diagnostic log.
//!
//! Design principles:
//! - Arenas with stable small-integer ids instead of pointer graphs. A
//!   [`Context`] owns every `Type`, `Function`, and `Module`; everything else
//!   refers to them by id.
//! - The IR instruction is a flat struct (opcode + uniform operand array),
//!   and the per-opcode [`ir::OpInfo`] table is the contract optimizers and
//!   backends rely on.
//! - Diagnostics are collected, never thrown. Compile errors live in the
//!   [`log::CompileLog`]; only VM runtime errors propagate as `Result`s.
//!
//! # Modules
//!
//! - `context`: the owning handle for one compilation/execution context
//! - `types`: data types, signatures, the interning registry
//! - `function`: script and host functions
//! - `module`: modules, globals, moduletype ids, pipeline state
//! - `value`: the compiler's universal value handle
//! - `ir`: opcodes, instructions, the opcode-info table
//! - `codeholder`: per-function IR container, stack layout, live ranges
//! - `log`: coded diagnostics with source ranges
//! - `ffi`: host-function descriptors consumed by the VM bridge

pub mod codeholder;
pub mod context;
pub mod ffi;
pub mod function;
pub mod ir;
pub mod log;
pub mod module;
pub mod src_ref;
pub mod types;
pub mod value;

pub use codeholder::{CodeHolder, LiveRange, StackFrame};
pub use context::Context;
pub use ffi::{FfiKind, FfiParam, FnDescriptor, HostPort, HostRegistry};
pub use function::{FuncAccess, FuncId, Function, FunctionRegistry};
pub use ir::{CallTarget, Instruction, LabelId, OpInfo, Opcode};
pub use log::{CompileLog, LogEntry, LogKind, MessageCode};
pub use module::{
    join_moduletype, split_moduletype, Module, ModuleId, ModuleRegistry, ModuleState,
};
pub use src_ref::SrcRef;
pub use types::{
    Access, ImplicitArg, NumClass, Primitive, PropFlags, SigArg, Signature, TemplateInfo, Type,
    TypeBase, TypeFlags, TypeId, TypeProp, TypeRegistry,
};
pub use value::{Imm, RegId, SlotId, Value, ValueKind};
