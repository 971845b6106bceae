//! AST → IR lowering.
//!
//! [`Lowering`] carries everything one module's compile needs: the context
//! registries, the symbol table, the stack of in-progress functions (lambdas
//! nest), the block scopes with their stack-object teardown lists, and the
//! template side tables. Submodules split the work:
//!
//! - `expr`: expression lowering
//! - `stmt`: statements, blocks, loops, teardown
//! - `calls`: call resolution and emission
//! - `convert`: type conversion
//! - `closures`: lambda lifting and capture records
//! - `decls`: functions, classes, constructors/destructors
//! - `templates`: template instantiation

pub mod calls;
pub mod closures;
pub mod convert;
pub mod decls;
pub mod expr;
pub mod stmt;
pub mod templates;

use crate::ast::{ClassDecl, FunctionDecl, SrcLoc, TypeRef};
use crate::symtab::{Symbol, SymbolTable};
use std::collections::HashMap;
use tsn_core::{
    CodeHolder, Context, FuncId, ImplicitArg, Instruction, LabelId, LogKind, MessageCode,
    ModuleId, Opcode, Signature, SrcRef, TypeId, Value,
};

/// A compile-time block scope: the stack objects it must destroy on every
/// exit path, in construction order.
#[derive(Debug, Default)]
pub struct BlockScope {
    pub stack_objs: Vec<Value>,
}

/// Labels an enclosing loop exposes to `break`/`continue`, plus the block
/// depth teardown must unwind to.
#[derive(Debug, Clone, Copy)]
pub struct LoopCtx {
    pub break_label: LabelId,
    pub continue_label: LabelId,
    pub block_depth: usize,
}

/// Per-function compile state.
#[derive(Debug)]
pub struct FnState {
    pub func: FuncId,
    pub ch: CodeHolder,
    pub blocks: Vec<BlockScope>,
    pub loops: Vec<LoopCtx>,
    pub ret_type: TypeId,
    pub returns_on_stack: bool,
    /// Argument index of the implicit `ret_ptr`, when returning on stack.
    pub ret_arg: Option<u8>,
    /// Argument index of the capture record pointer, for lambdas.
    pub ectx_arg: Option<u8>,
    pub is_lambda: bool,
}

/// One module's lowering session.
pub struct Lowering<'c> {
    pub ctx: &'c mut Context,
    pub symtab: SymbolTable,
    pub module: ModuleId,
    /// Finished function bodies, ready for the optimizer and backend.
    pub out: Vec<CodeHolder>,
    /// In-progress functions; lambdas push a nested state.
    pub fns: Vec<FnState>,
    /// Template declaration ASTs, keyed by the `ast_key` stored on the
    /// registry entries.
    pub template_classes: HashMap<u32, (Vec<String>, ClassDecl)>,
    pub template_funcs: HashMap<u32, (Vec<String>, FunctionDecl)>,
    /// Binding for the `subtype` placeholder while instantiating a template.
    pub subtype_binding: Option<TypeId>,
    next_ast_key: u32,
    next_lambda: u32,
}

impl<'c> Lowering<'c> {
    pub fn new(ctx: &'c mut Context, module: ModuleId) -> Self {
        Lowering {
            ctx,
            symtab: SymbolTable::new(),
            module,
            out: Vec::new(),
            fns: Vec::new(),
            template_classes: HashMap::new(),
            template_funcs: HashMap::new(),
            subtype_binding: None,
            next_ast_key: 0,
            next_lambda: 0,
        }
    }

    pub fn cur(&mut self) -> &mut FnState {
        self.fns.last_mut().expect("no function is being compiled")
    }

    pub fn cur_ref(&self) -> &FnState {
        self.fns.last().expect("no function is being compiled")
    }

    pub fn src(&self, loc: SrcLoc) -> SrcRef {
        SrcRef::new(self.module, loc.line, loc.col)
    }

    pub fn next_ast_key(&mut self) -> u32 {
        let k = self.next_ast_key;
        self.next_ast_key += 1;
        k
    }

    pub fn next_lambda_name(&mut self) -> String {
        let n = self.next_lambda;
        self.next_lambda += 1;
        format!("$lambda_{n}")
    }

    // ---- diagnostics ------------------------------------------------------

    pub fn error(&mut self, code: MessageCode, loc: SrcLoc, message: impl Into<String>) {
        let range = self.src(loc);
        self.ctx.log.submit(LogKind::Error, code, range, message.into());
    }

    /// The sentinel produced by failed lookups; uses of it lower to no-ops
    /// so one mistake does not cascade.
    pub fn err_value(&self) -> Value {
        Value::imm_u(0, self.ctx.types.error())
    }

    pub fn is_err(&self, v: &Value) -> bool {
        v.tp == self.ctx.types.error() || !v.is_valid()
    }

    // ---- emission ---------------------------------------------------------

    pub fn add(&mut self, instr: Instruction) -> usize {
        self.cur().ch.emit(instr)
    }

    pub fn instr(&self, op: Opcode, loc: SrcLoc) -> Instruction {
        Instruction::new(op, self.src(loc))
    }

    pub fn emit1(&mut self, op: Opcode, a: Value, loc: SrcLoc) {
        let mut i = self.instr(op, loc);
        i.operands[0] = a;
        self.add(i);
    }

    pub fn emit2(&mut self, op: Opcode, a: Value, b: Value, loc: SrcLoc) {
        let mut i = self.instr(op, loc);
        i.operands[0] = a;
        i.operands[1] = b;
        self.add(i);
    }

    pub fn emit3(&mut self, op: Opcode, a: Value, b: Value, c: Value, loc: SrcLoc) {
        let mut i = self.instr(op, loc);
        i.operands[0] = a;
        i.operands[1] = b;
        i.operands[2] = c;
        self.add(i);
    }

    /// Fresh virtual register of the given type.
    pub fn reg(&mut self, tp: TypeId) -> Value {
        let r = self.cur().ch.alloc_reg();
        Value::reg(r, tp)
    }

    pub fn label(&mut self) -> LabelId {
        self.cur().ch.alloc_label()
    }

    pub fn label_value(&self, l: LabelId) -> Value {
        Value::imm_u(l as u64, 0)
    }

    pub fn place_label(&mut self, l: LabelId, loc: SrcLoc) {
        let v = self.label_value(l);
        self.emit1(Opcode::Label, v, loc);
    }

    pub fn jump(&mut self, l: LabelId, loc: SrcLoc) {
        let v = self.label_value(l);
        self.emit1(Opcode::Jump, v, loc);
    }

    pub fn branch(&mut self, cond: Value, l: LabelId, loc: SrcLoc) {
        let v = self.label_value(l);
        self.emit2(Opcode::Branch, cond, v, loc);
    }

    /// Allocate a stack slot for a value of `tp` and emit the `stack_alloc`.
    pub fn stack_alloc(&mut self, tp: TypeId, loc: SrcLoc) -> Value {
        let size = self.type_size(tp).max(1);
        let slot = self.cur().ch.stack.alloc(size);
        let v = Value::stack(slot, tp);
        self.emit2(Opcode::StackAlloc, v.clone(), Value::imm_u(size as u64, 0), loc);
        v
    }

    /// Register `v` as a stack object of the innermost block; it will be
    /// destroyed and freed on every exit path.
    pub fn raise_stack_flag(&mut self, mut v: Value) -> Value {
        v.stack_flag = true;
        if let Some(block) = self.cur().blocks.last_mut() {
            block.stack_objs.push(v.clone());
        }
        v
    }

    // ---- types ------------------------------------------------------------

    pub fn type_size(&self, tp: TypeId) -> u32 {
        self.ctx.types.get(tp).map(|t| t.size).unwrap_or(0)
    }

    /// Word-sized values: primitives, callables, and host handles. These
    /// live in registers; everything else is addressed storage.
    pub fn is_primitive(&self, tp: TypeId) -> bool {
        self.ctx
            .types
            .get(self.ctx.types.resolve_alias(tp))
            .map(|t| t.flags.is_primitive || t.flags.is_function || t.flags.is_host)
            .unwrap_or(false)
    }

    pub fn needs_dtor(&self, tp: TypeId) -> Option<FuncId> {
        self.ctx
            .types
            .get(self.ctx.types.resolve_alias(tp))
            .and_then(|t| t.dtor)
    }

    /// Resolve a written type reference. Reports `CNoSuchType` and returns
    /// `None` on failure.
    pub fn type_from_ref(&mut self, tr: &TypeRef, loc: SrcLoc) -> Option<TypeId> {
        match tr {
            TypeRef::Named { name } => {
                if name == "subtype" {
                    if let Some(bound) = self.subtype_binding {
                        return Some(bound);
                    }
                    return Some(self.ctx.types.subtype());
                }
                if name == "void" {
                    return Some(self.ctx.types.void());
                }
                if let Some(tp) = self.lookup_type_name(name) {
                    return Some(tp);
                }
                self.error(MessageCode::CNoSuchType, loc, format!("no such type '{name}'"));
                None
            }
            TypeRef::Template { name, args } => {
                templates::instantiate_class(self, name, args, loc)
            }
            TypeRef::Function { params, ret } => {
                let ret = self.type_from_ref(ret, loc)?;
                let mut sig_args = vec![tsn_core::SigArg::implicit(
                    self.ctx.types.data(),
                    ImplicitArg::CaptureDataPtr,
                )];
                for p in params {
                    let tp = self.type_from_ref(p, loc)?;
                    sig_args.push(tsn_core::SigArg::value(tp));
                }
                Some(self.ctx.types.signature_type(Signature {
                    return_type: ret,
                    returns_on_stack: false,
                    returns_pointer: false,
                    args: sig_args,
                }))
            }
        }
    }

    fn lookup_type_name(&self, name: &str) -> Option<TypeId> {
        // qualified: module::Type
        if let Some((module, rest)) = name.split_once("::") {
            if let Some(Symbol::Module(mid)) = self.symtab.get(module) {
                let m = self.ctx.modules.get(*mid)?;
                return m
                    .types
                    .iter()
                    .copied()
                    .find(|&t| self.ctx.types.get(t).map(|t| t.name == rest).unwrap_or(false));
            }
        }
        match self.symtab.get(name) {
            Some(Symbol::Type(tp)) => Some(*tp),
            _ => self.ctx.types.lookup(name),
        }
    }

    /// Finish the innermost function: emit a trailing `ret` when the body
    /// fell through, then move its CodeHolder to the output list.
    pub fn finish_fn(&mut self, loc: SrcLoc) {
        let needs_ret = self
            .cur_ref()
            .ch
            .code
            .last()
            .map(|i| i.op != Opcode::Ret)
            .unwrap_or(true);
        if needs_ret {
            let void = self.ctx.types.void();
            let ret_type = self.cur_ref().ret_type;
            if ret_type == void || self.cur_ref().returns_on_stack {
                let i = self.instr(Opcode::Ret, loc);
                self.add(i);
            } else {
                let fname = {
                    let fid = self.cur_ref().func;
                    self.ctx
                        .funcs
                        .get(fid)
                        .map(|f| f.display_name.clone())
                        .unwrap_or_default()
                };
                self.error(
                    MessageCode::CMissingReturnValue,
                    loc,
                    format!("'{fname}' must return a value on every path"),
                );
                let i = self.instr(Opcode::Ret, loc);
                self.add(i);
            }
        }
        let state = self.fns.pop().expect("finish_fn without begin");
        self.out.push(state.ch);
    }
}
