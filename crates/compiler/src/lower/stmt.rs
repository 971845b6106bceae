//! Statement lowering: blocks, control flow, and stack-object teardown.

use super::convert::{convert, to_bool};
use super::expr::{copy_aggregate, lower_expr};
use super::{calls, BlockScope, Lowering, LoopCtx};
use crate::ast::{SrcLoc, Stmt};
use crate::symtab::Symbol;
use tsn_core::{MessageCode, Opcode, Value};

pub fn lower_stmts(lw: &mut Lowering, stmts: &[Stmt]) {
    for s in stmts {
        lower_stmt(lw, s);
    }
}

/// Open a scope: a symbol frame plus a teardown list, always popped
/// together.
pub fn open_block(lw: &mut Lowering) {
    lw.symtab.push();
    lw.cur().blocks.push(BlockScope::default());
}

/// Close the innermost scope: destructors run in reverse construction
/// order, each allocation is freed, then the frame unbinds its names.
pub fn close_block(lw: &mut Lowering, loc: SrcLoc) {
    let depth = lw.cur_ref().blocks.len() - 1;
    // a block ending in `return` already ran its teardown
    let returned = lw
        .cur_ref()
        .ch
        .code
        .last()
        .map(|i| i.op == Opcode::Ret)
        .unwrap_or(false);
    if !returned {
        emit_teardown(lw, depth, loc);
    }
    let block = lw.cur().blocks.pop().expect("unbalanced block");
    for obj in &block.stack_objs {
        if let Some(slot) = obj.slot_id() {
            lw.cur().ch.stack.free(slot);
        }
    }
    lw.symtab.pop();
}

/// Emit teardown code for every block at `from_depth` and deeper, without
/// popping anything; early exits (`return`/`break`/`continue`) run the same
/// code as normal exits but leave the compile-time scopes in place.
pub fn emit_teardown(lw: &mut Lowering, from_depth: usize, loc: SrcLoc) {
    let pending: Vec<Vec<Value>> = lw.cur_ref().blocks[from_depth..]
        .iter()
        .map(|b| b.stack_objs.clone())
        .collect();
    for objs in pending.iter().rev() {
        for obj in objs.iter().rev() {
            if let Some(dtor) = lw.needs_dtor(obj.tp) {
                calls::emit_call(lw, calls::Callee::Func(dtor), Some(obj.clone()), &[], loc);
            }
            lw.emit1(Opcode::StackFree, obj.clone(), loc);
        }
    }
}

fn lower_block(lw: &mut Lowering, stmts: &[Stmt], loc: SrcLoc) {
    open_block(lw);
    lower_stmts(lw, stmts);
    close_block(lw, loc);
}

pub fn lower_stmt(lw: &mut Lowering, s: &Stmt) {
    match s {
        Stmt::Expr { expr } => {
            lower_expr(lw, expr);
        }
        Stmt::Let { name, ty, init, loc } => lower_let(lw, name, ty.as_ref(), init.as_ref(), *loc),
        Stmt::Return { value, loc } => lower_return(lw, value.as_ref(), *loc),
        Stmt::If { cond, then, els, loc } => lower_if(lw, cond, then, els.as_deref(), *loc),
        Stmt::While { cond, body, loc } => lower_while(lw, cond, body, *loc),
        Stmt::DoWhile { body, cond, loc } => lower_do_while(lw, body, cond, *loc),
        Stmt::For {
            init,
            cond,
            step,
            body,
            loc,
        } => lower_for(lw, init.as_deref(), cond.as_ref(), step.as_ref(), body, *loc),
        Stmt::Break { loc } => lower_break(lw, *loc),
        Stmt::Continue { loc } => lower_continue(lw, *loc),
        Stmt::Block { body } => lower_block(lw, body, SrcLoc::default()),
    }
}

fn lower_let(
    lw: &mut Lowering,
    name: &str,
    ty: Option<&crate::ast::TypeRef>,
    init: Option<&crate::ast::Expr>,
    loc: SrcLoc,
) {
    if lw.symtab.declared_in_top(name) {
        lw.error(
            MessageCode::CDuplicateName,
            loc,
            format!("'{name}' is already declared in this scope"),
        );
        return;
    }

    let declared = ty.and_then(|t| lw.type_from_ref(t, loc));
    let init_value = init.map(|e| lower_expr(lw, e));
    if let Some(v) = &init_value {
        if lw.is_err(v) {
            return;
        }
    }

    let var_tp = match (declared, &init_value) {
        (Some(t), _) => t,
        (None, Some(v)) => v.tp,
        (None, None) => {
            lw.error(
                MessageCode::CInvalidOperands,
                loc,
                format!("'{name}' needs a type or an initializer"),
            );
            return;
        }
    };

    let value = if lw.is_primitive(var_tp) {
        let reg = lw.reg(var_tp);
        let init_v = match init_value {
            Some(v) => convert(lw, v, var_tp, loc),
            None => Value::imm_u(0, var_tp),
        };
        if lw.is_err(&init_v) {
            return;
        }
        lw.emit2(Opcode::Assign, reg.clone(), init_v, loc);
        reg
    } else {
        match init_value {
            // adopt a fresh stack object (new-expression, object literal,
            // lambda) instead of copying it
            Some(v) if v.is_stack() && lw.ctx.types.resolve_alias(v.tp) == lw.ctx.types.resolve_alias(var_tp) => v,
            Some(v) => {
                let slot = lw.stack_alloc(var_tp, loc);
                let slot = lw.raise_stack_flag(slot);
                let v = convert(lw, v, var_tp, loc);
                if lw.is_err(&v) {
                    return;
                }
                copy_aggregate(lw, v, slot.clone(), loc);
                slot
            }
            None => {
                let slot = lw.stack_alloc(var_tp, loc);
                let slot = lw.raise_stack_flag(slot);
                if let Some(ctor) = calls::find_ctor(lw, var_tp, &[]) {
                    calls::emit_call(lw, calls::Callee::Func(ctor), Some(slot.clone()), &[], loc);
                }
                slot
            }
        }
    };
    lw.symtab.set(name, Symbol::Var(value));
}

fn lower_return(lw: &mut Lowering, value: Option<&crate::ast::Expr>, loc: SrcLoc) {
    let ret_type = lw.cur_ref().ret_type;
    let returns_on_stack = lw.cur_ref().returns_on_stack;
    let ret_arg = lw.cur_ref().ret_arg;

    let result = value.map(|e| lower_expr(lw, e));
    let result = match result {
        Some(v) => {
            if lw.is_err(&v) {
                return;
            }
            Some(convert(lw, v, ret_type, loc))
        }
        None => None,
    };

    if returns_on_stack {
        if let (Some(v), Some(arg_idx)) = (&result, ret_arg) {
            let dst = Value::arg(arg_idx, ret_type);
            copy_aggregate(lw, v.clone(), dst, loc);
        }
        emit_teardown(lw, 0, loc);
        let i = lw.instr(Opcode::Ret, loc);
        lw.add(i);
        return;
    }

    emit_teardown(lw, 0, loc);
    let mut i = lw.instr(Opcode::Ret, loc);
    if let Some(v) = result {
        if lw.type_size(ret_type) > 0 {
            i.operands[0] = v;
        }
    }
    lw.add(i);
}

fn lower_if(
    lw: &mut Lowering,
    cond: &crate::ast::Expr,
    then: &[Stmt],
    els: Option<&[Stmt]>,
    loc: SrcLoc,
) {
    let bool_t = lw.ctx.types.primitive(tsn_core::Primitive::Bool);
    let c = lower_expr(lw, cond);
    let c = to_bool(lw, c, loc);
    if lw.is_err(&c) {
        return;
    }

    let else_label = lw.label();
    let join = lw.label();
    {
        let ev = lw.label_value(else_label);
        let jv = lw.label_value(join);
        let mut meta = lw.instr(Opcode::MetaIfBranch, loc);
        meta.operands[0] = ev;
        meta.operands[1] = jv.clone();
        meta.operands[2] = jv;
        lw.add(meta);
    }

    let not_c = lw.reg(bool_t);
    lw.emit2(Opcode::Not, not_c.clone(), c, loc);
    lw.branch(not_c, else_label, loc);

    lower_block(lw, then, loc);

    match els {
        Some(els) => {
            lw.jump(join, loc);
            lw.place_label(else_label, loc);
            lower_block(lw, els, loc);
            lw.place_label(join, loc);
        }
        None => {
            lw.place_label(else_label, loc);
            lw.place_label(join, loc);
        }
    }
}

fn lower_while(lw: &mut Lowering, cond: &crate::ast::Expr, body: &[Stmt], loc: SrcLoc) {
    let bool_t = lw.ctx.types.primitive(tsn_core::Primitive::Bool);
    let cond_label = lw.label();
    let end = lw.label();
    {
        let cv = lw.label_value(cond_label);
        let ev = lw.label_value(end);
        let mut meta = lw.instr(Opcode::MetaWhileLoop, loc);
        meta.operands[0] = cv;
        meta.operands[1] = ev;
        lw.add(meta);
    }

    lw.place_label(cond_label, loc);
    let c = lower_expr(lw, cond);
    let c = to_bool(lw, c, loc);
    if lw.is_err(&c) {
        return;
    }
    let not_c = lw.reg(bool_t);
    lw.emit2(Opcode::Not, not_c.clone(), c, loc);
    lw.branch(not_c, end, loc);

    let depth = lw.cur_ref().blocks.len();
    lw.cur().loops.push(LoopCtx {
        break_label: end,
        continue_label: cond_label,
        block_depth: depth,
    });
    lower_block(lw, body, loc);
    lw.cur().loops.pop();

    lw.jump(cond_label, loc);
    lw.place_label(end, loc);
}

fn lower_do_while(lw: &mut Lowering, body: &[Stmt], cond: &crate::ast::Expr, loc: SrcLoc) {
    let start = lw.label();
    let cond_label = lw.label();
    let end = lw.label();
    {
        let sv = lw.label_value(start);
        let mut meta = lw.instr(Opcode::MetaDoWhileLoop, loc);
        meta.operands[0] = sv;
        lw.add(meta);
    }

    lw.place_label(start, loc);
    let depth = lw.cur_ref().blocks.len();
    lw.cur().loops.push(LoopCtx {
        break_label: end,
        continue_label: cond_label,
        block_depth: depth,
    });
    lower_block(lw, body, loc);
    lw.cur().loops.pop();

    lw.place_label(cond_label, loc);
    let c = lower_expr(lw, cond);
    let c = to_bool(lw, c, loc);
    if lw.is_err(&c) {
        return;
    }
    lw.branch(c, start, loc);
    lw.place_label(end, loc);
}

fn lower_for(
    lw: &mut Lowering,
    init: Option<&Stmt>,
    cond: Option<&crate::ast::Expr>,
    step: Option<&crate::ast::Expr>,
    body: &[Stmt],
    loc: SrcLoc,
) {
    let bool_t = lw.ctx.types.primitive(tsn_core::Primitive::Bool);
    // the init declaration lands in the enclosing scope, so the counter
    // stays visible after the loop
    if let Some(init) = init {
        lower_stmt(lw, init);
    }

    let cond_label = lw.label();
    let step_label = lw.label();
    let end = lw.label();
    {
        let cv = lw.label_value(cond_label);
        let ev = lw.label_value(end);
        let mut meta = lw.instr(Opcode::MetaForLoop, loc);
        meta.operands[0] = cv;
        meta.operands[1] = ev;
        lw.add(meta);
    }

    lw.place_label(cond_label, loc);
    if let Some(cond) = cond {
        let c = lower_expr(lw, cond);
        let c = to_bool(lw, c, loc);
        if lw.is_err(&c) {
            return;
        }
        let not_c = lw.reg(bool_t);
        lw.emit2(Opcode::Not, not_c.clone(), c, loc);
        lw.branch(not_c, end, loc);
    }

    let depth = lw.cur_ref().blocks.len();
    lw.cur().loops.push(LoopCtx {
        break_label: end,
        continue_label: step_label,
        block_depth: depth,
    });
    lower_block(lw, body, loc);
    lw.cur().loops.pop();

    lw.place_label(step_label, loc);
    if let Some(step) = step {
        lower_expr(lw, step);
    }
    lw.jump(cond_label, loc);
    lw.place_label(end, loc);
}

fn lower_break(lw: &mut Lowering, loc: SrcLoc) {
    let Some(ctx) = lw.cur_ref().loops.last().copied() else {
        lw.error(MessageCode::CBreakOutsideLoop, loc, "break outside of a loop");
        return;
    };
    emit_teardown(lw, ctx.block_depth, loc);
    lw.jump(ctx.break_label, loc);
}

fn lower_continue(lw: &mut Lowering, loc: SrcLoc) {
    let Some(ctx) = lw.cur_ref().loops.last().copied() else {
        lw.error(
            MessageCode::CContinueOutsideLoop,
            loc,
            "continue outside of a loop",
        );
        return;
    };
    emit_teardown(lw, ctx.block_depth, loc);
    lw.jump(ctx.continue_label, loc);
}
