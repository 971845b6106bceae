//! The scoped symbol table.
//!
//! A stack of frames pushed and popped in lockstep with compile-time blocks.
//! Lookups walk from the innermost frame outward. Functions with the same
//! name in the same frame form an overload set; `get_func` resolves a call
//! against the set with a deterministic conversion score.

use std::collections::HashMap;
use tsn_core::{Context, FuncId, ModuleId, TypeId, Value};

/// What a name is bound to.
#[derive(Debug, Clone)]
pub enum Symbol {
    Var(Value),
    /// Overload set.
    Funcs(Vec<FuncId>),
    Type(TypeId),
    Module(ModuleId),
    /// A variable captured from an enclosing function: where it lives at the
    /// creation site, and its byte offset inside the capture record.
    Capture {
        source: Value,
        tp: TypeId,
        offset: u32,
    },
}

#[derive(Debug, Default)]
struct Frame {
    names: HashMap<String, Symbol>,
}

/// Outcome of overload resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuncLookup {
    Found(FuncId),
    Ambiguous(Vec<FuncId>),
    NotFound,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    frames: Vec<Frame>,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut t = SymbolTable { frames: Vec::new() };
        t.push();
        t
    }

    pub fn push(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Bind a name in the innermost frame. Function symbols merge into the
    /// frame's overload set instead of shadowing within the same frame.
    pub fn set(&mut self, name: impl Into<String>, symbol: Symbol) {
        let name = name.into();
        let frame = self.frames.last_mut().expect("symbol table has no frame");
        match (frame.names.get_mut(&name), &symbol) {
            (Some(Symbol::Funcs(set)), Symbol::Funcs(new)) => {
                set.extend(new.iter().copied());
            }
            _ => {
                frame.names.insert(name, symbol);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.names.get(name))
    }

    /// True if the innermost frame already binds `name`.
    pub fn declared_in_top(&self, name: &str) -> bool {
        self.frames
            .last()
            .map(|f| f.names.contains_key(name))
            .unwrap_or(false)
    }

    /// Resolve a call against the overload set bound to `name`.
    ///
    /// With `strict`, an exact match (same arity, same argument types, same
    /// return type when one is expected) wins immediately. Otherwise
    /// candidates are ranked by summed conversion cost: 0 per exact argument,
    /// 1 per lossless implicit conversion, 2 per widening or pointer-decay
    /// conversion; an impossible conversion disqualifies. A score tie is an
    /// ambiguous call.
    pub fn get_func(
        &self,
        ctx: &Context,
        name: &str,
        expected_ret: Option<TypeId>,
        arg_types: &[TypeId],
        strict: bool,
    ) -> FuncLookup {
        let Some(Symbol::Funcs(set)) = self.get(name) else {
            return FuncLookup::NotFound;
        };
        resolve_overload(ctx, set, expected_ret, arg_types, strict)
    }
}

/// Shared resolution over an explicit candidate list (also used for method
/// sets on types).
pub fn resolve_overload(
    ctx: &Context,
    candidates: &[FuncId],
    expected_ret: Option<TypeId>,
    arg_types: &[TypeId],
    strict: bool,
) -> FuncLookup {
    if strict {
        for &fid in candidates {
            if matches_exactly(ctx, fid, expected_ret, arg_types) {
                return FuncLookup::Found(fid);
            }
        }
    }

    let mut best: Option<(u32, Vec<FuncId>)> = None;
    for &fid in candidates {
        let Some(score) = score_candidate(ctx, fid, arg_types) else {
            continue;
        };
        match &mut best {
            None => best = Some((score, vec![fid])),
            Some((bs, set)) => {
                if score < *bs {
                    *bs = score;
                    set.clear();
                    set.push(fid);
                } else if score == *bs {
                    set.push(fid);
                }
            }
        }
    }

    match best {
        None => FuncLookup::NotFound,
        Some((_, set)) if set.len() == 1 => FuncLookup::Found(set[0]),
        Some((_, set)) => FuncLookup::Ambiguous(set),
    }
}

fn explicit_arg_types(ctx: &Context, fid: FuncId) -> Option<(Vec<TypeId>, TypeId)> {
    let f = ctx.funcs.get(fid)?;
    let sig = ctx.types.get(f.sig_type)?.sig.as_ref()?;
    let args = sig.explicit_args().map(|a| a.tp).collect();
    Some((args, sig.return_type))
}

fn matches_exactly(
    ctx: &Context,
    fid: FuncId,
    expected_ret: Option<TypeId>,
    arg_types: &[TypeId],
) -> bool {
    let Some((args, ret)) = explicit_arg_types(ctx, fid) else {
        return false;
    };
    if args.len() != arg_types.len() {
        return false;
    }
    if let Some(want) = expected_ret {
        if ctx.types.resolve_alias(ret) != ctx.types.resolve_alias(want) {
            return false;
        }
    }
    args.iter()
        .zip(arg_types)
        .all(|(&a, &b)| ctx.types.resolve_alias(a) == ctx.types.resolve_alias(b))
}

/// Summed conversion cost of calling `fid` with `arg_types`, or `None` when
/// a conversion is impossible.
fn score_candidate(ctx: &Context, fid: FuncId, arg_types: &[TypeId]) -> Option<u32> {
    let (args, _) = explicit_arg_types(ctx, fid)?;
    if args.len() != arg_types.len() {
        return None;
    }
    let mut total = 0;
    for (&param, &given) in args.iter().zip(arg_types) {
        total += conversion_cost(ctx, given, param)?;
    }
    Some(total)
}

/// 0 exact, 1 lossless, 2 widening/decay, `None` impossible.
pub fn conversion_cost(ctx: &Context, from: TypeId, to: TypeId) -> Option<u32> {
    let from = ctx.types.resolve_alias(from);
    let to = ctx.types.resolve_alias(to);
    if from == to {
        return Some(0);
    }
    let (f, t) = (ctx.types.get(from)?, ctx.types.get(to)?);

    if f.is_numeric() && t.is_numeric() {
        let same_class = f.flags.is_floating_point == t.flags.is_floating_point
            && f.flags.is_unsigned == t.flags.is_unsigned;
        if same_class && t.size >= f.size {
            // i8 -> i32, f32 -> f64: representable without loss
            return Some(1);
        }
        return Some(2);
    }

    // pointer decay: any aggregate or callable handed to the opaque `data`
    // pointer type
    if to == ctx.types.data() && (!f.flags.is_primitive || f.flags.is_function) {
        return Some(2);
    }

    None
}
