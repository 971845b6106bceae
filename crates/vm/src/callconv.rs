//! The calling convention.
//!
//! Implicit arguments occupy dedicated registers: `this_ptr` and
//! `capture_data_ptr` arrive first and therefore land in `$a0`;
//! `moduletype_id` rides in the `$v3` scratch register without consuming an
//! argument slot; `ret_ptr` takes the next free GP argument register.
//! Explicit integer/pointer arguments fill `$a0..$a15`, floating-point
//! arguments fill `$fa0..$fa15`. Returns go to `$v0` (integer/pointer) or
//! `$vf0` (float/double), or through `ret_ptr` when the callee returns on
//! the stack.

use crate::registers::Reg;
use tsn_core::{Context, ImplicitArg, Signature};

/// Where one argument of a call lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLoc {
    Reg(Reg),
    /// Spill slot index for arguments past the register file (offset from
    /// the callee's `sp`, assigned left to right).
    Stack(u32),
}

/// Resolved locations for every argument of a signature, index-aligned with
/// `sig.args`.
pub fn arg_locations(ctx: &Context, sig: &Signature) -> Vec<ArgLoc> {
    let mut gp = 0usize;
    let mut fp = 0usize;
    let mut stack = 0u32;
    let mut out = Vec::with_capacity(sig.args.len());

    for arg in &sig.args {
        if arg.implicit == ImplicitArg::ModuletypeId {
            out.push(ArgLoc::Reg(Reg::V3));
            continue;
        }
        let is_float = !arg.is_ptr
            && ctx
                .types
                .get(arg.tp)
                .map(|t| t.flags.is_floating_point)
                .unwrap_or(false);
        let loc = if is_float {
            match Reg::farg(fp) {
                Some(r) => {
                    fp += 1;
                    ArgLoc::Reg(r)
                }
                None => {
                    let s = stack;
                    stack += 8;
                    ArgLoc::Stack(s)
                }
            }
        } else {
            match Reg::arg(gp) {
                Some(r) => {
                    gp += 1;
                    ArgLoc::Reg(r)
                }
                None => {
                    let s = stack;
                    stack += 8;
                    ArgLoc::Stack(s)
                }
            }
        };
        out.push(loc);
    }
    out
}

/// The register a function's return value lands in, or `None` when it
/// returns through `ret_ptr` or returns nothing.
pub fn return_register(ctx: &Context, sig: &Signature) -> Option<Reg> {
    if sig.returns_on_stack {
        return None;
    }
    let ret = ctx.types.get(sig.return_type)?;
    if ret.size == 0 {
        return None;
    }
    if ret.flags.is_floating_point && !sig.returns_pointer {
        Some(Reg::Vf0)
    } else {
        Some(Reg::V0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsn_core::{Primitive, SigArg};

    fn sig(ctx: &Context, ret: tsn_core::TypeId, args: Vec<SigArg>) -> Signature {
        let _ = ctx;
        Signature {
            return_type: ret,
            returns_on_stack: false,
            returns_pointer: false,
            args,
        }
    }

    #[test]
    fn test_gp_and_fp_args_fill_separate_files() {
        let ctx = Context::new();
        let i32t = ctx.types.primitive(Primitive::I32);
        let f64t = ctx.types.primitive(Primitive::F64);
        let s = sig(
            &ctx,
            i32t,
            vec![
                SigArg::value(i32t),
                SigArg::value(f64t),
                SigArg::value(i32t),
                SigArg::value(f64t),
            ],
        );
        let locs = arg_locations(&ctx, &s);
        assert_eq!(
            locs,
            vec![
                ArgLoc::Reg(Reg::A0),
                ArgLoc::Reg(Reg::Fa0),
                ArgLoc::Reg(Reg::A1),
                ArgLoc::Reg(Reg::Fa1),
            ]
        );
    }

    #[test]
    fn test_this_ptr_lands_in_a0_and_shifts_explicit_args() {
        let ctx = Context::new();
        let i32t = ctx.types.primitive(Primitive::I32);
        let data = ctx.types.data();
        let s = sig(
            &ctx,
            i32t,
            vec![
                SigArg::implicit(data, ImplicitArg::ThisPtr),
                SigArg::value(i32t),
            ],
        );
        let locs = arg_locations(&ctx, &s);
        assert_eq!(locs[0], ArgLoc::Reg(Reg::A0));
        assert_eq!(locs[1], ArgLoc::Reg(Reg::A1));
    }

    #[test]
    fn test_moduletype_id_rides_v3() {
        let ctx = Context::new();
        let i32t = ctx.types.primitive(Primitive::I32);
        let u64t = ctx.types.primitive(Primitive::U64);
        let s = sig(
            &ctx,
            i32t,
            vec![
                SigArg::implicit(u64t, ImplicitArg::ModuletypeId),
                SigArg::value(i32t),
            ],
        );
        let locs = arg_locations(&ctx, &s);
        assert_eq!(locs[0], ArgLoc::Reg(Reg::V3));
        // v3 does not consume an argument slot
        assert_eq!(locs[1], ArgLoc::Reg(Reg::A0));
    }

    #[test]
    fn test_overflow_args_spill_to_stack() {
        let ctx = Context::new();
        let i32t = ctx.types.primitive(Primitive::I32);
        let args: Vec<SigArg> = (0..18).map(|_| SigArg::value(i32t)).collect();
        let s = sig(&ctx, i32t, args);
        let locs = arg_locations(&ctx, &s);
        assert_eq!(locs[15], ArgLoc::Reg(Reg::A15));
        assert_eq!(locs[16], ArgLoc::Stack(0));
        assert_eq!(locs[17], ArgLoc::Stack(8));
    }

    #[test]
    fn test_return_registers() {
        let ctx = Context::new();
        let i32t = ctx.types.primitive(Primitive::I32);
        let f32t = ctx.types.primitive(Primitive::F32);
        let void = ctx.types.void();

        let s = sig(&ctx, i32t, vec![]);
        assert_eq!(return_register(&ctx, &s), Some(Reg::V0));

        let s = sig(&ctx, f32t, vec![]);
        assert_eq!(return_register(&ctx, &s), Some(Reg::Vf0));

        let s = sig(&ctx, void, vec![]);
        assert_eq!(return_register(&ctx, &s), None);

        let mut s = sig(&ctx, i32t, vec![]);
        s.returns_on_stack = true;
        assert_eq!(return_register(&ctx, &s), None);
    }
}
