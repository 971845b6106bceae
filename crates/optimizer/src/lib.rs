//! IR optimization for TSN.
//!
//! A pass manager holds ordered groups; each group holds ordered passes. A
//! pass receives one function's [`CodeHolder`] and reports whether it changed
//! anything and whether its group should run again. The manager runs each
//! group to fixpoint (bounded by a configurable iteration cap) before moving
//! to the next group.
//!
//! Passes must preserve program semantics; a pass that cannot prove a rewrite
//! safe rejects it. Nothing here reorders across side-effect or control-flow
//! boundaries.

pub mod blocks;
pub mod dce;
pub mod fold;
pub mod reduce_memory;

pub use blocks::BlockGraph;
pub use dce::DeadCodeElimination;
pub use fold::ConstantFolding;
pub use reduce_memory::ReduceMemoryAccess;

use tsn_core::{CodeHolder, Context};

/// Outcome of one pass execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassResult {
    pub changed: bool,
    /// Ask the manager to run the whole group again.
    pub repeat_group: bool,
}

impl PassResult {
    pub fn unchanged() -> Self {
        PassResult::default()
    }

    pub fn changed_repeat() -> Self {
        PassResult {
            changed: true,
            repeat_group: true,
        }
    }
}

/// One optimization step over a single function.
pub trait OptimizationPass {
    fn name(&self) -> &'static str;
    fn run(&mut self, ctx: &mut Context, ch: &mut CodeHolder) -> PassResult;
}

/// An ordered list of passes run to fixpoint as a unit.
#[derive(Default)]
pub struct OptimizationGroup {
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl OptimizationGroup {
    pub fn new() -> Self {
        OptimizationGroup::default()
    }

    pub fn add(mut self, pass: impl OptimizationPass + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }
}

/// The pass manager.
pub struct Optimizer {
    groups: Vec<OptimizationGroup>,
    /// Cap on iterations of one group, preventing pathological oscillation.
    pub max_group_iterations: u32,
}

impl Optimizer {
    pub const DEFAULT_MAX_GROUP_ITERATIONS: u32 = 32;

    pub fn new() -> Self {
        Optimizer {
            groups: Vec::new(),
            max_group_iterations: Self::DEFAULT_MAX_GROUP_ITERATIONS,
        }
    }

    /// The standard pipeline: fold constants, reduce memory traffic, then
    /// sweep dead code, repeating until the group settles.
    pub fn default_pipeline() -> Self {
        Optimizer::new().group(
            OptimizationGroup::new()
                .add(ConstantFolding)
                .add(ReduceMemoryAccess)
                .add(DeadCodeElimination),
        )
    }

    pub fn group(mut self, group: OptimizationGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Optimize one function in place. Returns true if anything changed.
    pub fn run(&mut self, ctx: &mut Context, ch: &mut CodeHolder) -> bool {
        let mut any_change = false;
        for group in &mut self.groups {
            let mut iterations = 0;
            loop {
                let mut repeat = false;
                for pass in &mut group.passes {
                    let result = pass.run(ctx, ch);
                    if result.changed {
                        any_change = true;
                        tracing::debug!(pass = pass.name(), func = ch.owner, "pass changed IR");
                    }
                    repeat |= result.repeat_group;
                }
                iterations += 1;
                if !repeat || iterations >= self.max_group_iterations {
                    break;
                }
            }
        }
        any_change
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::default_pipeline()
    }
}
