//! Adaptive tiling, scheduling and loop-nest generation for blocked matrix multiplication.
//!
//! A [problem](MatmulProblem) is planned in three steps: [block sizes](resolve_block_sizes) are
//! resolved from the element types and extents, a [tiling](select_tiling) spreads the blocks over
//! thread teams and cache sub-blocks, and the [managed](kernels::managed) generator emits a
//! parallel loop nest calling a batch-reduce micro-kernel on tiles. The [planner](MatmulPlanner)
//! chains the three and caches the decisions.

#[macro_use]
extern crate derive_new;

/// Components of matrix multiplication planning.
pub mod components;
/// Kernel generators.
pub mod kernels;

mod base;
mod cache;

pub use base::*;
pub use cache::*;
pub use components::{
    balance211, resolve_block_sizes, select_tiling, BlockSizes, CostModel, LoopOrder,
    MatmulElems, MatmulProblem, MatmulSetupError, MatmulUnsupportedError, MatrixLayout,
    ResolvedProblem, TilingConfig, WorkRegion,
};
pub use kernels::managed::generate;
