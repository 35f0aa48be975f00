//! Multi-level parallel matmul for CPUs: thread teams on M, N and K, cache sub-blocks inside a
//! team, and batch-reduce micro-kernel calls on tiles.

mod anchor;
mod base;
mod compute;
mod layout;
mod reduce;
mod split;

pub use anchor::*;
pub use base::{generate, LHS, OUT, PARTIAL, RHS};
pub use layout::*;
pub use split::*;
