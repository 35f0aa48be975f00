#![warn(missing_docs)]

//! Loop-nest intermediate representation used by the TileCL kernel generators.
//!
//! A [kernel](Kernel) is a tree of [statements](Stmt) operating on integer index
//! [expressions](Expr). Loops are owned by the kernel through a [loop arena](LoopNode) and are
//! referenced by [handle](LoopId), which lets a loop attribute point at another loop without
//! holding a reference to it.

#[macro_use]
extern crate derive_new;

mod builder;
mod display;
mod elem;
mod expr;
mod fusion;
mod kernel;
mod stmt;

pub use builder::*;
pub use elem::*;
pub use expr::*;
pub use fusion::*;
pub use kernel::*;
pub use stmt::*;
