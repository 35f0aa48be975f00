#![warn(missing_docs)]

//! Runtime support for TileCL kernels: global configuration, logging, the hardware context
//! kernels are planned for, and a reference CPU executor for generated loop nests.

#[macro_use]
extern crate derive_new;

/// Configuration module.
pub mod config;

mod error;
mod executor;
mod hardware;
mod memory;
mod microkernel;
mod observer;

pub use error::*;
pub use executor::*;
pub use hardware::*;
pub use memory::*;
pub use microkernel::*;
pub use observer::*;
