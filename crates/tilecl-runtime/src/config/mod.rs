/// Compilation config module.
pub mod compilation;
/// Execution config module.
pub mod execution;
/// Hardware config module.
pub mod hardware;

mod base;
mod logger;

pub use base::*;
pub use logger::*;
