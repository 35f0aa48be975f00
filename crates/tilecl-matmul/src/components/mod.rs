mod balance;
mod block;
mod error;
mod problem;
mod selection;

pub use balance::*;
pub use block::*;
pub use error::*;
pub use problem::*;
pub use selection::*;
