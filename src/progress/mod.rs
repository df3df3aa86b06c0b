//! Progress interpretation of worker output.

mod classifier;
mod interpreter;
mod snapshot;

pub use classifier::*;
pub use interpreter::*;
pub use snapshot::*;
