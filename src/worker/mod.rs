//! Worker process spawning, control and output streaming.

mod control;
mod handle;
mod lines;
mod process;
mod stream;

pub use control::*;
pub use handle::*;
pub use lines::*;
pub use process::*;
pub use stream::*;
