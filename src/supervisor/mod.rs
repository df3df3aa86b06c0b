//! Supervisor module: session status, job requests and the worker owner.

mod runner;
mod session;
mod state;

pub use runner::*;
pub use session::*;
pub use state::*;
