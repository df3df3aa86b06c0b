//! UI event surface: event and command types plus notifier sinks.

mod events;
mod notifier;

pub use events::*;
pub use notifier::*;
