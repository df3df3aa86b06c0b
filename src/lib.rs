//! Clipfetch - supervised media download worker with live progress.

pub mod config;
pub mod display;
pub mod notify;
pub mod progress;
pub mod supervisor;
pub mod worker;
