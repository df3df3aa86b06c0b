//! Control tokens written to the worker's stdin.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A fire-and-forget signal for the worker.
///
/// Each token is written as a single line. The worker acknowledges pause
/// and resume by printing a marker, but nothing guarantees it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlToken {
    Pause,
    Resume,
    Cancel,
}

impl ControlToken {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
        }
    }

    /// The token as written on the wire, including the line terminator.
    #[must_use]
    pub fn to_line(self) -> String {
        format!("{}\n", self.as_str())
    }
}

impl fmt::Display for ControlToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
