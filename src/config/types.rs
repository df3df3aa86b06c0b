//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the worker program is invoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Program to execute (interpreter or worker binary).
    pub program: String,
    /// Script passed as the first argument, if the program is an interpreter.
    pub script: Option<PathBuf>,
    /// Extra arguments placed before the job parameters.
    pub extra_args: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            script: None,
            extra_args: Vec::new(),
        }
    }
}

/// Already-resolved locations of the tools the worker relies on.
///
/// Resolution itself happens elsewhere; these are only injected into the
/// worker's environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolLocations {
    pub ffmpeg: Option<PathBuf>,
    pub yt_dlp: Option<PathBuf>,
}

impl ToolLocations {
    /// Environment entries exposing these tools to the worker.
    ///
    /// `base_path` is the inherited `PATH`; the ffmpeg directory is
    /// prepended to it so the worker finds ffmpeg without configuration.
    #[must_use]
    pub fn env_entries(&self, base_path: Option<&str>) -> Vec<(String, String)> {
        let mut entries = vec![("PYTHONIOENCODING".to_string(), "utf-8".to_string())];

        if let Some(ffmpeg) = &self.ffmpeg {
            entries.push(("FFMPEG_PATH".to_string(), ffmpeg.display().to_string()));

            let dir = ffmpeg
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty());
            if let Some(dir) = dir {
                let path = match base_path {
                    Some(base) if !base.is_empty() => {
                        format!("{}{}{base}", dir.display(), path_separator())
                    }
                    _ => dir.display().to_string(),
                };
                entries.push(("PATH".to_string(), path));
            }
        }

        if let Some(yt_dlp) = &self.yt_dlp {
            entries.push(("YT_DLP_PATH".to_string(), yt_dlp.display().to_string()));
        }

        entries
    }
}

fn path_separator() -> char {
    if cfg!(windows) {
        ';'
    } else {
        ':'
    }
}

/// Timing constants for control reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Wait after a cancel token before forcing termination.
    pub cancel_grace_ms: u64,
    /// SIGTERM to SIGKILL escalation window during forced termination.
    pub terminate_timeout_ms: u64,
    /// Window after a pause request in which progress lines are discarded.
    pub pause_debounce_ms: u64,
    /// Maximum wait for output streams to drain once the worker exits.
    pub stream_drain_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            cancel_grace_ms: 1000,
            terminate_timeout_ms: 2000,
            pause_debounce_ms: 2000,
            stream_drain_ms: 500,
        }
    }
}

impl TimingConfig {
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    #[must_use]
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }

    #[must_use]
    pub fn pause_debounce(&self) -> Duration {
        Duration::from_millis(self.pause_debounce_ms)
    }

    #[must_use]
    pub fn stream_drain(&self) -> Duration {
        Duration::from_millis(self.stream_drain_ms)
    }
}

/// How text on the worker's error stream is treated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ErrorPolicy {
    /// Any error-stream line fails the job. When false, lines are logged.
    pub stderr_is_fatal: bool,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            stderr_is_fatal: true,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClipfetchConfig {
    pub worker: WorkerConfig,
    pub tools: ToolLocations,
    pub timing: TimingConfig,
    pub errors: ErrorPolicy,
}

impl ClipfetchConfig {
    /// Reject settings the supervisor cannot work with.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first offending key.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker.program.trim().is_empty() {
            return Err("worker.program must not be empty".to_string());
        }
        let timings = [
            ("cancel_grace_ms", self.timing.cancel_grace_ms),
            ("terminate_timeout_ms", self.timing.terminate_timeout_ms),
            ("pause_debounce_ms", self.timing.pause_debounce_ms),
        ];
        for (key, value) in timings {
            if value == 0 {
                return Err(format!("timing.{key} must be greater than zero"));
            }
        }
        Ok(())
    }
}
