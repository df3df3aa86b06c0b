//! Job requests and the session they create.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Quality selector passed to the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
    #[default]
    Highest,
}

impl Quality {
    /// Parse case-insensitively. Unknown selectors fall back to `Highest`,
    /// matching what the worker does with them.
    #[must_use]
    pub fn parse_lossy(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            "highest" => Self::Highest,
            other => {
                tracing::debug!(quality = other, "Unknown quality, using highest");
                Self::Highest
            }
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Highest => "highest",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A UI request to start a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub url: String,
    #[serde(default)]
    pub quality: Quality,
    pub destination: PathBuf,
}

impl StartRequest {
    #[must_use]
    pub fn new(url: impl Into<String>, quality: Quality, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            quality,
            destination: destination.into(),
        }
    }

    /// Check the request before anything is spawned.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the URL is not an absolute
    /// http(s) URL or the destination folder is empty.
    pub fn validate(&self) -> Result<(), String> {
        let parsed = url::Url::parse(self.url.trim())
            .map_err(|e| format!("Invalid URL '{}': {e}", self.url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!(
                "Unsupported URL scheme '{}': only http and https are accepted",
                parsed.scheme()
            ));
        }
        if self.destination.as_os_str().is_empty() {
            return Err("Destination folder is empty".to_string());
        }
        Ok(())
    }
}

/// The job currently owned by the supervisor.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub url: String,
    pub quality: Quality,
    pub destination: PathBuf,
    pub started_at: DateTime<Utc>,
    /// Whether `completed` has already been reported for this session.
    pub completed: bool,
}

impl Session {
    #[must_use]
    pub fn new(request: &StartRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: request.url.trim().to_string(),
            quality: request.quality,
            destination: request.destination.clone(),
            started_at: Utc::now(),
            completed: false,
        }
    }

    /// Time elapsed since the session started.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}
