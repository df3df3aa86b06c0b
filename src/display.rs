//! Colored CLI display of job events.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::notify::{NotifyError, Notifier, UiEvent};
use crate::progress::{Phase, ProgressSnapshot, ETA_UNKNOWN};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Truncate a string to at most `max_len` characters, adding an ellipsis
/// if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

/// Normalize an ETA for display.
///
/// Clock-style values pass through; a bare number of seconds becomes
/// `m:ss`; anything else is shown as `N/A`.
#[must_use]
pub fn format_eta(eta: &str) -> String {
    let eta = eta.trim();
    if eta.is_empty() || eta == ETA_UNKNOWN {
        return ETA_UNKNOWN.to_string();
    }
    if eta.contains(':') {
        return eta.to_string();
    }
    match eta.parse::<u64>() {
        Ok(seconds) => format!("{}:{:02}", seconds / 60, seconds % 60),
        Err(_) => ETA_UNKNOWN.to_string(),
    }
}

/// One-line summary of a progress snapshot.
#[must_use]
pub fn format_progress(snapshot: &ProgressSnapshot) -> String {
    let mut line = format!("{:5.1}%", snapshot.percent);
    if !snapshot.total_size.is_empty() {
        line.push_str(&format!(" of {}", snapshot.total_size));
    }
    if !snapshot.speed.is_empty() {
        line.push_str(&format!(" at {}", snapshot.speed));
    }
    line.push_str(&format!(" ETA {}", format_eta(&snapshot.eta)));
    if snapshot.is_fragmenting {
        line.push_str(&format!(
            " (frag {}/{})",
            snapshot.fragments.current, snapshot.fragments.total
        ));
    }
    line
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Waiting => "waiting",
        Phase::Downloading => "downloading",
        Phase::Paused => "paused",
        Phase::Merging => "merging",
        Phase::Finished => "finished",
        Phase::Error => "error",
    }
}

/// Print an event to stdout.
///
/// Raw worker output is only shown when `show_output` is set.
///
/// # Errors
///
/// Returns the error from flushing stdout.
pub fn print_event(event: &UiEvent, show_output: bool) -> io::Result<()> {
    let ts = timestamp();
    match event {
        UiEvent::JobStarted {
            session_id,
            url,
            quality,
            destination,
        } => println!(
            "{} {} {} quality={} dest={} {}",
            ts.dimmed(),
            "[START]".blue().bold(),
            truncate(url, 80).cyan(),
            quality,
            destination.display(),
            format!("session={session_id}").dimmed()
        ),
        UiEvent::Output { line } => {
            if show_output {
                println!("{} {}", ts.dimmed(), line.dimmed());
            }
        }
        UiEvent::Progress { snapshot } => {
            let label = format!("[{}]", phase_label(snapshot.phase).to_uppercase());
            let name = if snapshot.filename.is_empty() {
                String::new()
            } else {
                truncate(&snapshot.filename, 40)
            };
            println!(
                "{} {} {} {}",
                ts.dimmed(),
                label.cyan().bold(),
                format_progress(snapshot),
                name.dimmed()
            );
        }
        UiEvent::PausedImmediate => {
            println!("{} {} Pause requested", ts.dimmed(), "[PAUSE]".yellow().bold());
        }
        UiEvent::Paused => {
            println!("{} {} Download paused", ts.dimmed(), "[PAUSE]".yellow().bold());
        }
        UiEvent::ResumedImmediate => {
            println!("{} {} Resume requested", ts.dimmed(), "[RESUME]".green().bold());
        }
        UiEvent::Resumed => {
            println!("{} {} Download resumed", ts.dimmed(), "[RESUME]".green().bold());
        }
        UiEvent::Completed { filename } => println!(
            "{} {} {}",
            ts.dimmed(),
            "[DONE]".green().bold(),
            if filename.is_empty() {
                "Download complete".to_string()
            } else {
                format!("Download complete: {filename}")
            }
        ),
        UiEvent::Cancelled => {
            println!("{} {} Download cancelled", ts.dimmed(), "[CANCEL]".magenta().bold());
        }
        UiEvent::Error { message } => println!(
            "{} {} {}",
            ts.dimmed(),
            "[ERROR]".red().bold(),
            truncate(message, 200).red()
        ),
        UiEvent::Rejected { reason } => println!(
            "{} {} {}",
            ts.dimmed(),
            "[REJECTED]".red().bold(),
            reason.dimmed()
        ),
    }
    io::stdout().flush()
}

/// Notifier printing events to the terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier {
    show_output: bool,
}

impl ConsoleNotifier {
    #[must_use]
    pub fn new(show_output: bool) -> Self {
        Self { show_output }
    }
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, event: UiEvent) -> Result<(), NotifyError> {
        print_event(&event, self.show_output)?;
        Ok(())
    }
}
