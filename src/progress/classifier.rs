//! Ordered classification of worker output lines.
//!
//! Each line is run through a fixed table of rules. A rule either does not
//! match, contributes fields and lets later rules run, or ends the scan.
//! The table order is the tie-break contract: a line that looks like
//! several things is classified by the earliest rule that stops.

use regex::Regex;

use super::{Fragments, Phase, ProgressUpdate, Signal, ETA_ZERO, SPEED_ZERO};

const MERGE_MARKER: &str = "[Merger] Merging formats";
const PAUSE_MARKER: &str = "Download paused";
const RESUME_MARKER: &str = "Download resumed";
const FRAGMENTS_START_MARKER: &str = "[download] Downloading fragments";
const FRAGMENTS_DONE_MARKER: &str = "[download] Finished downloading fragments";
const SOURCE_DELETED_MARKER: &str = "Deleting original file";

/// ETA values the worker prints when it has no estimate.
const ETA_SENTINELS: [&str; 3] = ["N/A", "Unknown", "?"];

const DESTINATION_PATTERN: &str = r"Destination:\s*(.+)|Download complete:\s*(.+)";

const PROGRESS_PATTERN: &str = concat!(
    r"\[download\]\s*([\d.]+)%",
    r"(?:\s+of\s+~?\s*(?:([\d.]+\s*[KMGTP]?i?B)|N/A|\?))?",
    r"(?:\s+at\s+(?:([\d.]+\s*[KMGTP]?i?B/s)|Unknown B/s|N/A|\?))?",
    r"(?:\s+ETA\s+([\d:]+|N/A|Unknown|\?))?",
    r"(?:\s*\(frag\s*(\d+)/(\d+)\))?",
);

/// Identifies a classification rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// Post-download merge started.
    MergeStart,
    /// Worker confirmed a pause.
    Paused,
    /// Worker confirmed a resume.
    Resumed,
    /// Output file path announced.
    Destination,
    /// Fragment download started or finished.
    FragmentMarker,
    /// Numeric progress line.
    Progress,
    /// Source files removed after post-processing; the job is done.
    SourceDeleted,
}

/// Per-stream state carried between lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanState {
    /// Set once the worker reports all fragments downloaded.
    pub fragments_finished: bool,
}

/// Result of evaluating one rule against a line.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Rule did not contribute.
    Skip,
    /// Rule contributed fields; keep scanning.
    Merge(ProgressUpdate),
    /// Rule decided the line; stop scanning.
    Stop(ProgressUpdate),
}

type RuleFn = fn(&LineClassifier, &str, &mut ScanState) -> Step;

/// One entry of the rule table.
#[derive(Clone, Copy)]
pub struct Rule {
    pub kind: RuleKind,
    eval: RuleFn,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("kind", &self.kind).finish()
    }
}

/// The rule table, in priority order.
pub const RULES: [Rule; 7] = [
    Rule {
        kind: RuleKind::MergeStart,
        eval: merge_start,
    },
    Rule {
        kind: RuleKind::Paused,
        eval: paused,
    },
    Rule {
        kind: RuleKind::Resumed,
        eval: resumed,
    },
    Rule {
        kind: RuleKind::Destination,
        eval: destination,
    },
    Rule {
        kind: RuleKind::FragmentMarker,
        eval: fragment_marker,
    },
    Rule {
        kind: RuleKind::Progress,
        eval: progress,
    },
    Rule {
        kind: RuleKind::SourceDeleted,
        eval: source_deleted,
    },
];

/// Stateless line classifier holding the compiled patterns.
#[derive(Debug, Clone)]
pub struct LineClassifier {
    destination: Regex,
    progress: Regex,
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl LineClassifier {
    /// Compile the classifier's patterns.
    ///
    /// # Panics
    ///
    /// Never in practice: the patterns are compile-time constants covered
    /// by the unit tests.
    #[must_use]
    pub fn new() -> Self {
        Self {
            destination: Regex::new(DESTINATION_PATTERN).expect("valid destination pattern"),
            progress: Regex::new(PROGRESS_PATTERN).expect("valid progress pattern"),
        }
    }

    /// Rule kinds in evaluation order.
    #[must_use]
    pub fn rule_order() -> [RuleKind; 7] {
        RULES.map(|rule| rule.kind)
    }

    /// Classify a single line into at most one update.
    ///
    /// `state` carries the fragment phase between lines and is updated in
    /// place by fragment markers.
    #[must_use]
    pub fn classify(&self, line: &str, state: &mut ScanState) -> Option<ProgressUpdate> {
        let mut accumulated: Option<ProgressUpdate> = None;

        for rule in &RULES {
            match (rule.eval)(self, line, state) {
                Step::Skip => {}
                Step::Merge(update) => {
                    accumulated = Some(accumulated.unwrap_or_default().merge(update));
                }
                Step::Stop(update) => {
                    tracing::trace!(rule = ?rule.kind, "Line classified");
                    return Some(accumulated.unwrap_or_default().merge(update));
                }
            }
        }

        accumulated
    }
}

fn merge_start(_: &LineClassifier, line: &str, _: &mut ScanState) -> Step {
    if !line.contains(MERGE_MARKER) {
        return Step::Skip;
    }
    Step::Stop(ProgressUpdate {
        phase: Some(Phase::Merging),
        percent: Some(100.0),
        eta: Some(ETA_ZERO.to_string()),
        speed: Some(SPEED_ZERO.to_string()),
        is_merging: Some(true),
        is_fragmenting: Some(false),
        signal: Some(Signal::Merging),
        ..Default::default()
    })
}

fn paused(_: &LineClassifier, line: &str, _: &mut ScanState) -> Step {
    if !line.contains(PAUSE_MARKER) {
        return Step::Skip;
    }
    Step::Stop(ProgressUpdate {
        phase: Some(Phase::Paused),
        is_fragmenting: Some(false),
        is_merging: Some(false),
        signal: Some(Signal::Paused),
        ..Default::default()
    })
}

fn resumed(_: &LineClassifier, line: &str, _: &mut ScanState) -> Step {
    if !line.contains(RESUME_MARKER) {
        return Step::Skip;
    }
    Step::Stop(ProgressUpdate {
        phase: Some(Phase::Downloading),
        is_fragmenting: Some(false),
        is_merging: Some(false),
        signal: Some(Signal::Resumed),
        ..Default::default()
    })
}

fn destination(classifier: &LineClassifier, line: &str, _: &mut ScanState) -> Step {
    let Some(caps) = classifier.destination.captures(line) else {
        return Step::Skip;
    };
    let Some(path) = caps.get(1).or_else(|| caps.get(2)) else {
        return Step::Skip;
    };
    let filename = file_name(path.as_str());
    if filename.is_empty() {
        return Step::Skip;
    }
    Step::Merge(ProgressUpdate {
        filename: Some(filename.to_string()),
        ..Default::default()
    })
}

fn fragment_marker(_: &LineClassifier, line: &str, state: &mut ScanState) -> Step {
    if line.contains(FRAGMENTS_START_MARKER) {
        state.fragments_finished = false;
    } else if line.contains(FRAGMENTS_DONE_MARKER) {
        state.fragments_finished = true;
    }
    Step::Skip
}

fn progress(classifier: &LineClassifier, line: &str, state: &mut ScanState) -> Step {
    let Some(caps) = classifier.progress.captures(line) else {
        return Step::Skip;
    };
    let Ok(percent) = caps[1].parse::<f64>() else {
        return Step::Skip;
    };

    let counters = match (caps.get(5), caps.get(6)) {
        (Some(current), Some(total)) => current
            .as_str()
            .parse::<u32>()
            .ok()
            .zip(total.as_str().parse::<u32>().ok()),
        _ => None,
    };
    let is_fragmenting = counters.is_some() && !state.fragments_finished;
    let fragments = counters.map_or_else(Fragments::default, |(current, total)| Fragments {
        current,
        total,
    });

    let eta = caps
        .get(4)
        .map(|m| m.as_str())
        .filter(|eta| !is_fragmenting && !ETA_SENTINELS.contains(eta))
        .map(str::to_string);

    Step::Merge(ProgressUpdate {
        percent: Some(percent),
        phase: Some(Phase::Downloading),
        total_size: caps.get(2).map(|m| m.as_str().to_string()),
        speed: caps.get(3).map(|m| m.as_str().to_string()),
        eta,
        fragments: Some(fragments),
        is_fragmenting: Some(is_fragmenting),
        is_merging: Some(false),
        ..Default::default()
    })
}

fn source_deleted(_: &LineClassifier, line: &str, _: &mut ScanState) -> Step {
    if !line.contains(SOURCE_DELETED_MARKER) {
        return Step::Skip;
    }
    Step::Stop(ProgressUpdate {
        phase: Some(Phase::Finished),
        percent: Some(100.0),
        eta: Some(ETA_ZERO.to_string()),
        speed: Some(SPEED_ZERO.to_string()),
        is_fragmenting: Some(false),
        is_merging: Some(false),
        signal: Some(Signal::Finished),
        ..Default::default()
    })
}

/// Final segment of a path written with either separator.
fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path).trim()
}
