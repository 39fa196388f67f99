//! Output and Reporting
//!
//! Renders harvest summaries, ad-hoc validation outcomes, seed discovery,
//! rule checks and report history as human-readable text, JSON or one-line
//! summaries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::error::RuleConfigError;
use crate::harvest::HarvestSummary;
use crate::resolver::{Candidate, SourceKind};
use crate::store::{StoreSnapshot, ValidationJob};
use crate::validator::RuleSetOutcome;

/// A job with its most recent report
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub job: ValidationJob,
    pub run_id: Option<Uuid>,
    pub reported_at: Option<DateTime<Utc>>,
    pub items: Vec<String>,
}

/// Jobs in store order, optionally limited to one validation set and to
/// failing jobs.
pub fn history_entries(
    snapshot: &StoreSnapshot,
    validation_set: Option<&str>,
    failed_only: bool,
) -> Vec<HistoryEntry> {
    snapshot
        .jobs
        .iter()
        .filter(|job| validation_set.is_none_or(|set| job.validation_set == set))
        .filter(|job| !failed_only || !job.last_result)
        .map(|job| {
            let latest = snapshot.latest_report(job.id);
            HistoryEntry {
                job: job.clone(),
                run_id: latest.map(|r| r.run_id),
                reported_at: latest.map(|r| r.created_at),
                items: latest
                    .map(|r| snapshot.items_for(r.id).map(|i| i.text.clone()).collect())
                    .unwrap_or_default(),
            }
        })
        .collect()
}

#[derive(Serialize)]
struct RuleCheckEntry<'a> {
    rule: &'a str,
    error: String,
}

#[derive(Serialize)]
struct Discovery<'a> {
    seed: &'a str,
    source: Option<SourceKind>,
    candidates: &'a [Candidate],
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"could not serialize output: {}\"}}", e))
}

/// Output formatter
pub struct Output {
    verbosity: VerbosityLevel,
    format: OutputFormat,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel, format: OutputFormat) -> Self {
        Self {
            verbosity,
            format,
            show_colors: format == OutputFormat::Human && atty::is(atty::Stream::Stdout),
        }
    }

    pub fn with_colors(mut self, show_colors: bool) -> Self {
        self.show_colors = show_colors;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    fn verdict(&self, passed: bool) -> String {
        if passed {
            self.colorize("✓ PASS", "32")
        } else {
            self.colorize("✗ FAIL", "31")
        }
    }

    pub fn format_harvest(&self, summaries: &[HarvestSummary]) -> String {
        match self.format {
            OutputFormat::Json => to_json(summaries),
            OutputFormat::Summary => summaries
                .iter()
                .map(|s| {
                    format!(
                        "{}: {} candidates, {} passed, {} failed{}\n",
                        s.validation_set,
                        s.candidates.len(),
                        s.passed(),
                        s.failed(),
                        match (&s.error, s.cancelled) {
                            (Some(e), _) => format!(", error: {}", e),
                            (None, true) => format!(", cancelled ({} skipped)", s.skipped),
                            (None, false) => String::new(),
                        }
                    )
                })
                .collect(),
            OutputFormat::Human => {
                let mut output = String::new();
                for summary in summaries {
                    output.push_str(&self.format_set_summary(summary));
                }
                output
            }
        }
    }

    fn format_set_summary(&self, summary: &HarvestSummary) -> String {
        let mut output = String::new();
        output.push_str(&format!(
            "Validation set {} (rule set {})\n",
            summary.validation_set, summary.ruleset
        ));

        if let Some(error) = &summary.error {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Configuration error:", "33"),
                error
            ));
            return output;
        }

        if self.verbosity >= VerbosityLevel::Normal {
            output.push_str(&format!(
                "  Seed: {} ({})\n",
                summary.seed,
                summary
                    .source
                    .map(|kind| kind.to_string())
                    .unwrap_or_else(|| "unreachable".to_string())
            ));
            output.push_str(&format!("  Candidates: {}\n", summary.candidates.len()));
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Passed:", "32"),
                summary.passed()
            ));
            if summary.failed() > 0 {
                output.push_str(&format!(
                    "  {} {}\n",
                    self.colorize("Failed:", "31"),
                    summary.failed()
                ));
            }
            if summary.cancelled {
                output.push_str(&format!(
                    "  {} {} not started\n",
                    self.colorize("Cancelled:", "36"),
                    summary.skipped
                ));
            }
            output.push_str(&format!(
                "  Duration: {}\n",
                format_duration(summary.duration)
            ));
        }

        for candidate in &summary.candidates {
            let show = match self.verbosity {
                VerbosityLevel::Verbose => true,
                VerbosityLevel::Normal | VerbosityLevel::Quiet => !candidate.result,
            };
            if !show {
                continue;
            }
            let url = if candidate.url.is_empty() {
                "(unresolved)"
            } else {
                candidate.url.as_str()
            };
            output.push_str(&format!("  {}  {}\n", self.verdict(candidate.result), url));
            for item in &candidate.report {
                output.push_str(&format!("      {}\n", item));
            }
        }

        output
    }

    pub fn format_outcomes(&self, outcomes: &[RuleSetOutcome]) -> String {
        match self.format {
            OutputFormat::Json => to_json(outcomes),
            OutputFormat::Summary => {
                let passed = outcomes.iter().filter(|o| o.result).count();
                format!(
                    "{} documents, {} passed, {} failed\n",
                    outcomes.len(),
                    passed,
                    outcomes.len() - passed
                )
            }
            OutputFormat::Human => {
                let mut output = String::new();
                for outcome in outcomes {
                    if self.verbosity == VerbosityLevel::Quiet && outcome.result {
                        continue;
                    }
                    output.push_str(&format!(
                        "{}  {} ({})\n",
                        self.verdict(outcome.result),
                        outcome.location,
                        format_duration(outcome.duration)
                    ));
                    for item in &outcome.report {
                        output.push_str(&format!("    {}\n", item));
                    }
                }
                output
            }
        }
    }

    pub fn format_discovery(
        &self,
        seed: &str,
        source: Option<SourceKind>,
        candidates: &[Candidate],
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&Discovery {
                seed,
                source,
                candidates,
            }),
            OutputFormat::Summary => format!(
                "{}: {} candidates\n",
                source
                    .map(|kind| kind.to_string())
                    .unwrap_or_else(|| "unreachable".to_string()),
                candidates.len()
            ),
            OutputFormat::Human => {
                let mut output = String::new();
                if let Some(kind) = source {
                    output.push_str(&format!("{} seed: {}\n", kind, seed));
                }
                for candidate in candidates {
                    match candidate {
                        Candidate::Document { url } => output.push_str(&format!("  {}\n", url)),
                        Candidate::Unresolved { error } => output.push_str(&format!(
                            "  {} {}\n",
                            self.colorize("unresolved:", "33"),
                            error
                        )),
                    }
                }
                output
            }
        }
    }

    pub fn format_rule_check(
        &self,
        rule_count: usize,
        failures: &[(String, RuleConfigError)],
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(
                &failures
                    .iter()
                    .map(|(rule, error)| RuleCheckEntry {
                        rule,
                        error: error.to_string(),
                    })
                    .collect::<Vec<_>>(),
            ),
            OutputFormat::Summary => {
                format!("{} rules, {} misconfigured\n", rule_count, failures.len())
            }
            OutputFormat::Human => {
                let mut output = String::new();
                for (rule, error) in failures {
                    output.push_str(&format!(
                        "{}  {}: {}\n",
                        self.colorize("✗ INVALID", "31"),
                        rule,
                        error
                    ));
                }
                if self.verbosity >= VerbosityLevel::Normal {
                    output.push_str(&format!(
                        "{} of {} rules materialize\n",
                        rule_count - failures.len().min(rule_count),
                        rule_count
                    ));
                }
                output
            }
        }
    }

    pub fn format_history(&self, entries: &[HistoryEntry]) -> String {
        match self.format {
            OutputFormat::Json => to_json(entries),
            OutputFormat::Summary => {
                let passing = entries.iter().filter(|e| e.job.last_result).count();
                format!(
                    "{} jobs, {} passing, {} failing\n",
                    entries.len(),
                    passing,
                    entries.len() - passing
                )
            }
            OutputFormat::Human => {
                let mut output = String::new();
                for entry in entries {
                    let url = if entry.job.url.is_empty() {
                        "(unresolved)"
                    } else {
                        entry.job.url.as_str()
                    };
                    output.push_str(&format!(
                        "{}  [{}] {}",
                        self.verdict(entry.job.last_result),
                        entry.job.validation_set,
                        url
                    ));
                    if let Some(at) = entry.reported_at {
                        output.push_str(&format!(" ({})", at.format("%Y-%m-%d %H:%M:%S")));
                    }
                    output.push('\n');
                    if self.verbosity >= VerbosityLevel::Verbose || !entry.job.last_result {
                        for item in &entry.items {
                            output.push_str(&format!("    {}\n", item));
                        }
                    }
                }
                output
            }
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{:.0}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}
