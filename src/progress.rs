//! Progress reporting for the conversion CLI
//!
//! Provides real-time progress display using indicatif progress bars.

use crate::convert::aggregate::{AggregatedProgress, ConvertPhase};
use crate::convert::events::ConversionOutcome;
use crate::convert::resume::ResumeCheckResult;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// Maximum missing ranges spelled out by the status report
const MAX_LISTED_RANGES: usize = 8;

/// Progress reporter that displays conversion status
pub struct ProgressReporter {
    /// Progress bar
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("Invalid progress template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Reporter that draws nothing, for quiet mode
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Update the progress display from a snapshot
    pub fn update(&self, progress: &AggregatedProgress) {
        let msg = match progress.phase {
            ConvertPhase::Preparing => "Preparing session (splitting document)".to_string(),
            ConvertPhase::Converting => {
                let eta = progress
                    .eta_secs
                    .map(format_eta)
                    .unwrap_or_else(|| "--:--".to_string());
                format!(
                    "{:.1}% | {}/{} sentences | {:.1}/min | ETA {} | Workers: {}",
                    progress.percent,
                    format_number(progress.completed_units),
                    format_number(progress.total_units),
                    progress.units_per_minute,
                    eta,
                    progress.active_workers,
                )
            }
            ConvertPhase::Assembling => match &progress.assembly {
                Some(a) => format!("{}% | {}", a.percent, a.phase.label()),
                None => "assembling audiobook".to_string(),
            },
            ConvertPhase::Enhancing => "tagging audiobook".to_string(),
            ConvertPhase::Complete => "complete".to_string(),
            ConvertPhase::Error => "failed".to_string(),
        };

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .rev()
                .map(|&b| b as char)
                .collect::<String>()
        })
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Format an ETA in seconds as H:MM:SS or M:SS
fn format_eta(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Print a header at the start of a conversion
pub fn print_header(document: &Path, workers: usize, output_dir: &Path) {
    println!();
    println!(
        "{} {}",
        style("tts-conductor").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Document:").bold(), document.display());
    println!("  {} {}", style("Workers:").bold(), workers);
    println!("  {} {}", style("Output:").bold(), output_dir.display());
    println!();
}

/// Print a summary of the conversion outcome
pub fn print_summary(outcome: &ConversionOutcome) {
    let analytics = &outcome.analytics;

    println!();
    if outcome.success {
        println!("{}", style("Conversion Complete").green().bold());
    } else {
        println!("{}", style("Conversion Failed").red().bold());
    }
    println!("{}", style("─".repeat(50)).dim());

    if let Some(output) = &outcome.output {
        match std::fs::metadata(output) {
            Ok(meta) => println!(
                "  {} {} ({})",
                style("Audiobook:").bold(),
                output.display(),
                format_size(meta.len(), BINARY)
            ),
            Err(_) => println!("  {} {}", style("Audiobook:").bold(), output.display()),
        }
    }

    println!(
        "  {} {}",
        style("Sentences:").bold(),
        format_number(analytics.sentences_converted)
    );
    println!(
        "  {} {:.1}s ({:.1} sentences/min)",
        style("Duration:").bold(),
        analytics.elapsed_secs,
        analytics.sentences_per_minute
    );
    println!("  {} {}", style("Workers:").bold(), analytics.worker_count);
    if analytics.failed_workers > 0 {
        println!(
            "  {} {}",
            style("Failed workers:").yellow().bold(),
            analytics.failed_workers
        );
    }
    if analytics.resumed {
        println!(
            "  {} resumed from an earlier session",
            style("Mode:").bold()
        );
    }
    if let Some(error) = &outcome.error {
        println!("  {} {}", style("Error:").red().bold(), error);
    }
    println!();
}

/// Print the on-disk status of a prior session
pub fn print_resume_status(status: &ResumeCheckResult) {
    println!();
    println!("{}", style("Session Status").cyan().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Session:").bold(), status.session_id);
    println!(
        "  {} {}",
        style("Source:").bold(),
        status.state.source_path.display()
    );
    println!(
        "  {} {}/{} sentences on disk",
        style("Completed:").bold(),
        format_number(status.completed_units as u64),
        format_number(status.total_units as u64)
    );

    if status.is_complete() {
        println!(
            "  {} nothing, ready to assemble",
            style("Remaining:").green().bold()
        );
    } else {
        let mut parts: Vec<String> = status
            .missing_ranges
            .iter()
            .take(MAX_LISTED_RANGES)
            .map(|&(a, b)| {
                if a == b {
                    a.to_string()
                } else {
                    format!("{a}-{b}")
                }
            })
            .collect();
        if status.missing_ranges.len() > MAX_LISTED_RANGES {
            parts.push(format!(
                "+{} more",
                status.missing_ranges.len() - MAX_LISTED_RANGES
            ));
        }
        println!(
            "  {} {} sentences ({})",
            style("Remaining:").yellow().bold(),
            format_number(status.missing.len() as u64),
            parts.join(", ")
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(0), "0:00");
        assert_eq!(format_eta(59), "0:59");
        assert_eq!(format_eta(75), "1:15");
        assert_eq!(format_eta(3600), "1:00:00");
        assert_eq!(format_eta(3725), "1:02:05");
    }
}
