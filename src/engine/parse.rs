//! Engine output stream parsing
//!
//! Workers and the assembly step report progress as plain text lines on
//! stdout/stderr. This module classifies those lines; the supervisor only
//! ever sees the typed [`EngineLine`] values, so swapping in an engine with
//! a different output format means implementing [`ProgressParser`] once and
//! touching nothing else.

use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::LazyLock;

static PROGRESS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // Matches: "45%: 123/500" or "45.2%: 123/500", decoration around it allowed
    Regex::new(r"(\d+(?:\.\d+)?)%:\s*(\d+)/(\d+)").expect("Invalid progress regex")
});

static RECOVERED_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)recovering missing sentence\s+(\d+)").expect("Invalid recovery regex")
});

/// One classified line of engine output
#[derive(Debug, Clone, PartialEq)]
pub enum EngineLine {
    /// Synthesis progress within the worker's own assignment
    Progress { current: u64, total: u64 },

    /// Resume marker: this unit was actually synthesized, not skipped
    Recovered { unit: usize },

    /// The assembly step entered a new sub-phase
    Phase(AssemblyPhase),

    /// The assembly step reported its product path
    OutputPath(PathBuf),

    /// Model chatter, warnings, anything we do not interpret
    Other,
}

/// Ordered sub-phases of the assembly step
///
/// Each sub-phase owns a band of the overall assembly percentage, so a
/// sub-phase transition alone moves the displayed progress even when the
/// tool reports nothing finer-grained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyPhase {
    /// Concatenating per-sentence audio
    Combining,

    /// Writing the subtitle track
    Subtitles,

    /// Encoding the audiobook container
    Encoding,

    /// Applying chapters and metadata
    Finalizing,
}

impl AssemblyPhase {
    /// Band of the overall assembly percentage this sub-phase occupies
    pub fn band(&self) -> (u8, u8) {
        match self {
            AssemblyPhase::Combining => (0, 60),
            AssemblyPhase::Subtitles => (60, 70),
            AssemblyPhase::Encoding => (70, 95),
            AssemblyPhase::Finalizing => (95, 100),
        }
    }

    /// Short human label for progress display
    pub fn label(&self) -> &'static str {
        match self {
            AssemblyPhase::Combining => "combining audio",
            AssemblyPhase::Subtitles => "generating subtitles",
            AssemblyPhase::Encoding => "encoding audiobook",
            AssemblyPhase::Finalizing => "writing metadata",
        }
    }
}

/// Parser for one engine's line format
pub trait ProgressParser: Send + Sync {
    /// Classify a single output line
    fn parse(&self, line: &str) -> EngineLine;
}

/// Parser for the stock engine's output format
#[derive(Debug, Default, Clone, Copy)]
pub struct StockEngineParser;

impl ProgressParser for StockEngineParser {
    fn parse(&self, line: &str) -> EngineLine {
        // Progress lines are by far the most frequent, check them first
        if let Some(caps) = PROGRESS_REGEX.captures(line) {
            let current = caps[2].parse::<u64>().unwrap_or(0);
            let total = caps[3].parse::<u64>().unwrap_or(0);
            if total > 0 {
                return EngineLine::Progress {
                    current: current.min(total),
                    total,
                };
            }
        }

        if let Some(caps) = RECOVERED_REGEX.captures(line) {
            if let Ok(unit) = caps[1].parse::<usize>() {
                return EngineLine::Recovered { unit };
            }
        }

        if let Some(rest) = line.trim_start().strip_prefix("Output:") {
            let path = rest.trim();
            if !path.is_empty() {
                return EngineLine::OutputPath(PathBuf::from(path));
            }
        }

        let lower = line.to_ascii_lowercase();
        if lower.contains("combining audio") {
            return EngineLine::Phase(AssemblyPhase::Combining);
        }
        if lower.contains("subtitle") {
            return EngineLine::Phase(AssemblyPhase::Subtitles);
        }
        if lower.contains("encoding") {
            return EngineLine::Phase(AssemblyPhase::Encoding);
        }
        if lower.contains("writing metadata") || lower.contains("finalizing") {
            return EngineLine::Phase(AssemblyPhase::Finalizing);
        }

        EngineLine::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> EngineLine {
        StockEngineParser.parse(line)
    }

    #[test]
    fn test_plain_progress_line() {
        assert_eq!(
            parse("45%: 123/500"),
            EngineLine::Progress {
                current: 123,
                total: 500
            }
        );
    }

    #[test]
    fn test_decorated_progress_line() {
        // Engines wrap the core format in timestamps and bar characters
        assert_eq!(
            parse("[12:01:33] |####----| 45.6%: 12/26 sentences"),
            EngineLine::Progress {
                current: 12,
                total: 26
            }
        );
    }

    #[test]
    fn test_progress_clamped_to_total() {
        assert_eq!(
            parse("100%: 27/26"),
            EngineLine::Progress {
                current: 26,
                total: 26
            }
        );
    }

    #[test]
    fn test_zero_total_is_not_progress() {
        assert_eq!(parse("0%: 0/0"), EngineLine::Other);
    }

    #[test]
    fn test_recovery_marker() {
        assert_eq!(
            parse("recovering missing sentence 42"),
            EngineLine::Recovered { unit: 42 }
        );
        assert_eq!(
            parse("INFO Recovering missing sentence 7 of 300"),
            EngineLine::Recovered { unit: 7 }
        );
    }

    #[test]
    fn test_output_path() {
        assert_eq!(
            parse("Output: /tmp/out/book.m4b"),
            EngineLine::OutputPath(PathBuf::from("/tmp/out/book.m4b"))
        );
        assert_eq!(parse("Output:"), EngineLine::Other);
    }

    #[test]
    fn test_assembly_phases() {
        assert_eq!(
            parse("Combining audio files..."),
            EngineLine::Phase(AssemblyPhase::Combining)
        );
        assert_eq!(
            parse("Generating subtitles"),
            EngineLine::Phase(AssemblyPhase::Subtitles)
        );
        assert_eq!(
            parse("Encoding audiobook (aac)"),
            EngineLine::Phase(AssemblyPhase::Encoding)
        );
        assert_eq!(
            parse("Writing metadata and chapters"),
            EngineLine::Phase(AssemblyPhase::Finalizing)
        );
    }

    #[test]
    fn test_phase_bands_are_contiguous() {
        let phases = [
            AssemblyPhase::Combining,
            AssemblyPhase::Subtitles,
            AssemblyPhase::Encoding,
            AssemblyPhase::Finalizing,
        ];
        let mut prev_end = 0;
        for phase in phases {
            let (start, end) = phase.band();
            assert_eq!(start, prev_end);
            assert!(end > start);
            prev_end = end;
        }
        assert_eq!(prev_end, 100);
    }

    #[test]
    fn test_chatter_is_other() {
        assert_eq!(parse("Loading model weights"), EngineLine::Other);
        assert_eq!(parse(""), EngineLine::Other);
    }
}
