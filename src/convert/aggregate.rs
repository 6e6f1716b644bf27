//! Global progress aggregation and ETA estimation
//!
//! Merges every worker's state into one snapshot per event. The ETA is
//! derived from the observed work rate, never from wall clock alone: a
//! long-horizon rate since the first completed unit, blended with a
//! sliding-window rate that reacts when workers die or rejoin.

use crate::config::EtaTuning;
use crate::convert::worker::{WorkerSnapshot, WorkerState, WorkerStatus};
use crate::engine::parse::AssemblyPhase;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Instant;

/// Phase of a conversion; moves strictly forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvertPhase {
    Preparing,
    Converting,
    Assembling,
    Enhancing,
    Complete,
    Error,
}

impl ConvertPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConvertPhase::Complete | ConvertPhase::Error)
    }

    /// Move to `next` only if it is further along
    pub fn advance(&mut self, next: ConvertPhase) {
        if !self.is_terminal() && next > *self {
            *self = next;
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConvertPhase::Preparing => "preparing",
            ConvertPhase::Converting => "converting",
            ConvertPhase::Assembling => "assembling",
            ConvertPhase::Enhancing => "enhancing",
            ConvertPhase::Complete => "complete",
            ConvertPhase::Error => "error",
        }
    }
}

/// Assembly sub-phase position within its progress band
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AssemblyProgress {
    pub phase: AssemblyPhase,
    pub percent: u8,
}

/// One published progress snapshot
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedProgress {
    pub phase: ConvertPhase,

    /// Sentences in the whole document
    pub total_units: u64,

    /// Sentences done overall, including any resume baseline
    pub completed_units: u64,

    /// Sentences synthesized by this run alone
    pub session_units: u64,

    pub percent: f64,
    pub active_workers: usize,

    /// Estimated seconds to completion, absent until a rate is known
    pub eta_secs: Option<u64>,

    pub units_per_minute: f64,
    pub workers: Vec<WorkerSnapshot>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assembly: Option<AssemblyProgress>,

    pub message: String,
}

impl AggregatedProgress {
    /// Snapshot before anything has happened
    pub fn initial() -> Self {
        Self {
            phase: ConvertPhase::Preparing,
            total_units: 0,
            completed_units: 0,
            session_units: 0,
            percent: 0.0,
            active_workers: 0,
            eta_secs: None,
            units_per_minute: 0.0,
            workers: Vec::new(),
            assembly: None,
            message: "preparing session".into(),
        }
    }
}

/// Accumulates rate samples and produces snapshots
pub struct ProgressTracker {
    total_units: u64,
    baseline: u64,
    resumed: bool,
    tuning: EtaTuning,
    first_unit_at: Option<Instant>,
    samples: VecDeque<(Instant, u64)>,
}

impl ProgressTracker {
    /// Tracker for a fresh run
    pub fn fresh(total_units: u64, tuning: EtaTuning) -> Self {
        Self {
            total_units,
            baseline: 0,
            resumed: false,
            tuning,
            first_unit_at: None,
            samples: VecDeque::new(),
        }
    }

    /// Tracker for a resume run; `baseline` is counted once, here
    pub fn resumed(total_units: u64, baseline: u64, tuning: EtaTuning) -> Self {
        Self {
            total_units,
            baseline,
            resumed: true,
            tuning,
            first_unit_at: None,
            samples: VecDeque::new(),
        }
    }

    pub fn total_units(&self) -> u64 {
        self.total_units
    }

    /// Sentences synthesized by this run alone
    pub fn session_units(&self, workers: &[WorkerState]) -> u64 {
        self.completed(workers).saturating_sub(self.baseline)
    }

    /// Sentences done across the whole document
    ///
    /// Fresh runs sum attempt progress; resume runs add real synthesis
    /// counts on top of the on-disk baseline, so sentences the engine
    /// skips over are never counted twice.
    pub fn completed(&self, workers: &[WorkerState]) -> u64 {
        let done = if self.resumed {
            self.baseline
                + workers
                    .iter()
                    .map(|w| w.actual_conversions)
                    .sum::<u64>()
        } else {
            workers.iter().map(|w| w.completed_units).sum()
        };
        done.min(self.total_units)
    }

    /// Record a sample and build the published snapshot
    pub fn snapshot(
        &mut self,
        phase: ConvertPhase,
        workers: &[WorkerState],
        assembly: Option<AssemblyProgress>,
        now: Instant,
    ) -> AggregatedProgress {
        let completed = self.completed(workers);
        let session_units = completed.saturating_sub(self.baseline);

        if session_units > 0 && self.first_unit_at.is_none() {
            self.first_unit_at = Some(now);
        }

        self.samples.push_back((now, session_units));
        if let Some(cutoff) = now.checked_sub(self.tuning.window) {
            while self.samples.len() > 1 && self.samples[0].0 < cutoff {
                self.samples.pop_front();
            }
        }

        let rate = self.blended_rate(now, session_units);
        let remaining = self.total_units - completed;
        let eta_secs = (rate > 0.0 && remaining > 0)
            .then(|| (remaining as f64 / rate).ceil() as u64);

        let percent = if self.total_units > 0 {
            completed as f64 * 100.0 / self.total_units as f64
        } else {
            100.0
        };

        let active_workers = workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Running)
            .count();

        let units_per_minute = rate * 60.0;
        let message = match phase {
            ConvertPhase::Converting => format!(
                "{completed}/{} sentences | {units_per_minute:.1}/min",
                self.total_units
            ),
            ConvertPhase::Assembling => match assembly {
                Some(a) => a.phase.label().to_string(),
                None => "assembling audiobook".into(),
            },
            other => other.label().to_string(),
        };

        AggregatedProgress {
            phase,
            total_units: self.total_units,
            completed_units: completed,
            session_units,
            percent,
            active_workers,
            eta_secs,
            units_per_minute,
            workers: workers.iter().map(WorkerState::snapshot).collect(),
            assembly,
            message,
        }
    }

    fn blended_rate(&self, now: Instant, session_units: u64) -> f64 {
        let long = match self.first_unit_at {
            Some(first) if now > first => {
                session_units as f64 / now.duration_since(first).as_secs_f64()
            }
            _ => return 0.0,
        };

        if self.samples.len() < self.tuning.min_window_samples {
            return long;
        }

        let (oldest_at, oldest_units) = self.samples[0];
        let span = now.duration_since(oldest_at).as_secs_f64();
        if span <= 0.0 {
            return long;
        }
        let recent = session_units.saturating_sub(oldest_units) as f64 / span;

        self.tuning.long_weight * long + self.tuning.recent_weight * recent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::WorkAssignment;
    use std::time::Duration;

    fn workers_with(completed: &[u64], sizes: &[u64]) -> Vec<WorkerState> {
        completed
            .iter()
            .zip(sizes)
            .enumerate()
            .map(|(id, (&done, &size))| {
                let mut w = WorkerState::new(
                    id,
                    WorkAssignment::Sentences {
                        start: 0,
                        end: size as usize - 1,
                    },
                );
                w.mark_started(1, Instant::now());
                w.record_progress(done, Instant::now());
                w
            })
            .collect()
    }

    #[test]
    fn test_phase_advances_forward_only() {
        let mut phase = ConvertPhase::Preparing;
        phase.advance(ConvertPhase::Converting);
        assert_eq!(phase, ConvertPhase::Converting);
        phase.advance(ConvertPhase::Preparing);
        assert_eq!(phase, ConvertPhase::Converting);
        phase.advance(ConvertPhase::Complete);
        phase.advance(ConvertPhase::Error);
        assert_eq!(phase, ConvertPhase::Complete);
    }

    #[test]
    fn test_fresh_accounting_sums_completed() {
        let workers = workers_with(&[4, 3, 0], &[10, 10, 10]);
        let tracker = ProgressTracker::fresh(30, EtaTuning::default());
        assert_eq!(tracker.completed(&workers), 7);
    }

    #[test]
    fn test_resume_accounting_adds_baseline_once() {
        let mut workers = workers_with(&[0, 0], &[6, 4]);
        let now = Instant::now();
        // Markers drive the counters on resume
        for _ in 0..4 {
            workers[0].record_recovery(now);
        }
        for _ in 0..6 {
            workers[1].record_recovery(now);
        }

        let tracker = ProgressTracker::resumed(100, 90, EtaTuning::default());
        assert_eq!(tracker.completed(&workers), 100);
    }

    #[test]
    fn test_resume_without_markers_reaches_total_on_clean_exit() {
        // Marker-less engine: progress stalls at 3/4, then exits 0
        let mut w = WorkerState::new(
            0,
            WorkAssignment::Explicit {
                indices: vec![6, 7, 8, 9],
            },
        );
        w.mark_started(1, Instant::now());
        w.record_progress(3, Instant::now());
        w.mark_complete();

        let tracker = ProgressTracker::resumed(10, 6, EtaTuning::default());
        assert_eq!(tracker.completed(&[w]), 10);
    }

    #[test]
    fn test_completed_clamped_to_total() {
        let workers = workers_with(&[10, 10], &[10, 10]);
        let tracker = ProgressTracker::fresh(15, EtaTuning::default());
        assert_eq!(tracker.completed(&workers), 15);
    }

    #[test]
    fn test_snapshot_counts_and_percent() {
        let base = Instant::now();
        let workers = workers_with(&[5, 5], &[10, 10]);
        let mut tracker = ProgressTracker::fresh(20, EtaTuning::default());

        let snap = tracker.snapshot(ConvertPhase::Converting, &workers, None, base);
        assert_eq!(snap.completed_units, 10);
        assert_eq!(snap.session_units, 10);
        assert!((snap.percent - 50.0).abs() < 1e-9);
        assert_eq!(snap.active_workers, 2);
        assert_eq!(snap.workers.len(), 2);
        assert!(snap.message.contains("10/20 sentences"));
    }

    #[test]
    fn test_eta_blends_long_and_recent_rates() {
        let tuning = EtaTuning {
            window: Duration::from_secs(15),
            long_weight: 0.7,
            recent_weight: 0.3,
            min_window_samples: 2,
        };
        let mut tracker = ProgressTracker::fresh(100, tuning);
        let t0 = Instant::now();

        // Steady 1/s for 20s after a quiet first sample, then a near-stall
        let sequence = [(0u64, 0u64), (10, 10), (20, 20), (30, 21)];
        let mut last = None;
        for (offset, units) in sequence {
            let workers = workers_with(&[units], &[100]);
            last = Some(tracker.snapshot(
                ConvertPhase::Converting,
                &workers,
                None,
                t0 + Duration::from_secs(offset),
            ));
        }

        // First unit landed at t0+10, so the long rate is 21/20 = 1.05/s.
        // The surviving window covers t0+20..t0+30: (21-20)/10 = 0.1/s.
        // Blended: 0.7*1.05 + 0.3*0.1 = 0.765/s; 79 left -> ceil(103.3).
        let snap = last.unwrap();
        assert_eq!(snap.eta_secs, Some(104));
        assert!((snap.units_per_minute - 45.9).abs() < 0.1);
    }

    #[test]
    fn test_eta_absent_without_progress() {
        let base = Instant::now();
        let workers = workers_with(&[0], &[10]);
        let mut tracker = ProgressTracker::fresh(10, EtaTuning::default());

        let snap = tracker.snapshot(ConvertPhase::Converting, &workers, None, base);
        assert_eq!(snap.eta_secs, None);
        assert_eq!(snap.units_per_minute, 0.0);
    }

    #[test]
    fn test_eta_absent_when_done() {
        let base = Instant::now();
        let workers = workers_with(&[10], &[10]);
        let mut tracker = ProgressTracker::fresh(10, EtaTuning::default());

        tracker.snapshot(ConvertPhase::Converting, &workers, None, base);
        let snap = tracker.snapshot(
            ConvertPhase::Converting,
            &workers,
            None,
            base + Duration::from_secs(5),
        );
        assert_eq!(snap.eta_secs, None);
        assert!((snap.percent - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_assembly_message_uses_phase_label() {
        let base = Instant::now();
        let mut tracker = ProgressTracker::fresh(10, EtaTuning::default());
        let snap = tracker.snapshot(
            ConvertPhase::Assembling,
            &[],
            Some(AssemblyProgress {
                phase: AssemblyPhase::Encoding,
                percent: 80,
            }),
            base,
        );
        assert_eq!(snap.message, "encoding audiobook");
        assert_eq!(snap.assembly.unwrap().percent, 80);
    }
}
