//! End-of-run summary: outcome, per-station results, final resource levels.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::time::Duration;

use gantry_core::{SourceId, StationId, format_elapsed};
use gantry_scheduler::SkipReason;
use gantry_station::StationState;
use serde::{Deserialize, Serialize};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every station drained its queue.
    Completed,
    /// The experiment timeout fired.
    TimedOut,
    /// An operator asked for a graceful stop.
    Stopped,
    /// An operator forced the stop; processes and actuator were halted.
    ForceStopped,
    /// A fatal driver error ended the run.
    Aborted { reason: String },
    /// Preparation failed before any motion.
    SetupFailed { reason: String },
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::TimedOut => "timed_out",
            RunOutcome::Stopped => "stopped",
            RunOutcome::ForceStopped => "force_stopped",
            RunOutcome::Aborted { .. } => "aborted",
            RunOutcome::SetupFailed { .. } => "setup_failed",
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::SetupFailed { .. } => 1,
            RunOutcome::TimedOut => 2,
            RunOutcome::Stopped | RunOutcome::ForceStopped | RunOutcome::Aborted { .. } => 3,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Aborted { reason } | RunOutcome::SetupFailed { reason } => {
                write!(f, "{} ({reason})", self.as_str())
            }
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedTask {
    pub seq: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub seq: usize,
    pub attempt: u32,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSummary {
    pub id: StationId,
    pub state: StationState,
    /// Task sequence numbers in dispatch order.
    pub dispatched: Vec<usize>,
    pub skipped: Vec<SkippedTask>,
    pub failures: Vec<FailedAttempt>,
    /// Tasks still queued when the run ended.
    pub remaining: usize,
    pub busy_ms: u64,
    /// Offset from the run start at which the station completed.
    pub completed_ms: Option<u64>,
}

impl StationSummary {
    pub fn new(id: StationId) -> Self {
        Self {
            id,
            state: StationState::Idle,
            dispatched: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
            remaining: 0,
            busy_ms: 0,
            completed_ms: None,
        }
    }
}

/// One dispatch, in run order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub station: StationId,
    pub seq: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub experiment: String,
    pub policy: String,
    pub outcome: RunOutcome,
    pub elapsed_ms: u64,
    pub stations: Vec<StationSummary>,
    pub dispatch_order: Vec<DispatchRecord>,
    /// Source volumes at teardown.
    pub resources: BTreeMap<SourceId, f64>,
}

impl RunSummary {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }

    pub fn station(&self, id: &str) -> Option<&StationSummary> {
        self.stations.iter().find(|s| s.id.as_str() == id)
    }

    /// Human-readable report printed by `gantry run`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "run {} ({}) policy={}",
            self.run_id, self.experiment, self.policy
        );
        let _ = writeln!(
            out,
            "outcome: {}, elapsed {}",
            self.outcome,
            format_elapsed(self.elapsed())
        );
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{:<12} {:<9} {:<16} {:>7} {:>9} {:>10}",
            "STATION", "STATE", "DISPATCHED", "SKIPPED", "BUSY", "DONE AT"
        );
        for station in &self.stations {
            let dispatched = if station.dispatched.is_empty() {
                "-".to_string()
            } else {
                station
                    .dispatched
                    .iter()
                    .map(|seq| seq.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            };
            let done = station
                .completed_ms
                .map(|ms| format!("+{:.1}s", ms as f64 / 1000.0))
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "{:<12} {:<9} {:<16} {:>7} {:>8.1}s {:>10}",
                station.id.as_str(),
                station.state.as_str(),
                dispatched,
                station.skipped.len(),
                station.busy_ms as f64 / 1000.0,
                done
            );
        }

        let skipped: Vec<_> = self
            .stations
            .iter()
            .flat_map(|s| s.skipped.iter().map(move |k| (&s.id, k)))
            .collect();
        if !skipped.is_empty() {
            let _ = writeln!(out, "\nskipped:");
            for (station, skip) in skipped {
                let _ = writeln!(out, "  {station} task {}: {}", skip.seq, skip.reason);
            }
        }

        let failures: Vec<_> = self
            .stations
            .iter()
            .flat_map(|s| s.failures.iter().map(move |f| (&s.id, f)))
            .collect();
        if !failures.is_empty() {
            let _ = writeln!(out, "\nfailures:");
            for (station, failure) in failures {
                let _ = writeln!(
                    out,
                    "  {station} task {} attempt {}: {}",
                    failure.seq,
                    failure.attempt + 1,
                    failure.error
                );
            }
        }

        if !self.resources.is_empty() {
            let _ = writeln!(out, "\nsources:");
            for (id, volume) in &self.resources {
                let _ = writeln!(out, "  {:<10} {volume:>10.2}", id.as_str());
            }
        }
        out
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(outcome: RunOutcome) -> RunSummary {
        let mut a = StationSummary::new("A".into());
        a.state = StationState::Complete;
        a.dispatched = vec![0, 1];
        a.busy_ms = 8000;
        a.completed_ms = Some(9500);

        let mut b = StationSummary::new("B".into());
        b.state = StationState::Complete;
        b.dispatched = vec![0];
        b.skipped.push(SkippedTask {
            seq: 1,
            reason: SkipReason::InsufficientResource {
                source: "s0".into(),
                requested: 30.0,
                available: 10.0,
            },
        });

        RunSummary {
            run_id: "run-1".into(),
            experiment: "paraspin".into(),
            policy: "preemptive".into(),
            outcome,
            elapsed_ms: 3_725_000,
            stations: vec![a, b],
            dispatch_order: vec![
                DispatchRecord {
                    station: "A".into(),
                    seq: 0,
                },
                DispatchRecord {
                    station: "B".into(),
                    seq: 0,
                },
            ],
            resources: BTreeMap::from([(SourceId::new("s0"), 10.0)]),
        }
    }

    #[test]
    fn exit_codes() {
        assert_eq!(RunOutcome::Completed.exit_code(), 0);
        assert_eq!(
            RunOutcome::SetupFailed {
                reason: "x".into()
            }
            .exit_code(),
            1
        );
        assert_eq!(RunOutcome::TimedOut.exit_code(), 2);
        assert_eq!(RunOutcome::Stopped.exit_code(), 3);
        assert_eq!(RunOutcome::ForceStopped.exit_code(), 3);
        assert_eq!(
            RunOutcome::Aborted {
                reason: "x".into()
            }
            .exit_code(),
            3
        );
    }

    #[test]
    fn render_lists_stations_and_skips() {
        let text = summary(RunOutcome::Completed).render();
        assert!(text.contains("outcome: completed, elapsed 01h 02m 05s"));
        assert!(text.contains("0,1"));
        assert!(text.contains("+9.5s"));
        assert!(text.contains("B task 1: source s0 holds 10, task needs 30"));
        assert!(text.contains("s0"));
        assert!(!text.contains("failures:"));
    }

    #[test]
    fn outcome_serializes_tagged() {
        let json = serde_json::to_value(RunOutcome::Aborted {
            reason: "COM8 gone".into(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "aborted");
        assert_eq!(json["reason"], "COM8 gone");

        let back: RunSummary =
            serde_json::from_str(&serde_json::to_string(&summary(RunOutcome::TimedOut)).unwrap())
                .unwrap();
        assert_eq!(back.outcome, RunOutcome::TimedOut);
        assert_eq!(back.station("B").unwrap().skipped.len(), 1);
    }
}
