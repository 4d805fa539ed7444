//! Experiment file (`experiment.toml`) parser.
//!
//! One file describes the hardware layout (actuator, sources, stations),
//! the per-station recipes, and the run settings.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::serde_str;
use crate::types::{Phase, Position, SourceId, StationId, TravelBounds};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub experiment: ExperimentMeta,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub stations: Vec<StationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentMeta {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorConfig {
    /// Travel speed in mm/s.
    #[serde(default = "default_speed")]
    pub speed: f64,
    /// Fixed settling time added to every alignment.
    #[serde(default = "default_overhead", with = "serde_str")]
    pub overhead: Duration,
    pub bounds: Option<TravelBounds>,
    /// Parking position between operations and after the run.
    #[serde(default)]
    pub rest: Position,
    /// Where sources are refilled. Falls back to each source's own position.
    pub fill: Option<Position>,
    /// Where sources are emptied during cleanup. Falls back to `rest`.
    pub dump: Option<Position>,
    /// Home the actuator while preparing.
    #[serde(default = "default_true")]
    pub home_on_start: bool,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            overhead: default_overhead(),
            bounds: None,
            rest: Position::ORIGIN,
            fill: None,
            dump: None,
            home_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub policy: PolicyKind,
    /// Overall experiment timeout. No limit when absent.
    #[serde(default, with = "serde_str::option")]
    pub timeout: Option<Duration>,
    #[serde(default = "default_poll_interval", with = "serde_str")]
    pub poll_interval: Duration,
    /// Minimum slack before the earliest busy station frees up for the
    /// actuator to do idle-time housekeeping.
    #[serde(default = "default_lookahead", with = "serde_str")]
    pub lookahead: Duration,
    #[serde(default = "default_drain_timeout", with = "serde_str")]
    pub drain_timeout: Duration,
    /// Added to every local-process ETC (spin-up, lid close, ...).
    #[serde(default, with = "serde_str")]
    pub process_overhead: Duration,
    #[serde(default)]
    pub on_task_failure: FailurePolicy,
    /// Refill sources up to the recipe demand while preparing.
    #[serde(default)]
    pub auto_fill: bool,
    /// Draw-and-return cycles that wet a source's line before each fill.
    #[serde(default)]
    pub prewet_cycles: u32,
    /// Empty every source at the dump position during cleanup.
    #[serde(default)]
    pub empty_on_cleanup: bool,
    /// Empty and then rinse every source at the dump position during cleanup.
    #[serde(default)]
    pub rinse_on_cleanup: bool,
    #[serde(default = "default_rinse_cycles")]
    pub rinse_cycles: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            timeout: None,
            poll_interval: default_poll_interval(),
            lookahead: default_lookahead(),
            drain_timeout: default_drain_timeout(),
            process_overhead: Duration::ZERO,
            on_task_failure: FailurePolicy::default(),
            auto_fill: false,
            prewet_cycles: 0,
            empty_on_cleanup: false,
            rinse_on_cleanup: false,
            rinse_cycles: default_rinse_cycles(),
        }
    }
}

/// Which scheduling policy drives the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    Sequential,
    #[default]
    Scanning,
    Preemptive,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Sequential => "sequential",
            PolicyKind::Scanning => "scanning",
            PolicyKind::Preemptive => "preemptive",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(PolicyKind::Sequential),
            "scanning" => Ok(PolicyKind::Scanning),
            "preemptive" | "preempt" => Ok(PolicyKind::Preemptive),
            other => Err(format!(
                "unknown policy {other:?} (expected sequential, scanning or preemptive)"
            )),
        }
    }
}

/// What happens to a task whose dispatch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log it and move on to the next task of the station.
    #[default]
    Drop,
    /// Append it to the tail of the station queue, at most N times.
    Requeue(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: SourceId,
    pub reagent: Option<String>,
    pub capacity: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub position: Position,
    /// Tool offset of this source's nozzle relative to the actuator head.
    #[serde(default)]
    pub offset: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub id: StationId,
    pub position: Position,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// One recipe step. Names its source by id or by reagent label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub source: Option<SourceId>,
    pub reagent: Option<String>,
    pub amount: f64,
    #[serde(default)]
    pub phases: Vec<Phase>,
}

impl ExperimentConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ExperimentConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn default_speed() -> f64 {
    250.0
}

fn default_overhead() -> Duration {
    Duration::from_secs(2)
}

fn default_rinse_cycles() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_lookahead() -> Duration {
    Duration::from_secs(5)
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(300)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[experiment]
name = "paraspin"

[actuator]
speed = 250.0
overhead = "2s"
rest = [0.0, 0.0, 0.0]
dump = [-20.0, 0.0, 0.0]
bounds = { min = [-470.0, 0.0, 0.0], max = [0.0, 0.0, 0.0] }

[run]
policy = "preemptive"
timeout = "2h"
lookahead = "10s"
on_task_failure = { requeue = 2 }
auto_fill = true
prewet_cycles = 1
rinse_on_cleanup = true

[[sources]]
id = "s0"
reagent = "PVK"
capacity = 3000.0
volume = 1000.0
offset = [-100.0, 0.0, 0.0]

[[stations]]
id = "A"
position = [-325.0, 0.0, 0.0]

[[stations.tasks]]
reagent = "PVK"
amount = 50.0
phases = [
    { name = "soak", duration = "5s" },
    { name = "spin", duration = "30s", speed = 3000.0 },
]
"#;

    #[test]
    fn test_parse_full() {
        let config: ExperimentConfig = toml::from_str(FULL).unwrap();
        assert_eq!(config.experiment.name, "paraspin");
        assert_eq!(config.actuator.overhead, Duration::from_secs(2));
        assert_eq!(config.run.policy, PolicyKind::Preemptive);
        assert_eq!(config.run.timeout, Some(Duration::from_secs(7200)));
        assert_eq!(config.run.lookahead, Duration::from_secs(10));
        assert_eq!(config.run.on_task_failure, FailurePolicy::Requeue(2));
        assert!(config.run.auto_fill);
        assert_eq!(config.run.prewet_cycles, 1);
        assert!(config.run.rinse_on_cleanup);
        assert_eq!(config.run.rinse_cycles, 3);
        assert_eq!(config.sources[0].offset, Position::on_track(-100.0));
        let task = &config.stations[0].tasks[0];
        assert_eq!(task.reagent.as_deref(), Some("PVK"));
        assert_eq!(task.phases[1].speed, Some(3000.0));
        assert!(config.actuator.bounds.unwrap().contains(&Position::on_track(-325.0)));
    }

    #[test]
    fn test_parse_minimal_uses_defaults() {
        let toml_str = r#"
[experiment]
name = "test"
"#;
        let config: ExperimentConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.run.policy, PolicyKind::Scanning);
        assert_eq!(config.run.poll_interval, Duration::from_millis(50));
        assert_eq!(config.run.drain_timeout, Duration::from_secs(300));
        assert_eq!(config.run.on_task_failure, FailurePolicy::Drop);
        assert_eq!(config.run.timeout, None);
        assert_eq!(config.run.prewet_cycles, 0);
        assert!(!config.run.rinse_on_cleanup);
        assert!(config.actuator.home_on_start);
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let toml_str = r#"
[experiment]
name = "test"

[run]
poll_interval = "fast"
"#;
        assert!(toml::from_str::<ExperimentConfig>(toml_str).is_err());
    }

    #[test]
    fn test_toml_roundtrip_keeps_durations() {
        let config: ExperimentConfig = toml::from_str(FULL).unwrap();
        let out = config.to_toml_string().unwrap();
        let back: ExperimentConfig = toml::from_str(&out).unwrap();
        assert_eq!(back.run.timeout, Some(Duration::from_secs(7200)));
        assert_eq!(back.stations[0].tasks[0].phases[0].duration, Duration::from_secs(5));
    }

    #[test]
    fn policy_kind_from_str() {
        assert_eq!("Scanning".parse::<PolicyKind>(), Ok(PolicyKind::Scanning));
        assert_eq!("preempt".parse::<PolicyKind>(), Ok(PolicyKind::Preemptive));
        assert!("fastest".parse::<PolicyKind>().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.toml");
        std::fs::write(&path, FULL).unwrap();
        let config = ExperimentConfig::from_file(&path).unwrap();
        assert_eq!(config.stations.len(), 1);
    }
}
