//! Activity timeline of a run: actuator operations, dispatches, skips and
//! station processes, as millisecond offsets from the run start.

use std::path::Path;

use gantry_actuator::OpRecord;
use gantry_core::StationId;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Which resource an event occupied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "lane", content = "id", rename_all = "snake_case")]
pub enum Lane {
    Actuator,
    Station(StationId),
    /// Bookkeeping with no physical duration (dispatch, skip, phase changes).
    Run,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    #[serde(flatten)]
    pub lane: Lane,
    pub label: String,
    pub start_ms: u64,
    pub end_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station: Option<StationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TimelineEvent {
    fn overlaps(&self, other: &TimelineEvent) -> bool {
        self.start_ms < other.end_ms && other.start_ms < self.end_ms
    }
}

#[derive(Debug, Clone)]
pub struct Timeline {
    origin: Instant,
    events: Vec<TimelineEvent>,
}

impl Timeline {
    pub fn new(origin: Instant) -> Self {
        Self {
            origin,
            events: Vec::new(),
        }
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// Milliseconds from the run start to `at`.
    pub fn offset_ms(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.origin).as_millis() as u64
    }

    pub fn span(&mut self, lane: Lane, label: &str, start: Instant, end: Instant) -> &mut TimelineEvent {
        let event = TimelineEvent {
            lane,
            label: label.to_string(),
            start_ms: self.offset_ms(start),
            end_ms: self.offset_ms(end),
            station: None,
            task: None,
            detail: None,
        };
        self.events.push(event);
        let last = self.events.len() - 1;
        &mut self.events[last]
    }

    /// An instantaneous run-level event at `at`.
    pub fn mark(&mut self, label: &str, at: Instant) -> &mut TimelineEvent {
        self.span(Lane::Run, label, at, at)
    }

    /// Copy the actuator's operation history into the actuator lane.
    pub fn absorb_actuator(&mut self, history: &[OpRecord]) {
        for op in history {
            self.span(Lane::Actuator, op.kind.as_str(), op.start, op.end);
        }
    }

    /// Events sorted by start offset, stable for equal starts.
    pub fn events(&self) -> Vec<TimelineEvent> {
        let mut events = self.events.clone();
        events.sort_by_key(|e| e.start_ms);
        events
    }

    pub fn lane(&self, lane: &Lane) -> Vec<TimelineEvent> {
        self.events()
            .into_iter()
            .filter(|e| &e.lane == lane)
            .collect()
    }

    /// First pair of overlapping actuator intervals, if any.
    pub fn actuator_overlap(&self) -> Option<(TimelineEvent, TimelineEvent)> {
        let ops = self.lane(&Lane::Actuator);
        ops.windows(2)
            .find(|pair| pair[0].overlaps(&pair[1]))
            .map(|pair| (pair[0].clone(), pair[1].clone()))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.events())
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_actuator::OpKind;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn offsets_are_relative_to_origin() {
        let origin = Instant::now();
        let mut timeline = Timeline::new(origin);
        tokio::time::advance(Duration::from_millis(1500)).await;
        let event = timeline.mark("dispatch", Instant::now());
        event.station = Some("A".into());
        event.task = Some(0);

        let events = timeline.events();
        assert_eq!(events[0].start_ms, 1500);
        assert_eq!(events[0].end_ms, 1500);
        assert_eq!(events[0].station, Some(StationId::new("A")));
    }

    #[tokio::test(start_paused = true)]
    async fn detects_actuator_overlap() {
        let t0 = Instant::now();
        let at = |ms| t0 + Duration::from_millis(ms);
        let mut timeline = Timeline::new(t0);
        timeline.absorb_actuator(&[
            OpRecord {
                kind: OpKind::Align,
                start: at(0),
                end: at(1000),
            },
            OpRecord {
                kind: OpKind::Transfer,
                start: at(1000),
                end: at(1200),
            },
        ]);
        assert!(timeline.actuator_overlap().is_none());

        timeline.span(Lane::Actuator, "align", at(1100), at(1300));
        let (a, b) = timeline.actuator_overlap().unwrap();
        assert_eq!((a.label.as_str(), b.label.as_str()), ("transfer", "align"));
    }

    #[tokio::test(start_paused = true)]
    async fn station_lanes_are_separate() {
        let t0 = Instant::now();
        let mut timeline = Timeline::new(t0);
        timeline.span(Lane::Station("A".into()), "process", t0, t0 + Duration::from_secs(5));
        timeline.span(Lane::Station("B".into()), "process", t0, t0 + Duration::from_secs(3));
        assert_eq!(timeline.lane(&Lane::Station("B".into())).len(), 1);
        assert!(timeline.actuator_overlap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn json_export_is_tagged() {
        let t0 = Instant::now();
        let mut timeline = Timeline::new(t0);
        timeline.span(Lane::Station("A".into()), "process", t0, t0 + Duration::from_secs(2));
        let json: serde_json::Value = serde_json::from_str(&timeline.to_json().unwrap()).unwrap();
        assert_eq!(json[0]["lane"], "station");
        assert_eq!(json[0]["id"], "A");
        assert_eq!(json[0]["end_ms"], 2000);
        assert!(json[0].get("detail").is_none());
    }
}
