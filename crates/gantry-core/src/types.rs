//! Shared types used across gantry crates.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifier of a station (a spin coater, a curing plate, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(pub String);

/// Identifier of a resource source (a syringe channel, a reservoir, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(StationId);
string_id!(SourceId);

/// A point in actuator coordinates, in millimetres.
///
/// Serialized as a `[x, y, z]` array so recipes stay compact.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const ORIGIN: Position = Position {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// A position on the X track (y = z = 0).
    pub fn on_track(x: f64) -> Self {
        Self::new(x, 0.0, 0.0)
    }

    /// Euclidean distance to another position.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// The actuator coordinate that puts a tool with `offset` over `self`.
    pub fn minus(&self, offset: &Position) -> Position {
        Position::new(self.x - offset.x, self.y - offset.y, self.z - offset.z)
    }

    /// True when both positions are the same point (within 1 nm).
    pub fn coincides_with(&self, other: &Position) -> bool {
        self.distance_to(other) < 1e-6
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f64; 3]> for Position {
    fn from(v: [f64; 3]) -> Self {
        Position::new(v[0], v[1], v[2])
    }
}

impl From<Position> for [f64; 3] {
    fn from(p: Position) -> Self {
        [p.x, p.y, p.z]
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// Axis-aligned box the actuator is allowed to travel in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TravelBounds {
    pub min: Position,
    pub max: Position,
}

impl TravelBounds {
    pub fn contains(&self, p: &Position) -> bool {
        p.is_finite()
            && (self.min.x..=self.max.x).contains(&p.x)
            && (self.min.y..=self.max.y).contains(&p.y)
            && (self.min.z..=self.max.z).contains(&p.z)
    }
}

/// One named timed phase of a station-local process, e.g. soak or spin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    #[serde(with = "crate::duration::serde_str")]
    pub duration: Duration,
    /// Process parameter for the phase (spin speed in rpm, temperature, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

impl Phase {
    pub fn new(name: &str, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            duration,
            speed: None,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }
}

/// One unit of station work: a transfer from a source followed by a
/// timed local process.
///
/// Tasks are immutable once built. A retry produces a new task via
/// [`Task::retried`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub station_id: StationId,
    pub source_id: SourceId,
    /// Resource units to transfer (µL for liquid handlers).
    pub amount: f64,
    pub phases: Vec<Phase>,
    /// Index of the task in its station's recipe, 0-based.
    pub seq: usize,
    /// Dispatch attempts already spent on this task.
    #[serde(default)]
    pub attempts: u32,
}

impl Task {
    /// Sum of all phase durations.
    pub fn local_duration(&self) -> Duration {
        self.phases.iter().map(|p| p.duration).sum()
    }

    /// The same task with one more attempt recorded.
    pub fn retried(&self) -> Task {
        Task {
            attempts: self.attempts + 1,
            ..self.clone()
        }
    }
}
