//! Recipe loading: turns an experiment config into per-station task queues.
//!
//! The loader resolves reagent labels to source ids, numbers each task
//! within its station, and rejects recipes that could never run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{ActuatorConfig, ExperimentConfig, SourceConfig};
use crate::types::{Position, SourceId, StationId, Task};

/// Errors found while building a recipe.
#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("failed to read recipe: {0}")]
    Read(String),

    #[error("recipe has no stations")]
    NoStations,

    #[error("duplicate station id: {0}")]
    DuplicateStation(StationId),

    #[error("duplicate source id: {0}")]
    DuplicateSource(SourceId),

    #[error("invalid source {source_id}: {reason}")]
    InvalidSource { source_id: SourceId, reason: String },

    #[error("station {station} task {seq}: no source or reagent given")]
    MissingSource { station: StationId, seq: usize },

    #[error("station {station} task {seq}: unknown source {source_id}")]
    UnknownSource {
        station: StationId,
        seq: usize,
        source_id: SourceId,
    },

    #[error("station {station} task {seq}: no source holds reagent {reagent:?}")]
    UnknownReagent {
        station: StationId,
        seq: usize,
        reagent: String,
    },

    #[error("station {station} task {seq}: reagent {reagent:?} is held by several sources")]
    AmbiguousReagent {
        station: StationId,
        seq: usize,
        reagent: String,
    },

    #[error("station {station} task {seq}: invalid amount {amount}")]
    InvalidAmount {
        station: StationId,
        seq: usize,
        amount: f64,
    },

    #[error("station {0}: position is not finite")]
    InvalidPosition(StationId),

    #[error("actuator speed must be a positive finite number, got {0}")]
    InvalidSpeed(f64),
}

pub type RecipeResult<T> = Result<T, RecipeError>;

/// Supplies the stations with their pre-populated task queues and the
/// initial resource pool.
pub trait RecipeLoader {
    fn load(&self) -> RecipeResult<Recipe>;
}

/// A validated recipe, ready to be turned into stations and sources.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub stations: Vec<StationRecipe>,
    pub sources: Vec<SourceConfig>,
}

/// A station and its ordered task list.
#[derive(Debug, Clone)]
pub struct StationRecipe {
    pub id: StationId,
    pub position: Position,
    pub tasks: Vec<Task>,
}

impl Recipe {
    /// Build and validate a recipe from a parsed experiment config.
    pub fn from_config(config: &ExperimentConfig) -> RecipeResult<Self> {
        if config.stations.is_empty() {
            return Err(RecipeError::NoStations);
        }
        validate_actuator(&config.actuator)?;

        let mut source_ids = BTreeSet::new();
        for source in &config.sources {
            if !source_ids.insert(source.id.clone()) {
                return Err(RecipeError::DuplicateSource(source.id.clone()));
            }
            validate_source(source)?;
        }

        let mut station_ids = BTreeSet::new();
        let mut stations = Vec::with_capacity(config.stations.len());
        for station in &config.stations {
            if !station_ids.insert(station.id.clone()) {
                return Err(RecipeError::DuplicateStation(station.id.clone()));
            }
            if !station.position.is_finite() {
                return Err(RecipeError::InvalidPosition(station.id.clone()));
            }

            let mut tasks = Vec::with_capacity(station.tasks.len());
            for (seq, step) in station.tasks.iter().enumerate() {
                if !step.amount.is_finite() || step.amount < 0.0 {
                    return Err(RecipeError::InvalidAmount {
                        station: station.id.clone(),
                        seq,
                        amount: step.amount,
                    });
                }
                let source_id = resolve_source(
                    &config.sources,
                    &station.id,
                    seq,
                    step.source.as_ref(),
                    step.reagent.as_deref(),
                )?;
                tasks.push(Task {
                    station_id: station.id.clone(),
                    source_id,
                    amount: step.amount,
                    phases: step.phases.clone(),
                    seq,
                    attempts: 0,
                });
            }

            stations.push(StationRecipe {
                id: station.id.clone(),
                position: station.position,
                tasks,
            });
        }

        Ok(Recipe {
            stations,
            sources: config.sources.clone(),
        })
    }

    /// Total amount every source must supply over the whole run.
    pub fn demand(&self) -> BTreeMap<SourceId, f64> {
        let mut demand = BTreeMap::new();
        for task in self.stations.iter().flat_map(|s| s.tasks.iter()) {
            *demand.entry(task.source_id.clone()).or_insert(0.0) += task.amount;
        }
        demand
    }

    pub fn task_count(&self) -> usize {
        self.stations.iter().map(|s| s.tasks.len()).sum()
    }
}

impl RecipeLoader for ExperimentConfig {
    fn load(&self) -> RecipeResult<Recipe> {
        Recipe::from_config(self)
    }
}

/// Loads a recipe from an `experiment.toml` on disk.
///
/// The file is read once on open; the parsed experiment stays available
/// for the run settings that travel with the recipe.
pub struct TomlRecipeLoader {
    path: PathBuf,
    config: ExperimentConfig,
}

impl TomlRecipeLoader {
    pub fn open(path: impl Into<PathBuf>) -> RecipeResult<Self> {
        let path = path.into();
        let config = ExperimentConfig::from_file(&path)
            .map_err(|e| RecipeError::Read(format!("{}: {e}", path.display())))?;
        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }
}

impl RecipeLoader for TomlRecipeLoader {
    fn load(&self) -> RecipeResult<Recipe> {
        Recipe::from_config(&self.config)
    }
}

/// Reject motion settings that would make travel times meaningless.
pub fn validate_actuator(actuator: &ActuatorConfig) -> RecipeResult<()> {
    if !actuator.speed.is_finite() || actuator.speed <= 0.0 {
        return Err(RecipeError::InvalidSpeed(actuator.speed));
    }
    Ok(())
}

fn validate_source(source: &SourceConfig) -> RecipeResult<()> {
    let invalid = |reason: &str| RecipeError::InvalidSource {
        source_id: source.id.clone(),
        reason: reason.to_string(),
    };
    if !source.capacity.is_finite() || source.capacity <= 0.0 {
        return Err(invalid("capacity must be positive"));
    }
    if !source.volume.is_finite() || source.volume < 0.0 || source.volume > source.capacity {
        return Err(invalid("volume must be within 0..=capacity"));
    }
    if !source.position.is_finite() || !source.offset.is_finite() {
        return Err(invalid("position and offset must be finite"));
    }
    Ok(())
}

fn resolve_source(
    sources: &[SourceConfig],
    station: &StationId,
    seq: usize,
    source: Option<&SourceId>,
    reagent: Option<&str>,
) -> RecipeResult<SourceId> {
    if let Some(id) = source {
        if sources.iter().any(|s| &s.id == id) {
            return Ok(id.clone());
        }
        return Err(RecipeError::UnknownSource {
            station: station.clone(),
            seq,
            source_id: id.clone(),
        });
    }

    let Some(reagent) = reagent else {
        return Err(RecipeError::MissingSource {
            station: station.clone(),
            seq,
        });
    };

    let mut holders = sources
        .iter()
        .filter(|s| s.reagent.as_deref() == Some(reagent));
    match (holders.next(), holders.next()) {
        (Some(only), None) => Ok(only.id.clone()),
        (None, _) => Err(RecipeError::UnknownReagent {
            station: station.clone(),
            seq,
            reagent: reagent.to_string(),
        }),
        (Some(_), Some(_)) => Err(RecipeError::AmbiguousReagent {
            station: station.clone(),
            seq,
            reagent: reagent.to_string(),
        }),
    }
}
