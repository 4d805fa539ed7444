//! Static checks of an experiment, without touching hardware.

use std::collections::BTreeMap;

use gantry_actuator::{MotionProfile, ResourcePool};
use gantry_core::{ExperimentConfig, RecipeLoader, SourceId};

use crate::error::{RunError, RunResult};

/// What `gantry validate` reports for a loadable experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupReport {
    pub stations: usize,
    pub tasks: usize,
    /// Total amount the recipe draws from each source.
    pub demand: BTreeMap<SourceId, f64>,
    pub levels: BTreeMap<SourceId, f64>,
    /// Amount auto-fill would add before the run.
    pub deficits: BTreeMap<SourceId, f64>,
    /// Problems that only fail individual tasks (unreachable positions).
    pub warnings: Vec<String>,
}

/// Run the `Preparing` checks that need no driver: recipe validity,
/// pool construction, aggregate demand, and travel bounds of every
/// alignment target.
pub fn validate_setup(config: &ExperimentConfig) -> RunResult<SetupReport> {
    validate_loaded(config, config)
}

/// [`validate_setup`] for a recipe supplied by a separate loader.
pub fn validate_loaded(config: &ExperimentConfig, loader: &dyn RecipeLoader) -> RunResult<SetupReport> {
    let recipe = loader.load()?;
    let pool = ResourcePool::from_configs(&recipe.sources)
        .map_err(|e| RunError::InvalidRecipe(e.to_string()))?;
    let demand = recipe.demand();
    pool.check_demand(&demand, config.run.auto_fill)
        .map_err(RunError::InsufficientResource)?;
    let deficits = if config.run.auto_fill {
        pool.deficits(&demand).map_err(RunError::InsufficientResource)?
    } else {
        BTreeMap::new()
    };

    let profile = MotionProfile::from_config(&config.actuator);
    let mut warnings = Vec::new();
    if !profile.allows(&config.actuator.rest) {
        warnings.push(format!(
            "rest position {} is outside the travel bounds",
            config.actuator.rest
        ));
    }
    for station in &recipe.stations {
        for task in &station.tasks {
            let Ok(source) = pool.get(&task.source_id) else {
                continue;
            };
            let target = station.position.minus(&source.offset);
            if !profile.allows(&target) {
                warnings.push(format!(
                    "station {} task {}: target {target} is outside the travel bounds",
                    station.id, task.seq
                ));
            }
        }
    }

    Ok(SetupReport {
        stations: recipe.stations.len(),
        tasks: recipe.task_count(),
        demand,
        levels: pool.levels(),
        deficits,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::{Position, TravelBounds};

    const EXPERIMENT: &str = r#"
        [experiment]
        name = "paraspin"

        [actuator]
        speed = 100.0
        rest = [0.0, 0.0, 0.0]
        bounds = { min = [-470.0, 0.0, 0.0], max = [0.0, 0.0, 0.0] }

        [[sources]]
        id = "s0"
        reagent = "PbI2"
        capacity = 100.0
        volume = 60.0
        position = [-10.0, 0.0, 0.0]

        [[stations]]
        id = "A"
        position = [-325.0, 0.0, 0.0]
        tasks = [
            { reagent = "PbI2", amount = 30.0, phases = [{ name = "spin", duration = "5s" }] },
            { source = "s0", amount = 20.0, phases = [{ name = "spin", duration = "3s" }] },
        ]
    "#;

    fn config() -> ExperimentConfig {
        toml::from_str(EXPERIMENT).unwrap()
    }

    #[test]
    fn valid_experiment_reports_demand() {
        let report = validate_setup(&config()).unwrap();
        assert_eq!(report.stations, 1);
        assert_eq!(report.tasks, 2);
        assert_eq!(report.demand[&SourceId::new("s0")], 50.0);
        assert!(report.deficits.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn demand_over_volume_fails_without_auto_fill() {
        let mut config = config();
        config.sources[0].volume = 40.0;
        let err = validate_setup(&config).unwrap_err();
        assert!(matches!(err, RunError::InsufficientResource(_)));

        config.run.auto_fill = true;
        let report = validate_setup(&config).unwrap();
        assert_eq!(report.deficits[&SourceId::new("s0")], 10.0);
    }

    #[test]
    fn unreachable_station_is_a_warning() {
        let mut config = config();
        config.actuator.bounds = Some(TravelBounds {
            min: Position::on_track(-300.0),
            max: Position::ORIGIN,
        });
        let report = validate_setup(&config).unwrap();
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings[0].contains("station A task 0"));
    }
}
