pub mod config;
pub mod driver;
pub mod duration;
pub mod recipe;
pub mod types;

pub use config::{
    ActuatorConfig, ExperimentConfig, ExperimentMeta, FailurePolicy, PolicyKind, RunConfig,
    SourceConfig, StationConfig, TaskConfig,
};
pub use driver::{DriverError, DriverFuture, DriverResult};
pub use duration::{format_duration, format_elapsed, parse_duration};
pub use recipe::{
    Recipe, RecipeError, RecipeLoader, RecipeResult, StationRecipe, TomlRecipeLoader, validate_actuator,
};
pub use types::*;
