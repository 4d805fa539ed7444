//! `gantry validate`: recipe and resource checks, no motion.

use std::path::Path;

use anyhow::Result;
use gantry_controller::{SetupReport, validate_loaded};
use gantry_core::TomlRecipeLoader;

pub fn validate(path: &Path) -> Result<i32> {
    let loader = TomlRecipeLoader::open(path)?;
    let config = loader.config();

    match validate_loaded(config, &loader) {
        Ok(report) => {
            print!("{}", render(&config.experiment.name, &report));
            Ok(0)
        }
        Err(err) => {
            eprintln!("{}: {err}", config.experiment.name);
            Ok(1)
        }
    }
}

fn render(name: &str, report: &SetupReport) -> String {
    let mut out = format!(
        "{name}: {} stations, {} tasks\n\n{:<10} {:>10} {:>10} {:>10}\n",
        report.stations, report.tasks, "SOURCE", "DEMAND", "VOLUME", "FILL"
    );
    for (id, volume) in &report.levels {
        let demand = report.demand.get(id).copied().unwrap_or_default();
        let fill = report.deficits.get(id).copied().unwrap_or_default();
        out.push_str(&format!(
            "{:<10} {demand:>10.2} {volume:>10.2} {fill:>10.2}\n",
            id.as_str()
        ));
    }
    if !report.warnings.is_empty() {
        out.push_str("\nwarnings:\n");
        for warning in &report.warnings {
            out.push_str(&format!("  {warning}\n"));
        }
    }
    out
}
