//! Command implementations.

mod info;
mod run;
mod simulate;
mod validate;

use std::path::Path;

use contracts::ExperimentBlueprint;

use crate::error::{CliError, Result};

pub use info::run_info;
pub use run::run_session;
pub use simulate::run_simulate_node;
pub use validate::run_validate;

/// Load and validate a configuration file, or fall back to defaults
pub(crate) fn load_blueprint(path: Option<&Path>) -> Result<ExperimentBlueprint> {
    let Some(path) = path else {
        tracing::info!("No configuration file given, using defaults");
        return Ok(ExperimentBlueprint::default());
    };
    if !path.exists() {
        return Err(CliError::config_not_found(path.display().to_string()));
    }
    config_loader::ConfigLoader::load_from_path(path)
        .map_err(|e| CliError::config_invalid(format!("{}: {e}", path.display())))
}
