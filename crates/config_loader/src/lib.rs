//! # Config Loader
//!
//! 实验配置加载：TOML (推荐) 或 JSON，解析后立即校验，输出 `ExperimentBlueprint`。
//! 所有字段都有缺省值，因此一个空文件也是合法配置。
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("bench.toml")).unwrap();
//! println!("{} runs of {} s", blueprint.runs.num_runs, blueprint.runs.run_time_s);
//! ```

mod parser;
mod validator;

pub use contracts::ExperimentBlueprint;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a file, picking the format from its extension
    ///
    /// # Errors
    /// Unreadable file, unknown extension, parse failure or a rule violation
    pub fn load_from_path(path: &Path) -> Result<ExperimentBlueprint, ContractError> {
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ConfigFormat::from_extension)
            .ok_or_else(|| {
                ContractError::config_parse(format!(
                    "unsupported config format: {} (expected .toml or .json)",
                    path.display()
                ))
            })?;
        let content =
            std::fs::read_to_string(path).map_err(|e| ContractError::config_read(path, e))?;
        Self::load_from_str(&content, format)
    }

    /// # Errors
    /// Parse failure or a rule violation
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<ExperimentBlueprint, ContractError> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }

    /// Re-check a blueprint after CLI overrides
    ///
    /// # Errors
    /// The first rule the blueprint violates
    pub fn validate(blueprint: &ExperimentBlueprint) -> Result<(), ContractError> {
        validator::validate(blueprint)
    }

    /// Render a blueprint back to config text
    pub fn to_string(
        blueprint: &ExperimentBlueprint,
        format: ConfigFormat,
    ) -> Result<String, ContractError> {
        match format {
            ConfigFormat::Toml => toml::to_string_pretty(blueprint)
                .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}"))),
            ConfigFormat::Json => serde_json::to_string_pretty(blueprint)
                .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}"))),
        }
    }
}
