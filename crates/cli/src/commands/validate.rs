//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{ExperimentBlueprint, SinkType};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;
use crate::commands::load_blueprint;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    label: String,
    listen_addr: String,
    num_runs: u32,
    channel_count: usize,
    window_ms: f64,
    sink_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    match load_blueprint(Some(&args.config)) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    label: blueprint.experiment.label.clone(),
                    listen_addr: blueprint.host.listen_addr.clone(),
                    num_runs: blueprint.runs.num_runs,
                    channel_count: blueprint.node.channels.len(),
                    window_ms: blueprint.alignment.window_ms,
                    sink_count: blueprint.sinks.len(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &ExperimentBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if !blueprint.sinks.iter().any(|s| s.sink_type == SinkType::Csv) {
        warnings.push("No CSV sink configured - aligned records will not be saved".to_string());
    }

    let window = blueprint.alignment.window_ms;
    if !(300.0..=500.0).contains(&window) {
        warnings.push(format!(
            "alignment.window_ms = {window} is outside the usual 300-500 ms range"
        ));
    }

    if blueprint.imaging.sample_interval_s * 1000.0 > window {
        warnings.push(
            "imaging.sample_interval_s is longer than the alignment window - many samples will go unmatched"
                .to_string(),
        );
    }

    let (volts, current, load) = (
        blueprint.experiment.volts,
        blueprint.experiment.current,
        blueprint.experiment.load_g,
    );
    if volts.is_none() || current.is_none() || load.is_none() {
        warnings.push(format!(
            "Characterization parameters incomplete - output files use the label '{}'",
            blueprint.experiment.label
        ));
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Label: {}", summary.label);
            println!("  Listen: {}", summary.listen_addr);
            println!("  Runs: {}", summary.num_runs);
            println!("  Channels: {}", summary.channel_count);
            println!("  Window: {} ms", summary.window_ms);
            println!("  Sinks: {}", summary.sink_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
