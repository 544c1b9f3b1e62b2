//! `info` command implementation.

use anyhow::{Context, Result};
use config_loader::{ConfigFormat, ConfigLoader};
use contracts::{ActuationParams, ExperimentBlueprint};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::commands::load_blueprint;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    experiment: ExperimentInfo,
    node: NodeInfo,
    runs: RunInfo,
    alignment: AlignmentInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sinks: Vec<SinkInfo>,
}

#[derive(Serialize)]
struct ExperimentInfo {
    label: String,
    file_prefix: String,
    output_dir: String,
    listen_addr: String,
    stop_file: String,
}

#[derive(Serialize)]
struct NodeInfo {
    channels: Vec<u8>,
    tc_type: String,
    send_interval_s: f64,
    actuation: String,
}

#[derive(Serialize)]
struct RunInfo {
    num_runs: u32,
    run_time_s: f64,
    lead_time_s: f64,
    inter_run_delay_s: f64,
}

#[derive(Serialize)]
struct AlignmentInfo {
    window_ms: f64,
    buffer_capacity: usize,
    retention_s: f64,
    imaging_source: String,
    sample_interval_s: f64,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = ?args.config, "Loading configuration info");

    let blueprint = load_blueprint(args.config.as_deref())?;

    if args.toml {
        let toml = ConfigLoader::to_string(&blueprint, ConfigFormat::Toml)
            .context("Failed to serialize configuration")?;
        println!("{}", toml);
    } else if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn describe_actuation(actuation: &ActuationParams) -> String {
    match actuation {
        ActuationParams::Pulse { pulse_duration } => format!("pulse {pulse_duration} s"),
        ActuationParams::TargetTemperature {
            target_temp_c,
            max_heat_time,
        } => format!("heat to {target_temp_c} °C (max {max_heat_time} s)"),
    }
}

fn build_config_info(blueprint: &ExperimentBlueprint, args: &InfoArgs) -> ConfigInfo {
    let sinks = if args.sinks {
        blueprint
            .sinks
            .iter()
            .map(|s| SinkInfo {
                name: s.name.clone(),
                sink_type: format!("{:?}", s.sink_type),
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        experiment: ExperimentInfo {
            label: blueprint.experiment.label.clone(),
            file_prefix: blueprint.experiment.file_prefix(),
            output_dir: blueprint.experiment.output_dir.display().to_string(),
            listen_addr: blueprint.host.listen_addr.clone(),
            stop_file: blueprint.experiment.stop_file.display().to_string(),
        },
        node: NodeInfo {
            channels: blueprint.node.channels.clone(),
            tc_type: blueprint.node.tc_type.clone(),
            send_interval_s: blueprint.node.send_interval_s,
            actuation: describe_actuation(&blueprint.node.actuation),
        },
        runs: RunInfo {
            num_runs: blueprint.runs.num_runs,
            run_time_s: blueprint.runs.run_time_s,
            lead_time_s: blueprint.runs.lead_time_s,
            inter_run_delay_s: blueprint.runs.inter_run_delay_s,
        },
        alignment: AlignmentInfo {
            window_ms: blueprint.alignment.window_ms,
            buffer_capacity: blueprint.alignment.buffer_capacity,
            retention_s: blueprint.alignment.retention_s,
            imaging_source: format!("{:?}", blueprint.imaging.source),
            sample_interval_s: blueprint.imaging.sample_interval_s,
        },
        sinks,
    }
}

fn print_config_info(blueprint: &ExperimentBlueprint, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                 Sync Host Configuration                      ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let experiment = &blueprint.experiment;
    println!("🧪 Experiment");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Label: {}", experiment.label);
    println!(
        "   ├─ Output: {}/{}",
        experiment.output_dir.display(),
        experiment.run_file_name(1)
    );
    println!("   ├─ Listen: {}", blueprint.host.listen_addr);
    println!("   └─ Stop file: {}", experiment.stop_file.display());

    let node = &blueprint.node;
    println!("\n🌡  Node");
    println!("   ├─ Channels: {:?} (type {})", node.channels, node.tc_type);
    println!("   ├─ Send interval: {} s", node.send_interval_s);
    println!("   └─ Actuation: {}", describe_actuation(&node.actuation));

    let runs = &blueprint.runs;
    println!("\n🔁 Runs");
    println!("   ├─ Count: {}", runs.num_runs);
    println!("   ├─ Run time: {} s", runs.run_time_s);
    println!("   ├─ Lead-in: {} s", runs.lead_time_s);
    println!("   └─ Inter-run delay: {} s", runs.inter_run_delay_s);

    let handshake = &blueprint.handshake;
    println!("\n🤝 Handshake");
    println!("   ├─ Ready timeout: {} s", handshake.ready_timeout_s);
    println!(
        "   ├─ Sync: {} s, {} attempts",
        handshake.sync_timeout_s, handshake.max_sync_attempts
    );
    println!("   └─ Reset ack timeout: {} s", handshake.reset_ack_timeout_s);

    let alignment = &blueprint.alignment;
    println!("\n⚙️  Alignment");
    println!("   ├─ Window: {} ms", alignment.window_ms);
    println!("   ├─ Buffer capacity: {}", alignment.buffer_capacity);
    println!("   ├─ Retention: {} s", alignment.retention_s);
    println!(
        "   └─ Imaging: {:?} every {} s",
        blueprint.imaging.source, blueprint.imaging.sample_interval_s
    );

    if args.sinks && !blueprint.sinks.is_empty() {
        println!("\n📤 Sinks ({})", blueprint.sinks.len());
        for (i, sink) in blueprint.sinks.iter().enumerate() {
            let is_last = i == blueprint.sinks.len() - 1;
            let prefix = if is_last { "└─" } else { "├─" };
            println!("   {} {} ({:?})", prefix, sink.name, sink.sink_type);
        }
    }

    println!();
}
