//! `run` command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use contracts::{ExperimentBlueprint, ImagingSourceType};
use dispatcher::OutputFactory;
use session::{RunOrchestrator, SessionEnd, SessionReport, SessionSettings, StopSignal};
use tokio::net::TcpListener;
use tracing::{info, warn};
use transport::{NodeLink, TokioWallClock};

use crate::cli::RunArgs;
use crate::commands::load_blueprint;
use crate::error::CliError;

/// Execute the `run` command
pub async fn run_session(args: &RunArgs) -> Result<()> {
    let mut blueprint = load_blueprint(args.config.as_deref())?;
    apply_overrides(&mut blueprint, args);
    config_loader::ConfigLoader::validate(&blueprint)
        .map_err(|e| CliError::config_invalid(e.to_string()))?;

    info!(
        listen = %blueprint.host.listen_addr,
        num_runs = blueprint.runs.num_runs,
        run_time_s = blueprint.runs.run_time_s,
        window_ms = blueprint.alignment.window_ms,
        sinks = blueprint.sinks.len(),
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    if args.metrics_port != 0 {
        observability::serve_metrics(args.metrics_port)?;
    }

    let stop = StopSignal::new().with_stop_file(&blueprint.experiment.stop_file);
    spawn_shutdown_listener(stop.clone());

    let addr = blueprint.host.listen_addr.clone();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| CliError::bind(&addr, e.to_string()))?;
    info!(%addr, "Waiting for node to connect");

    let (stream, peer) = tokio::select! {
        accepted = listener.accept() => accepted.context("Failed to accept node connection")?,
        _ = wait_for_stop(&stop) => {
            warn!("Stop requested before a node connected");
            return Ok(());
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        warn!(error = %e, "Could not disable Nagle on node socket");
    }
    info!(%peer, "Node connected");

    let imaging = imaging::build_position_source(&blueprint.imaging)
        .context("Failed to open imaging source")?;
    let outputs = OutputFactory::new(
        blueprint.sinks.clone(),
        blueprint.experiment.clone(),
        &blueprint.node.channels,
    );
    let link = NodeLink::new(stream, peer.to_string());
    let link_metrics = link.metrics();

    let mut orchestrator = RunOrchestrator::new(
        link,
        TokioWallClock::new(),
        imaging,
        outputs,
        stop,
        SessionSettings::from_blueprint(&blueprint),
    );
    let report = orchestrator.run().await.map_err(CliError::from)?;

    let link = link_metrics.snapshot();
    info!(
        frames_in = link.frames_in,
        frames_out = link.frames_out,
        malformed = link.malformed,
        "Link statistics"
    );
    print_report(&report);

    if let SessionEnd::ConnectionLost { message } = &report.end {
        warn!(%message, "Session ended early: connection to node lost");
    }
    info!("Sync host finished");
    Ok(())
}

fn apply_overrides(blueprint: &mut ExperimentBlueprint, args: &RunArgs) {
    if let Some(ref listen) = args.listen {
        info!(listen = %listen, "Overriding listen address from CLI");
        blueprint.host.listen_addr = listen.clone();
    }
    if let Some(num_runs) = args.num_runs {
        info!(num_runs, "Overriding run count from CLI");
        blueprint.runs.num_runs = num_runs;
    }
    if let Some(window_ms) = args.window_ms {
        info!(window_ms, "Overriding alignment window from CLI");
        blueprint.alignment.window_ms = window_ms;
    }
    if let Some(ref dir) = args.output_dir {
        info!(output_dir = %dir.display(), "Overriding output directory from CLI");
        blueprint.experiment.output_dir = dir.clone();
    }
    if let Some(ref path) = args.replay {
        info!(replay = %path.display(), "Using replay position source");
        blueprint.imaging.source = ImagingSourceType::Replay;
        blueprint.imaging.replay_path = Some(path.clone());
    }
}

/// Ctrl+C and SIGTERM raise the stop flag
fn spawn_shutdown_listener(stop: StopSignal) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Ctrl+C handler unavailable");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        warn!("Received shutdown signal, stopping session...");
        stop.request();
    });
}

async fn wait_for_stop(stop: &StopSignal) {
    while !stop.is_requested() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &ExperimentBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Host:");
    println!("  Listen: {}", blueprint.host.listen_addr);
    println!("  Read timeout: {} ms", blueprint.host.read_timeout_ms);
    println!("\nNode:");
    println!("  Channels: {:?} ({})", blueprint.node.channels, blueprint.node.tc_type);
    println!("  Send interval: {} s", blueprint.node.send_interval_s);
    println!("  Actuation: {:?}", blueprint.node.actuation);
    println!("\nRuns:");
    println!(
        "  {} x {} s (lead-in {} s, delay {} s)",
        blueprint.runs.num_runs,
        blueprint.runs.run_time_s,
        blueprint.runs.lead_time_s,
        blueprint.runs.inter_run_delay_s
    );
    println!("\nAlignment:");
    println!("  Window: {} ms", blueprint.alignment.window_ms);
    println!("  Buffer capacity: {}", blueprint.alignment.buffer_capacity);

    if !blueprint.sinks.is_empty() {
        println!("\nSinks ({}):", blueprint.sinks.len());
        for sink in &blueprint.sinks {
            println!("  - {} ({:?})", sink.name, sink.sink_type);
        }
    }
    println!(
        "\nOutput: {}/{}",
        blueprint.experiment.output_dir.display(),
        blueprint.experiment.run_file_name(1)
    );
    println!();
}

fn print_report(report: &SessionReport) {
    println!("\n=== Runs ===");
    for run in &report.runs {
        let offset = run
            .sync
            .map(|s| format!("{:+.1} ms", s.offset.millis()))
            .unwrap_or_else(|| "-".into());
        println!(
            "  run {:>3}: {:<16} records={:<6} unmatched={:<4} offset={}",
            run.run_index,
            run.outcome_label(),
            run.records(),
            run.unmatched_at_end,
            offset
        );
        for (sink, counters) in &run.output.sinks {
            if !counters.is_complete() {
                println!(
                    "           sink {sink}: written={} dropped={} failed={}",
                    counters.written, counters.dropped, counters.failed
                );
            }
        }
    }
    println!("Session end: {}\n", report.end.as_str());
    println!("{}", report.summary());
}
