//! `simulate-node` command implementation.

use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpStream;
use tracing::info;
use transport::{SimulatedNode, SimulatedNodeConfig, TokioWallClock};

use crate::cli::SimulateNodeArgs;
use crate::error::CliError;

/// Execute the `simulate-node` command
pub async fn run_simulate_node(args: &SimulateNodeArgs) -> Result<()> {
    let config = node_config(args);
    info!(
        connect = %args.connect,
        clock_skew_s = config.clock_skew_s,
        "Connecting simulated node"
    );

    let stream = TcpStream::connect(&args.connect)
        .await
        .map_err(|e| CliError::connect(&args.connect, e.to_string()))?;
    stream.set_nodelay(true)?;

    let report = SimulatedNode::new(stream, config, TokioWallClock::new())
        .run()
        .await?;

    info!(
        runs_started = report.runs_started,
        runs_completed = report.runs_completed,
        packets = report.packets_sent,
        syncs = report.syncs_answered,
        resets = report.resets_acked,
        disconnected = report.disconnected,
        "Simulated node finished"
    );
    Ok(())
}

fn node_config(args: &SimulateNodeArgs) -> SimulatedNodeConfig {
    SimulatedNodeConfig {
        clock_skew_s: args.clock_skew_s,
        sync_reply_delay: Duration::from_millis(args.sync_reply_delay_ms),
        malformed_sync_replies: args.malformed_sync_replies,
        ack_reset: !args.no_reset_ack,
        fault_channels: args.fault_channels.clone(),
        garbage_every: args.garbage_every,
        disconnect_after_packets: args.disconnect_after,
        stop_on_run: args.stop_on_run,
        include_run_index: !args.no_run_index,
        ..SimulatedNodeConfig::default()
    }
}
