//! # sync-host
//!
//! 实验台 Host 端入口：接受 Node 连接，按配置编排多次运行，把温度流与位置流对齐后写入 CSV。
//! `simulate-node` 子命令在没有硬件时扮演 Node。
//!
//! 停止方式：Ctrl+C、SIGTERM 或创建配置中的停止文件。

mod cli;
mod commands;
mod error;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use cli::{Cli, Commands};
use commands::{run_info, run_session, run_simulate_node, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    observability::init_with_config(observability::ObservabilityConfig {
        log_format: cli.log_format.into(),
        metrics_port: None,
        default_log_level: log_level(&cli).to_string(),
    })?;
    info!(version = env!("CARGO_PKG_VERSION"), "sync-host starting");

    let result = match &cli.command {
        Commands::Run(args) => run_session(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
        Commands::SimulateNode(args) => run_simulate_node(args).await,
    };
    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}

fn log_level(cli: &Cli) -> &'static str {
    match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    }
}
