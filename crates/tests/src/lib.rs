//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试 (配置帧、线协议)
//! - 模拟 e2e 测试：Host 会话对接 SimulatedNode (tokio duplex + 暂停时间，无需硬件)

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        ConfigVersion, ContractError, ExperimentBlueprint, HostCommand, NodeConfigFrame,
        NodeMessage,
    };

    #[test]
    fn test_config_version_survives_toml_round_trip() {
        let written =
            ConfigLoader::to_string(&ExperimentBlueprint::default(), ConfigFormat::Toml).unwrap();
        assert!(written.contains(r#"version = "V1""#));

        let reloaded = ConfigLoader::load_from_str(&written, ConfigFormat::Toml).unwrap();
        assert_eq!(reloaded.version, ConfigVersion::V1);

        let unknown = written.replace(r#"version = "V1""#, r#"version = "V2""#);
        let err = ConfigLoader::load_from_str(&unknown, ConfigFormat::Toml).unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
    }

    #[test]
    fn test_config_frame_from_loaded_config() {
        let content = r#"
[node]
channels = [0, 2]
actuation = { target_temp_c = 70.0, max_heat_time = 20.0 }

[runs]
num_runs = 3
"#;
        let blueprint = ConfigLoader::load_from_str(content, ConfigFormat::Toml).unwrap();
        let frame = blueprint.node_config_frame();
        let decoded = NodeConfigFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.num_runs, 3);
        assert_eq!(decoded.channels, vec![0, 2]);
    }

    #[test]
    fn test_default_blueprint_is_valid() {
        assert!(ConfigLoader::validate(&ExperimentBlueprint::default()).is_ok());
    }

    #[test]
    fn test_wire_tokens() {
        assert_eq!(HostCommand::Sync.token(), "sync");
        assert_eq!(NodeMessage::parse(" READY \r").unwrap(), NodeMessage::Ready);
        assert!(NodeMessage::parse("sync_ts:").is_err());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::path::Path;
    use std::time::Duration;

    use contracts::{AbortReason, AlignedRecord, ExperimentBlueprint, SinkConfig, SinkType};
    use dispatcher::{MemorySink, OutputFactory, SinkHandle};
    use imaging::{MockPositionConfig, MockPositionSource};
    use session::{
        ResetOutcome, RunOrchestrator, SessionEnd, SessionReport, SessionSettings, StopSignal,
    };
    use tokio::task::JoinHandle;
    use transport::{NodeLink, NodeReport, SimulatedNode, SimulatedNodeConfig, TokioWallClock};

    /// Short runs, fast cadences
    fn bench_blueprint(output_dir: &Path, num_runs: u32) -> ExperimentBlueprint {
        let mut blueprint = ExperimentBlueprint::default();
        blueprint.experiment.output_dir = output_dir.to_path_buf();
        blueprint.experiment.volts = Some(6.0);
        blueprint.experiment.current = Some(1.5);
        blueprint.experiment.load_g = Some(100.0);
        blueprint.node.channels = vec![0, 1];
        blueprint.runs.num_runs = num_runs;
        blueprint.runs.run_time_s = 3.0;
        blueprint.runs.lead_time_s = 0.5;
        blueprint.runs.inter_run_delay_s = 0.5;
        blueprint.imaging.sample_interval_s = 0.1;
        blueprint
    }

    struct Bench {
        report: SessionReport,
        records: Vec<AlignedRecord>,
        node: JoinHandle<transport::Result<NodeReport>>,
    }

    async fn run_bench(blueprint: &ExperimentBlueprint, node_config: SimulatedNodeConfig) -> Bench {
        let (host_io, node_io) = tokio::io::duplex(64 * 1024);
        let clock = TokioWallClock::anchored_at(1_700_000_000.0);
        let node = tokio::spawn(SimulatedNode::new(node_io, node_config, clock).run());

        let memory = MemorySink::new("memory");
        let shared = memory.clone();
        let outputs = OutputFactory::new(
            blueprint.sinks.clone(),
            blueprint.experiment.clone(),
            &blueprint.node.channels,
        )
        .with_provider(move |_| vec![SinkHandle::spawn(shared.clone(), 256)]);

        let imaging = Box::new(MockPositionSource::new(MockPositionConfig::default()));
        let mut orchestrator = RunOrchestrator::new(
            NodeLink::new(host_io, "duplex"),
            clock,
            imaging,
            outputs,
            StopSignal::new(),
            SessionSettings::from_blueprint(blueprint),
        );
        let report = orchestrator.run().await.unwrap();
        drop(orchestrator);

        Bench {
            report,
            records: memory.records(),
            node,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_run_session_with_skewed_node_clock() {
        let dir = tempfile::tempdir().unwrap();
        let blueprint = bench_blueprint(dir.path(), 2);
        let node_config = SimulatedNodeConfig {
            clock_skew_s: 2.5,
            ..SimulatedNodeConfig::default()
        };

        let bench = run_bench(&blueprint, node_config).await;
        let report = &bench.report;
        assert_eq!(report.end, SessionEnd::Completed);
        assert_eq!(report.finished_runs(), 2);
        assert_eq!(report.resets, vec![ResetOutcome::Acked]);

        for run in &report.runs {
            let sync = run.sync.unwrap();
            assert!((sync.offset.millis() - 2505.0).abs() < 1.0);
            assert!(sync.large_offset);
            assert!(run.pulse_start_seen);
            assert!(run.records() >= 5, "run {} had {} records", run.run_index, run.records());
            assert_eq!(run.stale_dropped, 0);
        }

        // corrected Node times sit within the window of their Host samples
        assert!(!bench.records.is_empty());
        assert!(bench.records.iter().all(|r| r.delta_ms <= 400.0));
        assert!(bench.records.iter().any(|r| r.actuator_active));

        // rows sent ahead of pulse_start_ts share the pulse epoch
        for run in &report.runs {
            let epoch = run.actuation_epoch.unwrap();
            let elapsed: Vec<f64> = bench
                .records
                .iter()
                .filter(|r| r.run_index == run.run_index)
                .map(|r| {
                    assert!((r.elapsed_ms - (r.node_time - epoch) * 1000.0).abs() < 1e-6);
                    r.elapsed_ms
                })
                .collect();
            assert!(elapsed.windows(2).all(|w| w[0] <= w[1]), "{elapsed:?}");
            assert!(elapsed.first().is_some_and(|t| *t < 0.0));
        }

        for run_index in 1..=2 {
            let path = dir.path().join(format!("6p0V_1p5A_100G_run_{run_index}.csv"));
            let csv = std::fs::read_to_string(&path).unwrap();
            let mut lines = csv.lines();
            assert_eq!(
                lines.next(),
                Some("time_ms,x_mm,y_mm,z_mm,temp_ch0,temp_ch1,sma_active,delta_ms")
            );
            let rows = lines.count() as u64;
            assert_eq!(rows, report.runs[run_index as usize - 1].records());
        }

        let summary = report.summary();
        assert_eq!(summary.runs_finished, 2);
        assert_eq!(summary.total_records, bench.records.len() as u64);
        assert_eq!(summary.offset_ms.count, 2);

        let node = bench.node.await.unwrap().unwrap();
        assert_eq!(node.runs_started, 2);
        assert_eq!(node.config.map(|c| c.num_runs), Some(2));
        assert_eq!(node.resets_acked, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_reply_after_timeout_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let blueprint = bench_blueprint(dir.path(), 1);
        let node_config = SimulatedNodeConfig {
            sync_reply_delay: Duration::from_secs(12),
            ..SimulatedNodeConfig::default()
        };

        let bench = run_bench(&blueprint, node_config).await;
        let run = &bench.report.runs[0];
        assert_eq!(
            run.abort_reason(),
            Some(&AbortReason::SyncTimeout { waited_s: 10.0 })
        );
        assert_eq!(run.records(), 0);
        assert!(bench.records.is_empty());
        assert_eq!(bench.report.end, SessionEnd::Completed);
        bench.node.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_reset_ack_next_run_proceeds() {
        let dir = tempfile::tempdir().unwrap();
        let blueprint = bench_blueprint(dir.path(), 2);
        let node_config = SimulatedNodeConfig {
            ack_reset: false,
            ..SimulatedNodeConfig::default()
        };

        let bench = run_bench(&blueprint, node_config).await;
        assert_eq!(bench.report.resets, vec![ResetOutcome::Missing]);
        assert_eq!(bench.report.finished_runs(), 2);
        assert!(bench.report.runs[1].records() > 0);
        bench.node.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_stop_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let blueprint = bench_blueprint(dir.path(), 3);
        let node_config = SimulatedNodeConfig {
            stop_on_run: Some(2),
            ..SimulatedNodeConfig::default()
        };

        let bench = run_bench(&blueprint, node_config).await;
        assert_eq!(bench.report.end, SessionEnd::NodeStopped);
        assert_eq!(bench.report.runs.len(), 2);
        assert!(bench.report.runs[0].is_finished());
        assert_eq!(
            bench.report.runs[1].abort_reason(),
            Some(&AbortReason::NodeStopped)
        );
        assert!(!dir.path().join("6p0V_1p5A_100G_run_3.csv").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_skips_remaining_runs() {
        let dir = tempfile::tempdir().unwrap();
        let blueprint = bench_blueprint(dir.path(), 3);
        let node_config = SimulatedNodeConfig {
            disconnect_after_packets: Some(5),
            ..SimulatedNodeConfig::default()
        };

        let bench = run_bench(&blueprint, node_config).await;
        assert!(matches!(
            bench.report.end,
            SessionEnd::ConnectionLost { .. }
        ));
        assert_eq!(bench.report.runs.len(), 1);
        assert_eq!(
            bench.report.runs[0].abort_reason().map(AbortReason::kind),
            Some("connection_lost")
        );
        assert!(bench.report.runs[0].records() > 0);

        let node = bench.node.await.unwrap().unwrap();
        assert!(node.disconnected);
        assert_eq!(node.runs_started, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_garbage_frames_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let blueprint = bench_blueprint(dir.path(), 1);
        let node_config = SimulatedNodeConfig {
            garbage_every: Some(3),
            malformed_sync_replies: 1,
            ..SimulatedNodeConfig::default()
        };

        let bench = run_bench(&blueprint, node_config).await;
        let run = &bench.report.runs[0];
        assert!(run.is_finished());
        assert!(run.protocol_errors >= 2);
        assert_eq!(run.sync.map(|s| s.attempts), Some(2));
        assert!(run.records() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_faulted_channel_leaves_empty_cells() {
        let dir = tempfile::tempdir().unwrap();
        let mut blueprint = bench_blueprint(dir.path(), 1);
        blueprint.sinks.push(SinkConfig {
            name: "log".into(),
            sink_type: SinkType::Log,
            queue_capacity: 16,
            params: Default::default(),
        });
        let node_config = SimulatedNodeConfig {
            fault_channels: vec![1],
            include_run_index: false,
            ..SimulatedNodeConfig::default()
        };

        let bench = run_bench(&blueprint, node_config).await;
        let run = &bench.report.runs[0];
        assert!(run.is_finished());
        assert_eq!(run.output.sinks.len(), 3);

        let summary = bench.report.summary();
        assert_eq!(summary.channel_faults, summary.total_records);

        let csv =
            std::fs::read_to_string(dir.path().join("6p0V_1p5A_100G_run_1.csv")).unwrap();
        for row in csv.lines().skip(1) {
            let cells: Vec<&str> = row.split(',').collect();
            assert_eq!(cells.len(), 8);
            assert!(!cells[4].is_empty());
            assert!(cells[5].is_empty());
        }
    }
}
