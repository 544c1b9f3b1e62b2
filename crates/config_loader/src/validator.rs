//! 配置校验模块
//!
//! 校验规则：
//! - 字段级范围 (由 `validator` derive 规则给出)
//! - 热电偶通道 0-3 且不重复
//! - 执行器参数为正
//! - 对齐窗口不超过保留时长
//! - 淘汰周期不超过保留时长
//! - sink 名称唯一，replay 源必须给出文件

use std::collections::HashSet;

use contracts::{ActuationParams, ContractError, ExperimentBlueprint, ImagingSourceType};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

const MAX_CHANNEL: u8 = 3;

/// 校验 ExperimentBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &ExperimentBlueprint) -> Result<(), ContractError> {
    blueprint
        .validate()
        .map_err(|errors| first_violation(&errors, ""))?;
    validate_channels(blueprint)?;
    validate_actuation(blueprint)?;
    validate_alignment(blueprint)?;
    validate_imaging(blueprint)?;
    validate_sinks(blueprint)?;
    Ok(())
}

/// 把 derive 规则的错误树展开成第一条 `field.path: message`
fn first_violation(errors: &ValidationErrors, prefix: &str) -> ContractError {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                let message = list
                    .first()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| format!("failed '{}' rule", e.code))
                    })
                    .unwrap_or_else(|| "invalid value".to_string());
                return ContractError::config_validation(path, message);
            }
            ValidationErrorsKind::Struct(inner) => return first_violation(inner, &path),
            ValidationErrorsKind::List(items) => {
                if let Some((idx, inner)) = items.iter().next() {
                    return first_violation(inner, &format!("{path}[{idx}]"));
                }
            }
        }
    }
    ContractError::config_validation(prefix, "invalid configuration")
}

/// 校验热电偶通道
fn validate_channels(blueprint: &ExperimentBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for &channel in &blueprint.node.channels {
        if channel > MAX_CHANNEL {
            return Err(ContractError::config_validation(
                "node.channels",
                format!("channel {channel} out of range 0-{MAX_CHANNEL}"),
            ));
        }
        if !seen.insert(channel) {
            return Err(ContractError::config_validation(
                "node.channels",
                format!("duplicate channel {channel}"),
            ));
        }
    }
    Ok(())
}

/// 校验执行器参数
fn validate_actuation(blueprint: &ExperimentBlueprint) -> Result<(), ContractError> {
    match blueprint.node.actuation {
        ActuationParams::Pulse { pulse_duration } if pulse_duration <= 0.0 => {
            Err(ContractError::config_validation(
                "node.actuation.pulse_duration",
                format!("pulse_duration must be > 0, got {pulse_duration}"),
            ))
        }
        ActuationParams::TargetTemperature {
            target_temp_c,
            max_heat_time,
        } if target_temp_c <= 0.0 || max_heat_time <= 0.0 => Err(ContractError::config_validation(
            "node.actuation",
            format!(
                "target_temp_c ({target_temp_c}) and max_heat_time ({max_heat_time}) must be > 0"
            ),
        )),
        _ => Ok(()),
    }
}

/// 校验对齐参数之间的关系
fn validate_alignment(blueprint: &ExperimentBlueprint) -> Result<(), ContractError> {
    let alignment = &blueprint.alignment;
    let window_s = alignment.window_ms / 1000.0;

    // 窗口大于保留时长时，待匹配样本会在匹配之前被淘汰
    if window_s > alignment.retention_s {
        return Err(ContractError::config_validation(
            "alignment.window_ms",
            format!(
                "window ({} ms) must be <= retention ({} s)",
                alignment.window_ms, alignment.retention_s
            ),
        ));
    }

    if alignment.cleanup_interval_s > alignment.retention_s {
        return Err(ContractError::config_validation(
            "alignment.cleanup_interval_s",
            format!(
                "cleanup_interval_s ({}) must be <= retention_s ({})",
                alignment.cleanup_interval_s, alignment.retention_s
            ),
        ));
    }

    Ok(())
}

/// 校验成像源
fn validate_imaging(blueprint: &ExperimentBlueprint) -> Result<(), ContractError> {
    if blueprint.imaging.source == ImagingSourceType::Replay
        && blueprint.imaging.replay_path.is_none()
    {
        return Err(ContractError::config_validation(
            "imaging.replay_path",
            "replay source requires replay_path",
        ));
    }
    Ok(())
}

/// 校验 sink 配置
fn validate_sinks(blueprint: &ExperimentBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in blueprint.sinks.iter().enumerate() {
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[{idx}].name"),
                format!("duplicate sink name '{}'", sink.name),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{SinkConfig, SinkType};
    use std::path::PathBuf;

    fn field_of(err: ContractError) -> String {
        match err {
            ContractError::ConfigValidation { field, .. } => field,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_valid_config() {
        let bp = ExperimentBlueprint::default();
        assert!(validate(&bp).is_ok());
    }

    #[test]
    fn test_derive_rule_reports_nested_path() {
        let mut bp = ExperimentBlueprint::default();
        bp.runs.num_runs = 0;
        assert_eq!(field_of(validate(&bp).unwrap_err()), "runs.num_runs");
    }

    #[test]
    fn test_channel_out_of_range() {
        let mut bp = ExperimentBlueprint::default();
        bp.node.channels = vec![0, 4];
        assert_eq!(field_of(validate(&bp).unwrap_err()), "node.channels");
    }

    #[test]
    fn test_duplicate_channel() {
        let mut bp = ExperimentBlueprint::default();
        bp.node.channels = vec![1, 1];
        let err = validate(&bp).unwrap_err();
        assert!(err.to_string().contains("duplicate channel"));
    }

    #[test]
    fn test_invalid_pulse_duration() {
        let mut bp = ExperimentBlueprint::default();
        bp.node.actuation = ActuationParams::Pulse {
            pulse_duration: 0.0,
        };
        assert_eq!(
            field_of(validate(&bp).unwrap_err()),
            "node.actuation.pulse_duration"
        );
    }

    #[test]
    fn test_window_exceeds_retention() {
        let mut bp = ExperimentBlueprint::default();
        bp.alignment.window_ms = 1500.0;
        assert_eq!(field_of(validate(&bp).unwrap_err()), "alignment.window_ms");
    }

    #[test]
    fn test_cleanup_exceeds_retention() {
        let mut bp = ExperimentBlueprint::default();
        bp.alignment.cleanup_interval_s = 2.0;
        assert_eq!(
            field_of(validate(&bp).unwrap_err()),
            "alignment.cleanup_interval_s"
        );
    }

    #[test]
    fn test_replay_requires_path() {
        let mut bp = ExperimentBlueprint::default();
        bp.imaging.source = ImagingSourceType::Replay;
        assert_eq!(field_of(validate(&bp).unwrap_err()), "imaging.replay_path");
        bp.imaging.replay_path = Some(PathBuf::from("positions.jsonl"));
        assert!(validate(&bp).is_ok());
    }

    #[test]
    fn test_duplicate_sink_name() {
        let mut bp = ExperimentBlueprint::default();
        bp.sinks.push(SinkConfig {
            name: "csv".into(),
            sink_type: SinkType::Log,
            queue_capacity: 10,
            params: Default::default(),
        });
        assert_eq!(field_of(validate(&bp).unwrap_err()), "sinks[1].name");
    }

    #[test]
    fn test_empty_sink_name() {
        let mut bp = ExperimentBlueprint::default();
        bp.sinks[0].name.clear();
        assert_eq!(field_of(validate(&bp).unwrap_err()), "sinks[0].name");
    }
}
