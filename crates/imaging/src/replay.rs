//! Replay position source - 从录制文件回放位置数据
//!
//! 读取 JSONL 录制 (每行一个 `{"t": .., "x_mm": .., "y_mm": .., "z_mm": ..}`)，
//! `t` 为相对录制开始的秒数。回放以第一次 `sample()` 为起点，
//! 每次采样返回不晚于当前相对时间的最后一条记录 (step-hold)。

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use contracts::{HostSample, HostTime, Position, PositionSource};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ImagingError, Result};

/// JSONL 中的位置记录
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PositionRecord {
    /// 相对录制开始的秒数
    pub t: f64,
    #[serde(default)]
    pub x_mm: Option<f64>,
    #[serde(default)]
    pub y_mm: Option<f64>,
    #[serde(default)]
    pub z_mm: Option<f64>,
}

impl PositionRecord {
    fn position(&self) -> Position {
        Position {
            x: self.x_mm,
            y: self.y_mm,
            z: self.z_mm,
        }
    }
}

/// Replay 位置源
#[derive(Debug)]
pub struct ReplayPositionSource {
    name: String,
    path: PathBuf,
    records: Vec<PositionRecord>,
    loop_playback: bool,
    origin: Option<HostTime>,
    cursor: usize,
}

impl ReplayPositionSource {
    /// 从 JSONL 文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let load_err = |message: String| ImagingError::ReplayLoad {
            path: path.to_path_buf(),
            message,
        };

        let file = File::open(path).map_err(|e| load_err(e.to_string()))?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| load_err(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: PositionRecord = serde_json::from_str(&line)
                .map_err(|e| load_err(format!("line {}: {e}", lineno + 1)))?;
            if !record.t.is_finite() {
                return Err(load_err(format!("line {}: non-finite t", lineno + 1)));
            }
            records.push(record);
        }

        Self::from_records(path, records)
    }

    /// 从内存中的记录构建
    pub fn from_records(path: &Path, mut records: Vec<PositionRecord>) -> Result<Self> {
        if records.is_empty() {
            return Err(ImagingError::EmptyReplay {
                path: path.to_path_buf(),
            });
        }

        // 按时间排序 (t 均为有限值)
        records.sort_by(|a, b| a.t.total_cmp(&b.t));

        info!(
            path = %path.display(),
            records = records.len(),
            duration_s = records[records.len() - 1].t - records[0].t,
            "Loaded replay position source"
        );

        Ok(Self {
            name: "replay_tracker".to_string(),
            path: path.to_path_buf(),
            records,
            loop_playback: false,
            origin: None,
            cursor: 0,
        })
    }

    /// Restart from the beginning once the recording is exhausted
    pub fn looped(mut self, loop_playback: bool) -> Self {
        self.loop_playback = loop_playback;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn duration(&self) -> f64 {
        self.records[self.records.len() - 1].t
    }

    fn lookup(&mut self, rel: f64) -> Position {
        let mut rel = rel;
        if self.loop_playback {
            let span = self.duration();
            if span > 0.0 && rel > span {
                rel %= span;
                if rel < self.records[self.cursor].t {
                    self.cursor = 0;
                }
            }
        }

        if rel < self.records[0].t {
            return Position::missing();
        }

        while self.cursor + 1 < self.records.len() && self.records[self.cursor + 1].t <= rel {
            self.cursor += 1;
        }
        self.records[self.cursor].position()
    }
}

impl PositionSource for ReplayPositionSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample(&mut self, now: HostTime) -> HostSample {
        let origin = *self.origin.get_or_insert(now);
        let rel = now - origin;
        let position = self.lookup(rel);
        HostSample {
            timestamp: now,
            position,
        }
    }

    fn release(&mut self) {
        debug!(path = %self.path.display(), "Replay position source released");
        self.origin = None;
        self.cursor = 0;
    }
}
