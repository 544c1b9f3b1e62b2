//! CsvSink - one CSV file per run
//!
//! 列: `time_ms,x_mm,y_mm,z_mm,temp_ch0..,sma_active,delta_ms`。
//! 缺失的位置或故障通道写为空单元格，而不是 0。

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use contracts::{AlignedRecord, ContractError, RecordSink};
use tracing::{debug, info, instrument};

/// Configuration for CsvSink
#[derive(Debug, Clone)]
pub struct CsvSinkConfig {
    /// Output file
    pub path: PathBuf,

    /// Channel keys (`ch0`, …) in column order
    pub channels: Vec<String>,
}

/// Sink that writes one row per aligned record
pub struct CsvSink {
    name: String,
    config: CsvSinkConfig,
    writer: Option<BufWriter<File>>,
    rows: u64,
}

impl CsvSink {
    /// Create the file (and its directory) and write the header
    pub fn create(name: impl Into<String>, config: CsvSinkConfig) -> std::io::Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut writer = BufWriter::new(File::create(&config.path)?);
        writeln!(writer, "{}", Self::header(&config.channels))?;

        let name = name.into();
        info!(sink = %name, path = %config.path.display(), "CSV output opened");
        Ok(Self {
            name,
            config,
            writer: Some(writer),
            rows: 0,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.config.path
    }

    pub fn header(channels: &[String]) -> String {
        let mut header = String::from("time_ms,x_mm,y_mm,z_mm");
        for channel in channels {
            let _ = write!(header, ",temp_{channel}");
        }
        header.push_str(",sma_active,delta_ms");
        header
    }

    fn format_row(&self, record: &AlignedRecord) -> String {
        let mut row = format!("{:.3}", record.elapsed_ms);
        for coord in [record.position.x, record.position.y, record.position.z] {
            push_optional(&mut row, coord);
        }
        for channel in &self.config.channels {
            push_optional(
                &mut row,
                record.channels.get(channel).and_then(|r| r.value()),
            );
        }
        let _ = write!(
            row,
            ",{},{:.3}",
            u8::from(record.actuator_active),
            record.delta_ms
        );
        row
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, ContractError> {
        self.writer
            .as_mut()
            .ok_or_else(|| ContractError::sink_write(&self.name, "sink is closed"))
    }
}

fn push_optional(row: &mut String, value: Option<f64>) {
    row.push(',');
    if let Some(v) = value {
        let _ = write!(row, "{v}");
    }
}

impl RecordSink for CsvSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "csv_sink_write",
        skip(self, record),
        fields(sink = %self.name, run_index = record.run_index)
    )]
    async fn write(&mut self, record: &AlignedRecord) -> Result<(), ContractError> {
        let row = self.format_row(record);
        let name = self.name.clone();
        writeln!(self.writer()?, "{row}")
            .map_err(|e| ContractError::sink_write(name, e.to_string()))?;
        self.rows += 1;
        Ok(())
    }

    #[instrument(name = "csv_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        }
        Ok(())
    }

    #[instrument(name = "csv_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        }
        debug!(
            sink = %self.name,
            path = %self.config.path.display(),
            rows = self.rows,
            "CsvSink closed"
        );
        Ok(())
    }
}
