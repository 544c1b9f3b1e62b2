//! LogSink - logs record summary via tracing

use contracts::{AlignedRecord, ContractError, RecordSink};
use tracing::{info, instrument};

/// Sink that logs each aligned record
pub struct LogSink {
    name: String,
    records: u64,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: 0,
        }
    }

    fn log_record(&self, record: &AlignedRecord) {
        let faults = record
            .channels
            .values()
            .filter(|r| r.value().is_none())
            .count();

        info!(
            sink = %self.name,
            run_index = record.run_index,
            elapsed_ms = record.elapsed_ms,
            delta_ms = record.delta_ms,
            x_mm = ?record.position.x,
            y_mm = ?record.position.y,
            channels = record.channels.len(),
            faults,
            sma_active = record.actuator_active,
            "AlignedRecord"
        );
    }
}

impl RecordSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, record),
        fields(sink = %self.name, run_index = record.run_index)
    )]
    async fn write(&mut self, record: &AlignedRecord) -> Result<(), ContractError> {
        self.records += 1;
        self.log_record(record);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, records = self.records, "LogSink closed");
        Ok(())
    }
}
