//! MemorySink - keeps records in a shared vector

use std::sync::{Arc, Mutex};

use contracts::{AlignedRecord, ContractError, RecordSink};

/// Collects every record; the collected vector is shared with the creator
#[derive(Clone)]
pub struct MemorySink {
    name: String,
    records: Arc<Mutex<Vec<AlignedRecord>>>,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Copy of everything written so far
    pub fn records(&self) -> Vec<AlignedRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl RecordSink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, record: &AlignedRecord) -> Result<(), ContractError> {
        self.records
            .lock()
            .map_err(|_| ContractError::sink_write(&self.name, "record store poisoned"))?
            .push(record.clone());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        Ok(())
    }
}
