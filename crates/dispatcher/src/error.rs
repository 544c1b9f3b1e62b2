use std::path::PathBuf;

use thiserror::Error;

/// 输出层错误
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// A run's sink could not be opened (e.g. the CSV file)
    #[error("run {run_index}: cannot open sink '{name}' at {}: {message}", path.display())]
    SinkOpen {
        name: String,
        run_index: u32,
        path: PathBuf,
        message: String,
    },

    /// Records arrived after the run's output was closed
    #[error("output for run {run_index} is closed")]
    Closed { run_index: u32 },
}

impl DispatcherError {
    pub fn sink_open(
        name: impl Into<String>,
        run_index: u32,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self::SinkOpen {
            name: name.into(),
            run_index,
            path: path.into(),
            message: message.into(),
        }
    }
}
