//! Cooperative stop flag
//!
//! 由信号处理 (Ctrl-C / SIGTERM) 置位，或由停止文件触发。采集循环每次迭代检查一次。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

/// Shared stop request
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    stop_file: Option<Arc<PathBuf>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also stop when `path` exists
    pub fn with_stop_file(mut self, path: impl AsRef<Path>) -> Self {
        self.stop_file = Some(Arc::new(path.as_ref().to_path_buf()));
        self
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Checks the flag, then the stop file
    pub fn is_requested(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        match &self.stop_file {
            Some(path) if path.exists() => {
                warn!(path = %path.display(), "Stop file found, requesting stop");
                self.flag.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    pub fn stop_file(&self) -> Option<&Path> {
        self.stop_file.as_deref().map(PathBuf::as_path)
    }
}
