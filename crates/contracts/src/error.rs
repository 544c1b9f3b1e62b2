//! ContractError
//!
//! 按来源分组：配置文件、线协议帧、输出 sink。

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration =====
    #[error("cannot read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A field holds a value the experiment cannot run with
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Wire =====
    /// Frame is not a known Node message
    #[error("malformed frame {frame:?}: {message}")]
    MalformedFrame { frame: String, message: String },

    #[error("wire encode error: {message}")]
    WireEncode { message: String },

    // ===== Sink =====
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },
}

impl ContractError {
    pub fn config_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ConfigRead {
            path: path.into(),
            source,
        }
    }

    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn malformed(frame: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            frame: frame.into(),
            message: message.into(),
        }
    }

    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Problem with the experiment configuration (as opposed to runtime traffic)
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::ConfigRead { .. } | Self::ConfigParse { .. } | Self::ConfigValidation { .. }
        )
    }
}
