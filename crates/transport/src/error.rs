//! Transport 错误类型

use contracts::ContractError;
use thiserror::Error;

/// Transport 错误
#[derive(Debug, Error)]
pub enum TransportError {
    /// 对端关闭、复位或管道断开，会话无法继续
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// 原因
        reason: String,
    },

    /// 帧编码失败
    #[error("encode failed: {0}")]
    Encode(#[from] ContractError),

    /// 握手前置帧 (配置帧) 无效
    #[error("invalid {what}: {message}")]
    Protocol {
        /// 帧类型
        what: &'static str,
        /// 错误消息
        message: String,
    },
}

impl TransportError {
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            reason: reason.into(),
        }
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::connection_lost(err.to_string())
    }
}

/// Transport Result 类型别名
pub type Result<T> = std::result::Result<T, TransportError>;
