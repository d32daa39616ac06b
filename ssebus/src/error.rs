//! 事件总线统一错误定义
//!
//! 覆盖连接投递、负载转换、队列与配置校验等最小必要集合，
//! 便于调用方与传输层统一处理 `BusError`。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BusError {
    // --- 连接/投递 ---
    #[error("connection error: client={client_id}, reason={reason}")]
    Connection { client_id: String, reason: String },
    #[error("connection closed: client={client_id}")]
    ConnectionClosed { client_id: String },

    // --- 负载转换 ---
    #[error("conversion error: {reason}")]
    Conversion { reason: String },
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    // --- 队列/运行时 ---
    #[error("queue closed: {queue}")]
    QueueClosed { queue: &'static str },
    #[error("event bus already started")]
    AlreadyStarted,

    // --- 配置 ---
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },
}

impl BusError {
    pub fn connection(client_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            client_id: client_id.into(),
            reason: reason.into(),
        }
    }

    pub fn conversion(reason: impl Into<String>) -> Self {
        Self::Conversion {
            reason: reason.into(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type BusResult<T> = Result<T, BusError>;
