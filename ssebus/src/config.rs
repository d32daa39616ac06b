//! 总线配置（BusConfig）
//!
//! 投递重试上限、客户端过期窗口、重试调度间隔与队列形态等运行参数。
//!
use crate::error::{BusError, BusResult};
use bon::Builder;
use std::time::Duration;

/// 默认投递尝试次数
pub const DEFAULT_MAX_SEND_ATTEMPTS: u32 = 40;
/// 默认客户端过期窗口（1 天）
pub const DEFAULT_CLIENT_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);
/// 默认重试调度间隔
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
/// 默认连接空闲超时
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(180);
/// 默认单连接缓冲区大小
pub const DEFAULT_CONNECTION_BUFFER: usize = 64;
/// 默认通道连接等待缓冲区空间的上限
pub const DEFAULT_CONNECTION_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// 队列形态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueueKind {
    /// 无界队列：入队永不等待
    #[default]
    Unbounded,
    /// 有界队列：发送队列满时发布方等待；重试队列满时丢弃溢出任务
    Bounded { capacity: usize },
}

/// 事件总线配置
#[derive(Clone, Copy, Debug, Builder)]
pub struct BusConfig {
    /// 单个投递任务的最大尝试次数（>= 1），耗尽后注销客户端
    #[builder(default = DEFAULT_MAX_SEND_ATTEMPTS)]
    pub max_send_attempts: u32,
    /// 客户端无成功投递超过该时长即被回收；同时是回收任务的执行周期
    #[builder(default = DEFAULT_CLIENT_EXPIRATION)]
    pub client_expiration: Duration,
    /// 重试调度的固定间隔（上一轮结束后计时）
    #[builder(default = DEFAULT_RETRY_DELAY)]
    pub retry_delay: Duration,
    #[builder(default)]
    pub send_queue: QueueKind,
    #[builder(default)]
    pub retry_queue: QueueKind,
    /// `create_connection` 创建的通道连接缓冲区大小
    #[builder(default = DEFAULT_CONNECTION_BUFFER)]
    pub connection_buffer: usize,
    /// 通道连接缓冲区满时等待读取的上限，超时记为一次投递失败
    #[builder(default = DEFAULT_CONNECTION_SEND_TIMEOUT)]
    pub connection_send_timeout: Duration,
    /// `create_connection` 未指定超时时使用的空闲超时
    #[builder(default = DEFAULT_CONNECTION_TIMEOUT)]
    pub default_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_send_attempts: DEFAULT_MAX_SEND_ATTEMPTS,
            client_expiration: DEFAULT_CLIENT_EXPIRATION,
            retry_delay: DEFAULT_RETRY_DELAY,
            send_queue: QueueKind::Unbounded,
            retry_queue: QueueKind::Unbounded,
            connection_buffer: DEFAULT_CONNECTION_BUFFER,
            connection_send_timeout: DEFAULT_CONNECTION_SEND_TIMEOUT,
            default_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }
}

impl BusConfig {
    /// 校验配置取值
    pub fn validate(&self) -> BusResult<()> {
        if self.max_send_attempts == 0 {
            return Err(BusError::invalid_config("max_send_attempts must be >= 1"));
        }
        if self.client_expiration.is_zero() {
            return Err(BusError::invalid_config("client_expiration must be > 0"));
        }
        if self.retry_delay.is_zero() {
            return Err(BusError::invalid_config("retry_delay must be > 0"));
        }
        if self.connection_send_timeout.is_zero() {
            return Err(BusError::invalid_config(
                "connection_send_timeout must be > 0",
            ));
        }
        if self.connection_buffer == 0 {
            return Err(BusError::invalid_config("connection_buffer must be >= 1"));
        }
        for (name, kind) in [("send_queue", self.send_queue), ("retry_queue", self.retry_queue)] {
            if kind == (QueueKind::Bounded { capacity: 0 }) {
                return Err(BusError::invalid_config(format!(
                    "{name} capacity must be >= 1"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = BusConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_send_attempts, 40);
        assert_eq!(cfg.retry_delay, Duration::from_millis(500));
        assert_eq!(cfg.send_queue, QueueKind::Unbounded);
    }

    #[test]
    fn builder_fills_defaults() {
        let cfg = BusConfig::builder().max_send_attempts(2).build();
        assert_eq!(cfg.max_send_attempts, 2);
        assert_eq!(cfg.client_expiration, DEFAULT_CLIENT_EXPIRATION);
        assert_eq!(cfg.connection_buffer, DEFAULT_CONNECTION_BUFFER);
        assert_eq!(cfg.connection_send_timeout, DEFAULT_CONNECTION_SEND_TIMEOUT);
    }

    #[test]
    fn rejects_zero_send_timeout() {
        let cfg = BusConfig::builder()
            .connection_send_timeout(Duration::ZERO)
            .build();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_attempts() {
        let cfg = BusConfig::builder().max_send_attempts(0).build();
        assert!(matches!(
            cfg.validate(),
            Err(BusError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn rejects_zero_capacity_queue() {
        let cfg = BusConfig::builder()
            .retry_queue(QueueKind::Bounded { capacity: 0 })
            .build();
        assert!(cfg.validate().is_err());
    }
}
