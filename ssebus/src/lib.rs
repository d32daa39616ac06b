//! 进程内 SSE 事件总线（ssebus）
//!
//! 将发布的事件扇出到大量长连接客户端（HTTP 流式推送、WebSocket 等）：
//! - 客户端注册表（`registry`）与订阅索引（`subscriptions`）
//! - 事件模型（`event`）与负载转换（`converter`）
//! - 连接协议与进程内通道实现（`connection`）
//! - 事件子系统（`eventing`）：发布扇出、串行投递循环、失败重试与过期回收
//! - 对外入口（`bus::EventBus`）与配置（`config`）
//!
//! 本 crate 不实现传输协议本身，也不持久化事件；投递失败按有界次数重试，
//! 耗尽后注销客户端，长时间无成功投递的客户端会被周期性回收。
//!
//! 典型用法：
//! 1. 构造 `EventBus` 并调用 `start` 启动后台任务；
//! 2. 传输层为每个客户端请求调用 `create_connection`，把返回的 `EventStream` 写回客户端；
//! 3. 业务侧通过 `publish` 发布事件；
//! 4. 进程退出前调用 `BusHandle::shutdown`。
//!
pub mod bus;
pub mod config;
pub mod connection;
pub mod converter;
pub mod error;
pub mod event;
pub mod eventing;
pub mod queue;
pub mod registry;
pub mod subscriptions;

pub use bus::{ConnectOptions, EventBus};
pub use config::{BusConfig, QueueKind};
pub use connection::{ChannelConnection, Connection, EventStream};
pub use converter::{ConverterChain, JsonConverter, PayloadConverter};
pub use error::{BusError, BusResult};
pub use event::{DEFAULT_EVENT, Event, OutboundEvent, Payload};
pub use eventing::BusHandle;
