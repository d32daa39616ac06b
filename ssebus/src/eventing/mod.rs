//! 事件子系统（eventing）
//!
//! 总线的运行时部分：
//! - `Publisher`：解析目标客户端并为每个目标生成投递任务；
//! - `DeliveryWorker`：唯一的串行投递循环；
//! - `RetryScheduler`：失败任务的固定间隔重试调度；
//! - `Reaper`：过期客户端回收；
//! - `BusHandle`：后台任务的关闭与等待。
//!
//! 数据流：publish → 发送队列 → 投递循环 → 成功（刷新活跃时间）或失败
//! （→ 重试队列 → 重试调度 → 发送队列，直至尝试次数耗尽后注销客户端）。
//!
mod delivery;
pub(crate) mod engine;
mod publisher;
mod reaper;
mod retry;

pub(crate) use delivery::DeliveryWorker;
pub use engine::BusHandle;
pub(crate) use publisher::Publisher;
pub(crate) use reaper::Reaper;
pub(crate) use retry::RetryScheduler;
