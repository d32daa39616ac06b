//! 投递循环（DeliveryWorker）
//!
//! 全总线唯一的串行消费者，逐个取出发送队列中的任务：
//! - 失败次数已达上限：注销客户端（视为不可达），丢弃任务；
//! - 否则通过客户端**当前**连接投递：成功刷新活跃时间；失败（错误或 panic）
//!   以错误关闭连接、失败计数加一，并放入重试队列，而不是立即重发。
//!
//! 单个任务失败不会终止循环，只有取消令牌触发时才退出。
//!
use crate::error::BusError;
use crate::queue::{DeliveryTask, OfferError, TaskQueue, TaskReceiver};
use crate::registry::ClientRegistry;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 单个任务的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// 投递失败，已放入重试队列
    Failed,
    /// 尝试次数耗尽，客户端已注销
    GaveUp,
    /// 客户端不存在或重试队列不可用，任务被丢弃
    Dropped,
}

pub(crate) struct DeliveryWorker {
    registry: Arc<ClientRegistry>,
    retry_queue: TaskQueue,
    max_attempts: u32,
}

impl DeliveryWorker {
    pub(crate) fn new(
        registry: Arc<ClientRegistry>,
        retry_queue: TaskQueue,
        max_attempts: u32,
    ) -> Self {
        Self {
            registry,
            retry_queue,
            max_attempts,
        }
    }

    pub(crate) async fn run(self, mut send_rx: TaskReceiver, token: CancellationToken) {
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => None,
                task = send_rx.take() => task,
            };
            let Some(task) = next else { break };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.deliver(task) => {}
            }
        }
        debug!("delivery worker stopped");
    }

    pub(crate) async fn deliver(&self, mut task: DeliveryTask) -> Delivery {
        let client_id = task.client_id().to_string();

        if task.attempts() >= self.max_attempts {
            warn!(
                client_id = %client_id,
                event = %task.event_name(),
                attempts = task.attempts(),
                "send attempts exhausted, unregistering client"
            );
            self.registry.unregister(&client_id);
            return Delivery::GaveUp;
        }

        let Some(connection) = self.registry.connection(&client_id) else {
            debug!(client_id = %client_id, "client no longer registered, dropping task");
            return Delivery::Dropped;
        };

        let sent = AssertUnwindSafe(connection.send(task.message().clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(BusError::connection(&client_id, panic_reason(&*panic))));

        match sent {
            Ok(()) => {
                self.registry.touch(&client_id);
                Delivery::Delivered
            }
            Err(err) => {
                connection.close_with_error(&err);
                task.record_failure();
                debug!(
                    client_id = %client_id,
                    event = %task.event_name(),
                    attempts = task.attempts(),
                    error = %err,
                    "delivery failed, scheduled for retry"
                );

                match self.retry_queue.offer(task) {
                    Ok(()) => Delivery::Failed,
                    Err(OfferError::Full(task)) => {
                        warn!(
                            client_id = %client_id,
                            event = %task.event_name(),
                            "retry queue full, dropping task"
                        );
                        Delivery::Dropped
                    }
                    Err(OfferError::Closed(_)) => Delivery::Dropped,
                }
            }
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("send panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("send panicked: {s}")
    } else {
        "send panicked".to_string()
    }
}
