//! 发布器（Publisher）
//!
//! 解析事件的目标客户端，负载只转换一次，为每个目标生成一个投递任务并写入发送队列。
//! 发布器只读注册表与订阅索引，从不修改它们。
//!
use crate::converter::ConverterChain;
use crate::error::{BusError, BusResult};
use crate::event::{Event, OutboundEvent};
use crate::queue::{DeliveryTask, SEND_QUEUE, TaskQueue};
use crate::registry::ClientRegistry;
use crate::subscriptions::SubscriptionIndex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) struct Publisher {
    registry: Arc<ClientRegistry>,
    subscriptions: Arc<SubscriptionIndex>,
    converters: ConverterChain,
    send_queue: TaskQueue,
    shutdown: CancellationToken,
}

impl Publisher {
    pub(crate) fn new(
        registry: Arc<ClientRegistry>,
        converters: ConverterChain,
        send_queue: TaskQueue,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            subscriptions: registry.subscriptions().clone(),
            registry,
            converters,
            send_queue,
            shutdown,
        }
    }

    /// 发布事件，返回入队的投递任务数
    ///
    /// 总线已停止（`shutdown` 之后，无论是否已 `join`）时返回 `QueueClosed`，不会静默吞掉。
    pub(crate) async fn publish(&self, event: &Event) -> BusResult<usize> {
        if self.shutdown.is_cancelled() {
            return Err(BusError::QueueClosed { queue: SEND_QUEUE });
        }

        let data = self.converters.resolve(event);
        let recipients = self.recipients(event);
        if recipients.is_empty() {
            debug!(event = %event.name(), "no subscribers for event");
            return Ok(0);
        }

        let message = Arc::new(OutboundEvent::from_event(event, data));
        for client_id in &recipients {
            self.send_queue
                .put(DeliveryTask::new(client_id.as_str(), message.clone()))
                .await?;
        }

        debug!(event = %event.name(), recipients = recipients.len(), "event published");
        Ok(recipients.len())
    }

    /// 定向投递：目标中已订阅者（忽略排除列表）；
    /// 广播：全部已注册客户端中未被排除且已订阅者。
    pub(crate) fn recipients(&self, event: &Event) -> Vec<String> {
        let name = event.name();

        if !event.client_ids().is_empty() {
            let mut seen = HashSet::new();
            return event
                .client_ids()
                .iter()
                .filter(|id| seen.insert(id.as_str()))
                .filter(|id| self.subscriptions.is_subscribed(id, name))
                .cloned()
                .collect();
        }

        let excluded: HashSet<&str> = event
            .exclude_client_ids()
            .iter()
            .map(String::as_str)
            .collect();
        self.registry
            .snapshot()
            .into_iter()
            .filter(|id| !excluded.contains(id.as_str()))
            .filter(|id| self.subscriptions.is_subscribed(id, name))
            .collect()
    }
}
