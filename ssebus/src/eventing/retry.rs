//! 重试调度（RetryScheduler）
//!
//! 以固定间隔（上一轮结束后计时）运行：一次性取出重试队列中的全部任务，
//! 重新校验客户端是否仍订阅该事件，仍订阅的放回发送队列末尾，否则静默丢弃。
//! 重试任务排在较新的任务之后，同一客户端可能先收到新事件再收到重试事件。
//!
//! 每轮还会清理已注销客户端的残留订阅（`ClientRegistry::purge_departed`）。
//!
use crate::queue::{TaskQueue, TaskReceiver};
use crate::registry::ClientRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) struct RetryScheduler {
    registry: Arc<ClientRegistry>,
    send_queue: TaskQueue,
}

impl RetryScheduler {
    pub(crate) fn new(registry: Arc<ClientRegistry>, send_queue: TaskQueue) -> Self {
        Self {
            registry,
            send_queue,
        }
    }

    pub(crate) async fn run(
        self,
        mut retry_rx: TaskReceiver,
        delay: Duration,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.tick(&mut retry_rx) => {}
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!("retry scheduler stopped");
    }

    /// 执行一轮重试调度，返回重新入队的任务数
    pub(crate) async fn tick(&self, retry_rx: &mut TaskReceiver) -> usize {
        let purged = self.registry.purge_departed();
        if purged > 0 {
            debug!(count = purged, "purged subscriptions of unregistered clients");
        }

        let batch = retry_rx.drain();
        if batch.is_empty() {
            return 0;
        }

        let total = batch.len();
        let mut requeued = 0;
        for task in batch {
            if !self
                .registry
                .subscriptions()
                .is_subscribed(task.client_id(), task.event_name())
            {
                debug!(
                    client_id = %task.client_id(),
                    event = %task.event_name(),
                    "subscription gone, dropping retry"
                );
                continue;
            }

            if let Err(err) = self.send_queue.put(task).await {
                warn!(error = %err, "cannot requeue failed deliveries");
                break;
            }
            requeued += 1;
        }

        debug!(total, requeued, "retry batch rescheduled");
        requeued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueKind;
    use crate::event::{Event, OutboundEvent};
    use crate::connection::channel;
    use crate::queue::{DeliveryTask, RETRY_QUEUE, SEND_QUEUE, task_queue};
    use crate::subscriptions::SubscriptionIndex;

    fn registry() -> Arc<ClientRegistry> {
        Arc::new(ClientRegistry::new(Arc::new(SubscriptionIndex::new())))
    }

    fn task(client: &str, event: &str) -> DeliveryTask {
        let ev = Event::of(event, "x");
        DeliveryTask::new(client, Arc::new(OutboundEvent::from_event(&ev, Some("x".into()))))
    }

    #[tokio::test]
    async fn requeues_only_still_subscribed_tasks() {
        let registry = registry();
        registry.subscriptions().subscribe("a", "news");
        registry.subscriptions().subscribe("b", "sport");

        let (send, mut send_rx) = task_queue(SEND_QUEUE, QueueKind::Unbounded);
        let (retry, mut retry_rx) = task_queue(RETRY_QUEUE, QueueKind::Unbounded);
        let scheduler = RetryScheduler::new(registry, send);

        retry.offer(task("a", "news")).unwrap();
        retry.offer(task("b", "news")).unwrap();
        retry.offer(task("c", "news")).unwrap();

        assert_eq!(scheduler.tick(&mut retry_rx).await, 1);
        let requeued = send_rx.drain();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].client_id(), "a");
        assert!(retry_rx.is_empty());
    }

    #[tokio::test]
    async fn preserves_attempt_count() {
        let registry = registry();
        registry.subscriptions().subscribe("a", "news");
        let (send, mut send_rx) = task_queue(SEND_QUEUE, QueueKind::Unbounded);
        let (retry, mut retry_rx) = task_queue(RETRY_QUEUE, QueueKind::Unbounded);
        let scheduler = RetryScheduler::new(registry, send);

        let mut t = task("a", "news");
        t.record_failure();
        retry.offer(t).unwrap();

        scheduler.tick(&mut retry_rx).await;
        assert_eq!(send_rx.take().await.unwrap().attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let registry = registry();
        let (send, _send_rx) = task_queue(SEND_QUEUE, QueueKind::Unbounded);
        let (_retry, retry_rx) = task_queue(RETRY_QUEUE, QueueKind::Unbounded);
        let scheduler = RetryScheduler::new(registry, send);

        let token = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(retry_rx, Duration::from_millis(500), token.clone()));
        tokio::time::sleep(Duration::from_secs(2)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn tick_purges_subscriptions_of_departed_clients() {
        let registry = registry();
        registry.register("a", Arc::new(channel("a", 4, None).0));
        registry.unregister("a");
        registry.subscriptions().subscribe("a", "news");

        let (send, _send_rx) = task_queue(SEND_QUEUE, QueueKind::Unbounded);
        let (_retry, mut retry_rx) = task_queue(RETRY_QUEUE, QueueKind::Unbounded);
        let scheduler = RetryScheduler::new(registry.clone(), send);

        assert_eq!(scheduler.tick(&mut retry_rx).await, 0);
        assert!(registry.subscriptions().is_empty());
    }
}
