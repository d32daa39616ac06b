//! 后台任务编排
//!
//! 启动总线的三个长驻任务并返回 `BusHandle`：
//! - 投递循环（长循环，唯一的串行消费者）；
//! - 重试调度（固定间隔）；
//! - 过期回收（固定周期）。
//!
//! 关闭时取消令牌，各任务立即退出，队列中尚未投递的任务直接丢弃。
//!
use super::{DeliveryWorker, Reaper, RetryScheduler};
use crate::config::BusConfig;
use crate::queue::{TaskQueue, TaskReceiver};
use crate::registry::ClientRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 启动后台任务所需的全部部件
pub(crate) struct EngineParts {
    pub(crate) config: BusConfig,
    pub(crate) registry: Arc<ClientRegistry>,
    pub(crate) send_queue: TaskQueue,
    pub(crate) retry_queue: TaskQueue,
    pub(crate) send_rx: TaskReceiver,
    pub(crate) retry_rx: TaskReceiver,
    /// 与发布器共享：取消后发布立即返回 `QueueClosed`
    pub(crate) token: CancellationToken,
}

pub(crate) fn start(parts: EngineParts) -> BusHandle {
    let EngineParts {
        config,
        registry,
        send_queue,
        retry_queue,
        send_rx,
        retry_rx,
        token,
    } = parts;

    let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(3);

    // delivery worker（长循环）
    let worker = DeliveryWorker::new(registry.clone(), retry_queue, config.max_send_attempts);
    tasks.push(tokio::spawn(worker.run(send_rx, token.clone())));

    // retry scheduler（固定间隔）
    let scheduler = RetryScheduler::new(registry.clone(), send_queue);
    tasks.push(tokio::spawn(scheduler.run(
        retry_rx,
        config.retry_delay,
        token.clone(),
    )));

    // reaper（固定周期）
    let reaper = Arc::new(Reaper::new(registry, config.client_expiration));
    tasks.push(spawn_periodic(
        token.clone(),
        config.client_expiration,
        move || {
            let reaper = reaper.clone();
            async move {
                reaper.reap();
            }
        },
    ));

    info!(
        max_send_attempts = config.max_send_attempts,
        client_expiration = ?config.client_expiration,
        retry_delay = ?config.retry_delay,
        "event bus started"
    );
    BusHandle { token, tasks }
}

fn spawn_periodic<F, Fut>(token: CancellationToken, interval: Duration, mut f: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => f().await,
            }
        }
    })
}

/// 总线运行句柄：用于关闭与等待后台任务结束
///
/// 句柄被 drop 时同样会取消后台任务。
pub struct BusHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl BusHandle {
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("event bus shutting down");
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }
    }
}

impl Drop for BusHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
