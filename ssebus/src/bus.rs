//! 事件总线（EventBus）
//!
//! 对外的唯一入口：客户端注册/注销、订阅管理与事件发布。
//! 总线实例持有注册表、订阅索引与两条工作队列，`start` 后由后台任务驱动投递、
//! 重试与回收；没有任何进程级全局状态。
//!
//! 典型用法：
//! 1. `EventBus::builder().config(..).converters(..).build()?` 构造总线；
//! 2. `bus.start()?` 启动后台任务并持有返回的 `BusHandle`；
//! 3. 传输层为每个请求调用 `create_connection` 获取 `EventStream` 并写回客户端；
//! 4. 业务侧调用 `publish` 发布事件。
//!
use crate::config::BusConfig;
use crate::connection::{self, Connection, EventStream};
use crate::converter::{ConverterChain, PayloadConverter};
use crate::error::{BusError, BusResult};
use crate::event::Event;
use crate::eventing::engine::{self, EngineParts};
use crate::eventing::{BusHandle, Publisher};
use crate::queue::{RETRY_QUEUE, SEND_QUEUE, TaskQueue, TaskReceiver, task_queue};
use crate::registry::ClientRegistry;
use crate::subscriptions::SubscriptionIndex;
use bon::{Builder, bon};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// `create_connection` 的参数
#[derive(Clone, Debug, Default, Builder)]
pub struct ConnectOptions {
    /// 连接空闲超时；未设置时使用 `BusConfig::default_timeout`
    timeout: Option<Duration>,
    /// 为 true 时先退订 `events` 以外的全部事件
    #[builder(default)]
    unsubscribe_first: bool,
    /// 需要订阅的事件
    #[builder(default)]
    events: Vec<String>,
}

impl ConnectOptions {
    /// 仅订阅给定事件的快捷构造
    pub fn events<I, S>(events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            events: events.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// 进程内事件总线（可廉价克隆，克隆共享同一份状态）
#[derive(Clone)]
pub struct EventBus {
    config: BusConfig,
    registry: Arc<ClientRegistry>,
    subscriptions: Arc<SubscriptionIndex>,
    publisher: Arc<Publisher>,
    send_queue: TaskQueue,
    retry_queue: TaskQueue,
    receivers: Arc<Mutex<Option<(TaskReceiver, TaskReceiver)>>>,
    shutdown: CancellationToken,
}

#[bon]
impl EventBus {
    /// 构造总线（尚未启动后台任务）
    #[builder]
    pub fn new(
        #[builder(default)] config: BusConfig,
        #[builder(default)] converters: Vec<Arc<dyn PayloadConverter>>,
    ) -> BusResult<Self> {
        config.validate()?;

        let subscriptions = Arc::new(SubscriptionIndex::new());
        let registry = Arc::new(ClientRegistry::new(subscriptions.clone()));
        let (send_queue, send_rx) = task_queue(SEND_QUEUE, config.send_queue);
        let (retry_queue, retry_rx) = task_queue(RETRY_QUEUE, config.retry_queue);
        let shutdown = CancellationToken::new();
        let publisher = Publisher::new(
            registry.clone(),
            ConverterChain::new(converters),
            send_queue.clone(),
            shutdown.clone(),
        );

        Ok(Self {
            config,
            registry,
            subscriptions,
            publisher: Arc::new(publisher),
            send_queue,
            retry_queue,
            receivers: Arc::new(Mutex::new(Some((send_rx, retry_rx)))),
            shutdown,
        })
    }
}

impl EventBus {
    /// 启动投递循环、重试调度与过期回收；只能启动一次
    pub fn start(&self) -> BusResult<BusHandle> {
        let taken = self
            .receivers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some((send_rx, retry_rx)) = taken else {
            return Err(BusError::AlreadyStarted);
        };

        Ok(engine::start(EngineParts {
            config: self.config,
            registry: self.registry.clone(),
            send_queue: self.send_queue.clone(),
            retry_queue: self.retry_queue.clone(),
            send_rx,
            retry_rx,
            token: self.shutdown.clone(),
        }))
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionIndex> {
        &self.subscriptions
    }

    /// 创建通道连接并注册客户端，按需订阅事件；返回交给传输层的 `EventStream`
    pub fn create_connection(&self, client_id: &str, options: ConnectOptions) -> EventStream {
        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        let (connection, stream) =
            connection::channel(client_id, self.config.connection_buffer, Some(timeout));
        let connection = connection.with_send_timeout(self.config.connection_send_timeout);
        self.register_client(client_id, Arc::new(connection));

        if !options.events.is_empty() {
            if options.unsubscribe_first {
                self.unsubscribe_from_all_events(client_id, options.events.as_slice());
            }
            for event in &options.events {
                self.subscribe(client_id, event);
            }
        }

        stream
    }

    /// 注册客户端；已存在时替换连接并保留订阅
    pub fn register_client(&self, client_id: &str, connection: Arc<dyn Connection>) {
        let created = self.registry.register(client_id, connection);
        debug!(client_id = %client_id, created, "client registered");
    }

    /// 注销客户端并清理其全部订阅
    pub fn unregister_client(&self, client_id: &str) {
        if self.registry.unregister(client_id).is_some() {
            debug!(client_id = %client_id, "client unregistered");
        }
    }

    pub fn subscribe(&self, client_id: &str, event: &str) {
        self.subscriptions.subscribe(client_id, event);
    }

    /// 订阅默认事件（`message`）
    pub fn subscribe_default(&self, client_id: &str) {
        self.subscriptions.subscribe_default(client_id);
    }

    /// 订阅该事件并退订其它全部事件
    pub fn subscribe_only(&self, client_id: &str, event: &str) {
        self.subscriptions.subscribe_only(client_id, event);
    }

    pub fn unsubscribe(&self, client_id: &str, event: &str) {
        self.subscriptions.unsubscribe(client_id, event);
    }

    /// 退订除 `keep_events` 外的全部事件；`keep_events` 为空时退订全部
    pub fn unsubscribe_from_all_events<S: AsRef<str>>(&self, client_id: &str, keep_events: &[S]) {
        self.subscriptions.unsubscribe_from_all(client_id, keep_events);
    }

    pub fn is_subscribed(&self, client_id: &str, event: &str) -> bool {
        self.subscriptions.is_subscribed(client_id, event)
    }

    pub fn subscribers(&self, event: &str) -> HashSet<String> {
        self.subscriptions.subscribers(event)
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// 发布事件，返回入队的投递任务数
    ///
    /// 单个客户端的投递失败不会反馈给发布方；`BusHandle::shutdown` 之后返回 `QueueClosed`。
    pub async fn publish(&self, event: Event) -> BusResult<usize> {
        self.publisher.publish(&event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueKind;

    #[tokio::test]
    async fn rejects_invalid_config() {
        let cfg = BusConfig::builder().max_send_attempts(0).build();
        assert!(matches!(
            EventBus::builder().config(cfg).build(),
            Err(BusError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn start_only_once() {
        let bus = EventBus::builder().build().unwrap();
        let handle = bus.start().unwrap();
        assert!(matches!(bus.start(), Err(BusError::AlreadyStarted)));
        handle.shutdown();
        handle.join().await;
    }

    #[tokio::test]
    async fn create_connection_subscribes_events() {
        let bus = EventBus::builder().build().unwrap();
        bus.subscribe("a", "old");

        let opts = ConnectOptions::builder()
            .events(vec!["e1".into(), "e2".into()])
            .unsubscribe_first(true)
            .build();
        let stream = bus.create_connection("a", opts);

        assert_eq!(stream.client_id(), "a");
        assert_eq!(stream.idle_timeout(), Some(bus.config().default_timeout));
        assert!(bus.registry().contains("a"));
        assert!(bus.is_subscribed("a", "e1"));
        assert!(bus.is_subscribed("a", "e2"));
        assert!(!bus.is_subscribed("a", "old"));
    }

    #[tokio::test]
    async fn create_connection_keeps_other_subscriptions_by_default() {
        let bus = EventBus::builder().build().unwrap();
        bus.subscribe("a", "old");

        let _stream = bus.create_connection("a", ConnectOptions::events(["new"]));
        assert!(bus.is_subscribed("a", "old"));
        assert!(bus.is_subscribed("a", "new"));

        // 无事件时不自动订阅
        let _other = bus.create_connection("b", ConnectOptions::default());
        assert!(bus.subscriptions().events_of("b").is_empty());
    }

    #[tokio::test]
    async fn publish_after_shutdown_fails() {
        let cfg = BusConfig::builder()
            .send_queue(QueueKind::Bounded { capacity: 8 })
            .build();
        let bus = EventBus::builder().config(cfg).build().unwrap();
        let _stream = bus.create_connection("a", ConnectOptions::events(["news"]));

        let handle = bus.start().unwrap();
        handle.shutdown();
        handle.join().await;

        assert!(matches!(
            bus.publish(Event::of("news", "x")).await,
            Err(BusError::QueueClosed { .. })
        ));
    }

    #[tokio::test]
    async fn publish_between_shutdown_and_join_fails() {
        let bus = EventBus::builder().build().unwrap();
        let _stream = bus.create_connection("a", ConnectOptions::events(["news"]));

        let handle = bus.start().unwrap();
        handle.shutdown();

        assert!(matches!(
            bus.publish(Event::of("news", "x")).await,
            Err(BusError::QueueClosed { .. })
        ));
        handle.join().await;
    }
}
