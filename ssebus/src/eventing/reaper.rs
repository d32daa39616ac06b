//! 过期客户端回收（Reaper）
//!
//! 以过期窗口为固定周期运行：最近活跃时间早于 `now - expiration` 的客户端被注销
//! （同时清理其订阅）。新注册客户端的活跃时间取注册时刻，因此至少存活一个窗口。
//!
use crate::registry::ClientRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

pub(crate) struct Reaper {
    registry: Arc<ClientRegistry>,
    expiration: Duration,
}

impl Reaper {
    pub(crate) fn new(registry: Arc<ClientRegistry>, expiration: Duration) -> Self {
        Self {
            registry,
            expiration,
        }
    }

    /// 执行一轮回收，返回被注销的客户端
    pub(crate) fn reap(&self) -> Vec<String> {
        let stale = self.expired();
        for client_id in &stale {
            self.registry.unregister(client_id);
        }
        if !stale.is_empty() {
            info!(count = stale.len(), clients = ?stale, "reaped inactive clients");
        }
        stale
    }

    fn expired(&self) -> Vec<String> {
        if self.registry.is_empty() {
            return Vec::new();
        }
        match Instant::now().checked_sub(self.expiration) {
            Some(cutoff) => self.registry.expired_before(cutoff),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, channel};
    use crate::subscriptions::SubscriptionIndex;

    fn setup(expiration: Duration) -> (Reaper, Arc<ClientRegistry>) {
        let registry = Arc::new(ClientRegistry::new(Arc::new(SubscriptionIndex::new())));
        (Reaper::new(registry.clone(), expiration), registry)
    }

    fn conn(id: &str) -> Arc<dyn Connection> {
        Arc::new(channel(id, 4, None).0)
    }

    #[tokio::test(start_paused = true)]
    async fn reaps_only_silent_clients() {
        let (reaper, registry) = setup(Duration::from_secs(60));
        registry.register("silent", conn("silent"));
        registry.register("active", conn("active"));
        registry.subscriptions().subscribe("silent", "news");

        // 新注册客户端在一个窗口内不会被回收
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(reaper.reap().is_empty());

        registry.touch("active");
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(reaper.reap(), vec!["silent".to_string()]);
        assert!(!registry.contains("silent"));
        assert!(registry.contains("active"));
        assert!(!registry.subscriptions().is_subscribed("silent", "news"));
    }

    #[tokio::test(start_paused = true)]
    async fn reregistration_refreshes_activity() {
        let (reaper, registry) = setup(Duration::from_secs(60));
        registry.register("a", conn("a"));

        tokio::time::advance(Duration::from_secs(50)).await;
        registry.register("a", conn("a"));
        tokio::time::advance(Duration::from_secs(20)).await;

        assert!(reaper.reap().is_empty());
        assert!(registry.contains("a"));
    }
}
