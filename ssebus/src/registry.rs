//! 客户端注册表（ClientRegistry）
//!
//! 客户端 ID → 客户端记录（当前连接 + 最近活跃时间）。
//! 注销时同步清理该客户端在订阅索引中的全部订阅，并记录该客户端；
//! 与注销并发写入的残留订阅由 `purge_departed` 在下一次重试调度时清理。
//!
use crate::connection::Connection;
use crate::subscriptions::SubscriptionIndex;
use dashmap::{DashMap, DashSet};
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// 单个客户端的记录
#[derive(Clone)]
pub struct ClientRecord {
    connection: Arc<dyn Connection>,
    last_activity: Instant,
}

impl ClientRecord {
    fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            last_activity: Instant::now(),
        }
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }
}

impl fmt::Debug for ClientRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRecord")
            .field("last_activity", &self.last_activity)
            .finish_non_exhaustive()
    }
}

pub struct ClientRegistry {
    clients: DashMap<String, ClientRecord>,
    subscriptions: Arc<SubscriptionIndex>,
    departed: DashSet<String>,
}

impl ClientRegistry {
    pub fn new(subscriptions: Arc<SubscriptionIndex>) -> Self {
        Self {
            clients: DashMap::new(),
            subscriptions,
            departed: DashSet::new(),
        }
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionIndex> {
        &self.subscriptions
    }

    /// 注册客户端；已存在时原地替换连接（保留订阅），返回是否为新客户端
    pub fn register(&self, client_id: &str, connection: Arc<dyn Connection>) -> bool {
        match self.clients.entry(client_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                record.connection = connection;
                record.last_activity = Instant::now();
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(ClientRecord::new(connection));
                true
            }
        }
    }

    /// 注销客户端并清理其订阅；未知 ID 为 no-op。返回被移除的连接
    pub fn unregister(&self, client_id: &str) -> Option<Arc<dyn Connection>> {
        self.subscriptions.unsubscribe_from_all::<&str>(client_id, &[]);
        let (_, record) = self.clients.remove(client_id)?;
        self.departed.insert(client_id.to_string());
        Some(record.connection)
    }

    /// 清理已注销客户端的残留订阅（注销期间并发 `subscribe` 写入的），
    /// 已重新注册的客户端不受影响。返回被清理的客户端数
    pub fn purge_departed(&self) -> usize {
        let departed: Vec<String> = self.departed.iter().map(|id| id.key().clone()).collect();

        let mut purged = 0;
        for client_id in departed {
            self.departed.remove(&client_id);
            if self.contains(&client_id) {
                continue;
            }
            if !self.subscriptions.events_of(&client_id).is_empty() {
                self.subscriptions
                    .unsubscribe_from_all::<&str>(&client_id, &[]);
                purged += 1;
            }
        }
        purged
    }

    /// 刷新最近活跃时间（仅在确认投递成功后调用）
    pub fn touch(&self, client_id: &str) {
        if let Some(mut record) = self.clients.get_mut(client_id) {
            record.last_activity = Instant::now();
        }
    }

    /// 当前连接（可能已被重连替换，因此投递时需重新解析）
    pub fn connection(&self, client_id: &str) -> Option<Arc<dyn Connection>> {
        self.clients
            .get(client_id)
            .map(|record| record.connection.clone())
    }

    pub fn get(&self, client_id: &str) -> Option<ClientRecord> {
        self.clients.get(client_id).map(|record| record.value().clone())
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    /// 当前全部客户端 ID 的弱一致快照，并发修改期间迭代安全
    pub fn snapshot(&self) -> Vec<String> {
        self.clients.iter().map(|entry| entry.key().clone()).collect()
    }

    /// 最近活跃时间早于 `cutoff` 的客户端
    pub fn expired_before(&self, cutoff: Instant) -> Vec<String> {
        self.clients
            .iter()
            .filter(|entry| entry.value().last_activity < cutoff)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
