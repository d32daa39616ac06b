//! 订阅索引（SubscriptionIndex）
//!
//! 事件名 → 订阅该事件的客户端 ID 集合。
//! - 每个事件的更新都在 `DashMap` 分片锁内完成（单事件原子）；
//! - 集合变空时立即移除该事件条目，索引大小与活跃订阅成正比；
//! - 跨事件的批量操作不要求整体原子。
//!
use crate::event::DEFAULT_EVENT;
use dashmap::DashMap;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    events: DashMap<String, HashSet<String>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅事件，事件条目不存在时创建
    pub fn subscribe(&self, client_id: &str, event: &str) {
        self.events
            .entry(event.to_string())
            .or_default()
            .insert(client_id.to_string());
    }

    /// 订阅默认事件（`message`）
    pub fn subscribe_default(&self, client_id: &str) {
        self.subscribe(client_id, DEFAULT_EVENT);
    }

    /// 订阅该事件，并退订其它所有事件
    pub fn subscribe_only(&self, client_id: &str, event: &str) {
        self.subscribe(client_id, event);
        self.unsubscribe_from_all(client_id, &[event]);
    }

    /// 退订事件，集合变空时移除事件条目
    pub fn unsubscribe(&self, client_id: &str, event: &str) {
        self.events.remove_if_mut(event, |_, clients| {
            clients.remove(client_id);
            clients.is_empty()
        });
    }

    /// 退订除 `keep_events` 之外的全部事件；`keep_events` 为空时退订全部
    pub fn unsubscribe_from_all<S: AsRef<str>>(&self, client_id: &str, keep_events: &[S]) {
        let keep: HashSet<&str> = keep_events.iter().map(|e| e.as_ref()).collect();

        // 先收集事件名，避免迭代期间持有分片锁再做删除
        for event in self.event_names() {
            if !keep.contains(event.as_str()) {
                self.unsubscribe(client_id, &event);
            }
        }
    }

    /// 未知事件视为无订阅者
    pub fn is_subscribed(&self, client_id: &str, event: &str) -> bool {
        self.events
            .get(event)
            .is_some_and(|clients| clients.contains(client_id))
    }

    pub fn subscribers(&self, event: &str) -> HashSet<String> {
        self.events
            .get(event)
            .map(|clients| clients.value().clone())
            .unwrap_or_default()
    }

    /// 客户端当前订阅的全部事件
    pub fn events_of(&self, client_id: &str) -> HashSet<String> {
        self.events
            .iter()
            .filter(|entry| entry.value().contains(client_id))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
