//! 订阅者注册表
//!
//! 以订阅句柄为键保存回调，支持显式取消订阅。回调返回 `false` 或发生 panic
//! 时会被自动移除，避免反复分离/重连后回调列表无限增长。

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// 订阅句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// 订阅者回调函数类型，返回 false 表示取消订阅
pub type SubscriberCallback<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

pub struct SubscriberRegistry<T> {
    subscribers: RwLock<BTreeMap<SubscriptionId, SubscriberCallback<T>>>,
    next_id: Arc<AtomicU64>,
}

impl<T> SubscriberRegistry<T> {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(BTreeMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// 创建与当前注册表共享句柄计数器的新注册表，两者分配的句柄互不重复
    pub fn sharing_ids<U>(&self) -> SubscriberRegistry<U> {
        SubscriberRegistry {
            subscribers: RwLock::new(BTreeMap::new()),
            next_id: Arc::clone(&self.next_id),
        }
    }

    /// 注册回调，只接收之后的通知，不回放历史
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().insert(id, Box::new(callback));
        debug!("添加订阅者: {}", id);
        id
    }

    /// 取消订阅
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            debug!("移除订阅者: {}", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    pub fn clear(&self) {
        let mut subscribers = self.subscribers.write();
        let count = subscribers.len();
        subscribers.clear();
        debug!("清理了 {} 个订阅者", count);
    }

    /// 按订阅顺序发送通知给所有订阅者
    ///
    /// 回调内可以再次触发通知，但不能在回调内订阅或取消订阅
    pub fn notify(&self, value: &T) {
        let mut dead_subscribers = Vec::new();

        {
            let subscribers = self.subscribers.read_recursive();
            for (&id, callback) in subscribers.iter() {
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(value))) {
                    Ok(true) => trace!("订阅者 {} 处理通知成功", id),
                    Ok(false) => {
                        debug!("订阅者 {} 请求取消订阅", id);
                        dead_subscribers.push(id);
                    }
                    Err(_) => {
                        error!("订阅者 {} 回调panic", id);
                        dead_subscribers.push(id);
                    }
                }
            }
        }

        if !dead_subscribers.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in dead_subscribers {
                subscribers.remove(&id);
                debug!("清理无效订阅者: {}", id);
            }
        }
    }
}

impl<T> Default for SubscriberRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SubscriberRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscriber_count", &self.len())
            .finish()
    }
}
