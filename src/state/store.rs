//! SharedState - 视图模型缓存与广播
//!
//! 所有读写都经过一把读写锁保护的内部结构，读者只会看到某个写者完整提交后的结果。
//! 广播在发布闸门内进行，同一视图类型的广播顺序与状态变更顺序一致。

use parking_lot::{ReentrantMutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Instant;
use tracing::{debug, trace};

use super::header::{HeaderEvent, HeaderQueue};
use super::notification::Notification;
use super::types::{StateUpdate, ViewKind, ViewModel};
use crate::utils::{SubscriberRegistry, SubscriptionId};

const DEFAULT_NOTIFICATION_HISTORY: usize = 50;

struct Inner {
    view_models: HashMap<ViewKind, ViewModel>,
    current_view: ViewKind,
    filters: BTreeMap<ViewKind, String>,
    header: HeaderQueue,
    notifications: VecDeque<Notification>,
    next_notification_id: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            view_models: ViewKind::ALL
                .into_iter()
                .map(|kind| (kind, ViewModel::empty(kind)))
                .collect(),
            current_view: ViewKind::default(),
            filters: BTreeMap::new(),
            header: HeaderQueue::new(),
            notifications: VecDeque::new(),
            next_notification_id: 1,
        }
    }

    fn view_model(&self, kind: ViewKind) -> ViewModel {
        self.view_models
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| ViewModel::empty(kind))
    }
}

pub struct SharedState {
    inner: RwLock<Inner>,
    /// 串行化“写入 + 广播”，可重入以允许回调中再次发布
    publish_gate: ReentrantMutex<()>,
    updates: SubscriberRegistry<StateUpdate>,
    notifications: SubscriberRegistry<Notification>,
    notification_limit: usize,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self::with_notification_limit(DEFAULT_NOTIFICATION_HISTORY)
    }

    pub fn with_notification_limit(limit: usize) -> Self {
        let updates = SubscriberRegistry::new();
        let notifications = updates.sharing_ids();
        Self {
            inner: RwLock::new(Inner::new()),
            publish_gate: ReentrantMutex::new(()),
            updates,
            notifications,
            notification_limit: limit.max(1),
        }
    }

    // === 视图模型 ===

    /// 替换负载所声明类型的视图模型并广播
    pub fn update_view_model(&self, view_model: ViewModel) {
        let _gate = self.publish_gate.lock();
        let kind = view_model.kind();
        {
            let mut inner = self.inner.write();
            inner.view_models.insert(kind, view_model.clone());
        }
        trace!("更新视图模型: {}", kind);
        self.updates.notify(&StateUpdate {
            kind,
            view_model,
            partial: false,
        });
    }

    /// 原子地读取-修改-写回并广播
    ///
    /// 闭包在写锁内执行，不能再访问 SharedState。
    pub fn modify_view_model<F, R>(&self, kind: ViewKind, partial: bool, f: F) -> R
    where
        F: FnOnce(&mut ViewModel) -> R,
    {
        let _gate = self.publish_gate.lock();
        let (result, snapshot) = {
            let mut inner = self.inner.write();
            let entry = inner
                .view_models
                .entry(kind)
                .or_insert_with(|| ViewModel::empty(kind));
            let result = f(entry);
            entry.touch();
            (result, entry.clone())
        };
        debug_assert_eq!(snapshot.kind(), kind);
        self.updates.notify(&StateUpdate {
            kind,
            view_model: snapshot,
            partial,
        });
        result
    }

    /// 由已缓存的视图模型计算出一个新的视图模型，写入并广播
    ///
    /// 计算和写入在同一把写锁内完成，闭包看到的输入不会在写入前被替换。
    /// 闭包不能再访问 SharedState。
    pub fn derive_view_model<F>(&self, f: F)
    where
        F: FnOnce(&HashMap<ViewKind, ViewModel>) -> ViewModel,
    {
        let _gate = self.publish_gate.lock();
        let view_model = {
            let mut inner = self.inner.write();
            let view_model = f(&inner.view_models);
            inner
                .view_models
                .insert(view_model.kind(), view_model.clone());
            view_model
        };
        let kind = view_model.kind();
        trace!("派生视图模型: {}", kind);
        self.updates.notify(&StateUpdate {
            kind,
            view_model,
            partial: false,
        });
    }

    /// 不修改内容，重新广播当前的视图模型
    pub fn publish(&self, kind: ViewKind) {
        let _gate = self.publish_gate.lock();
        let view_model = self.inner.read().view_model(kind);
        self.updates.notify(&StateUpdate {
            kind,
            view_model,
            partial: false,
        });
    }

    pub fn view_model(&self, kind: ViewKind) -> ViewModel {
        self.inner.read().view_model(kind)
    }

    pub fn current_view_model(&self) -> ViewModel {
        let inner = self.inner.read();
        inner.view_model(inner.current_view)
    }

    pub fn item_count(&self, kind: ViewKind) -> usize {
        self.inner
            .read()
            .view_models
            .get(&kind)
            .map_or(0, |vm| vm.payload.item_count())
    }

    // === 导航 ===

    pub fn current_view(&self) -> ViewKind {
        self.inner.read().current_view
    }

    /// 切换当前视图，不修改任何缓存内容
    pub fn set_current_view(&self, kind: ViewKind) {
        let mut inner = self.inner.write();
        if inner.current_view != kind {
            debug!("切换视图: {} -> {}", inner.current_view, kind);
            inner.current_view = kind;
        }
    }

    pub fn set_filter(&self, kind: ViewKind, filter: impl Into<String>) {
        let filter = filter.into();
        let mut inner = self.inner.write();
        if filter.is_empty() {
            inner.filters.remove(&kind);
        } else {
            inner.filters.insert(kind, filter);
        }
    }

    pub fn clear_filter(&self, kind: ViewKind) -> Option<String> {
        self.inner.write().filters.remove(&kind)
    }

    pub fn filter(&self, kind: ViewKind) -> Option<String> {
        self.inner.read().filters.get(&kind).cloned()
    }

    pub fn filters(&self) -> BTreeMap<ViewKind, String> {
        self.inner.read().filters.clone()
    }

    // === 头部事件 ===

    pub fn set_header_event(&self, event: HeaderEvent) {
        self.inner.write().header.push(event);
    }

    /// 在界面刷新节拍中调用
    pub fn clear_expired_header_events(&self) -> usize {
        let removed = self.inner.write().header.clear_expired(Instant::now());
        if removed > 0 {
            trace!("清理过期头部事件: {}", removed);
        }
        removed
    }

    pub fn header_events(&self) -> Vec<HeaderEvent> {
        self.inner.read().header.iter().cloned().collect()
    }

    pub fn latest_header_event(&self) -> Option<HeaderEvent> {
        self.inner.read().header.latest().cloned()
    }

    // === 通知 ===

    /// 分配 id、保存到有界历史中并广播给通知订阅者
    pub fn push_notification(&self, mut notification: Notification) -> u64 {
        let _gate = self.publish_gate.lock();
        {
            let mut inner = self.inner.write();
            notification.id = inner.next_notification_id;
            inner.next_notification_id += 1;
            inner.notifications.push_back(notification.clone());
            while inner.notifications.len() > self.notification_limit {
                inner.notifications.pop_front();
            }
        }
        debug!(
            "通知 #{} [{:?}] {}: {}",
            notification.id, notification.kind, notification.title, notification.message
        );
        self.notifications.notify(&notification);
        notification.id
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.read().notifications.iter().cloned().collect()
    }

    pub fn dismiss_notification(&self, id: u64) -> bool {
        let mut inner = self.inner.write();
        let Some(index) = inner.notifications.iter().position(|n| n.id == id) else {
            return false;
        };
        if !inner.notifications[index].dismissable {
            return false;
        }
        inner.notifications.remove(index);
        true
    }

    /// 取出全部待显示通知
    pub fn take_notifications(&self) -> Vec<Notification> {
        self.inner.write().notifications.drain(..).collect()
    }

    // === 订阅 ===

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StateUpdate) -> bool + Send + Sync + 'static,
    {
        self.updates.subscribe(callback)
    }

    pub fn subscribe_notifications<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Notification) -> bool + Send + Sync + 'static,
    {
        self.notifications.subscribe(callback)
    }

    /// 取消任意一种订阅
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.updates.unsubscribe(id) || self.notifications.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.updates.len() + self.notifications.len()
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SharedState")
            .field("current_view", &inner.current_view)
            .field("filters", &inner.filters)
            .field("header_events", &inner.header.len())
            .field("notifications", &inner.notifications.len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
