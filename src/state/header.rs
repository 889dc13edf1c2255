//! 头部滚动区的短时状态消息

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::notification::Severity;

/// 队列上限
pub const HEADER_QUEUE_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderEvent {
    pub message: String,
    pub severity: Severity,
    pub created: Instant,
    pub expiry: Duration,
    /// 常驻消息不会按时间过期，只在下一条事件到来时移除
    pub persistent: bool,
}

impl HeaderEvent {
    pub fn new(message: impl Into<String>, severity: Severity, expiry: Duration) -> Self {
        Self {
            message: message.into(),
            severity,
            created: Instant::now(),
            expiry,
            persistent: false,
        }
    }

    pub fn persistent(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            persistent: true,
            ..Self::new(message, severity, Duration::ZERO)
        }
    }

    pub fn created_at(mut self, created: Instant) -> Self {
        self.created = created;
        self
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        !self.persistent && now.saturating_duration_since(self.created) >= self.expiry
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeaderQueue {
    events: VecDeque<HeaderEvent>,
}

impl HeaderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 推入新事件
    ///
    /// 先移除所有常驻消息；与最新一条消息相同则只刷新时间戳，
    /// 否则追加并裁剪到最近的 [`HEADER_QUEUE_LIMIT`] 条。
    /// 重复检测只比较最新一条。
    pub fn push(&mut self, event: HeaderEvent) {
        self.events.retain(|e| !e.persistent);

        if let Some(latest) = self.events.back_mut() {
            if latest.message == event.message {
                latest.created = event.created;
                return;
            }
        }

        self.events.push_back(event);
        while self.events.len() > HEADER_QUEUE_LIMIT {
            self.events.pop_front();
        }
    }

    /// 移除已过期的消息，返回移除数量
    pub fn clear_expired(&mut self, now: Instant) -> usize {
        let before = self.events.len();
        self.events.retain(|e| !e.is_expired(now));
        before - self.events.len()
    }

    pub fn latest(&self) -> Option<&HeaderEvent> {
        self.events.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
