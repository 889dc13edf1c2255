//! 前台会话输出轮询
//!
//! 只在有前台会话时运行。每个间隔抓取一次宿主的可见缓冲区，
//! 前台会话切走、宿主退出或收到停止信号后线程自行结束。

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use super::types::SessionId;

/// 轮询目标
pub(crate) trait PollTarget: Send + Sync {
    /// 抓取一次，返回 false 表示应停止轮询
    fn poll_once(&self, session_id: &SessionId) -> bool;
}

pub(crate) struct PollerHandle {
    session_id: SessionId,
    stop_tx: Sender<()>,
    active: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub(crate) fn spawn<T>(target: Weak<T>, session_id: SessionId, interval: Duration) -> Self
    where
        T: PollTarget + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let active = Arc::new(AtomicBool::new(true));
        let thread_active = Arc::clone(&active);
        let thread_session = session_id.clone();
        let interval = interval.max(Duration::from_millis(10));

        let spawned = thread::Builder::new()
            .name(format!("mux-poller-{}", session_id))
            .spawn(move || {
                debug!("开始轮询会话 {}", thread_session);
                loop {
                    let keep_going = match target.upgrade() {
                        Some(target) => target.poll_once(&thread_session),
                        None => false,
                    };
                    if !keep_going {
                        break;
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                thread_active.store(false, Ordering::Release);
                debug!("停止轮询会话 {}", thread_session);
            });

        let thread = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("无法创建轮询线程: {}", e);
                active.store(false, Ordering::Release);
                None
            }
        };

        Self {
            session_id,
            stop_tx,
            active,
            thread,
        }
    }

    pub(crate) fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// 发送停止信号，不等待线程结束
    pub(crate) fn stop(mut self) {
        let _ = self.stop_tx.try_send(());
        self.thread.take();
    }

    /// 发送停止信号并等待线程结束
    pub(crate) fn join(mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("轮询线程异常退出: {}", self.session_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct Counter {
        polls: AtomicUsize,
        limit: usize,
    }

    impl PollTarget for Counter {
        fn poll_once(&self, _session_id: &SessionId) -> bool {
            self.polls.fetch_add(1, Ordering::SeqCst) + 1 < self.limit
        }
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn stops_when_target_declines() {
        let target = Arc::new(Counter {
            polls: AtomicUsize::new(0),
            limit: 3,
        });
        let handle = PollerHandle::spawn(
            Arc::downgrade(&target),
            SessionId::from("s"),
            Duration::from_millis(10),
        );
        assert!(wait_until(|| !handle.is_active()));
        assert_eq!(target.polls.load(Ordering::SeqCst), 3);
        handle.join();
    }

    #[test]
    fn stop_signal_ends_polling() {
        let target = Arc::new(Counter {
            polls: AtomicUsize::new(0),
            limit: usize::MAX,
        });
        let handle = PollerHandle::spawn(
            Arc::downgrade(&target),
            SessionId::from("s"),
            Duration::from_millis(10),
        );
        assert!(wait_until(|| target.polls.load(Ordering::SeqCst) >= 2));
        handle.join();
        let after = target.polls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(target.polls.load(Ordering::SeqCst), after);
    }

    #[test]
    fn dropped_target_ends_polling() {
        let target = Arc::new(Counter {
            polls: AtomicUsize::new(0),
            limit: usize::MAX,
        });
        let handle = PollerHandle::spawn(
            Arc::downgrade(&target),
            SessionId::from("s"),
            Duration::from_millis(10),
        );
        drop(target);
        assert!(wait_until(|| !handle.is_active()));
    }
}
