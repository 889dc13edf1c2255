//! 协调器入口

use anyhow::Context;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::builds::BuildTracker;
use super::error::IntentError;
use super::event::{Event, EventKind};
use super::handlers::{handler_table, Handler};
use super::views::{refresh_all, refresh_dashboard, refresh_sessions};
use super::TaskContext;
use crate::config::ConfigHandle;
use crate::mux::SessionMultiplexer;
use crate::services::Services;
use crate::state::{Notification, SharedState, StateUpdate, ViewKind, ViewModel};
use crate::utils::{AppResult, SubscriptionId};

pub struct EventCoordinator {
    pub(super) ctx: TaskContext,
    handlers: HashMap<EventKind, Handler>,
    pub(super) builds: BuildTracker,
    tasks: TaskTracker,
    root: CancellationToken,
    runtime: Handle,
    mux_subscription: SubscriptionId,
}

impl EventCoordinator {
    /// 创建协调器，必须在 tokio 运行时中调用
    pub fn new(
        config: ConfigHandle,
        state: Arc<SharedState>,
        services: Services,
        mux: Arc<SessionMultiplexer>,
    ) -> AppResult<Self> {
        let runtime = Handle::try_current().context("事件协调器需要在 tokio 运行时中创建")?;

        let ctx = TaskContext {
            state,
            services,
            config,
            mux,
        };

        // 会话列表变化时刷新会话视图
        let weak_mux = Arc::downgrade(&ctx.mux);
        let listener = Arc::clone(&ctx.state);
        let mux_subscription = ctx.mux.subscribe(move |notification| {
            let Some(mux) = weak_mux.upgrade() else {
                return false;
            };
            if notification.affects_session_list() {
                refresh_sessions(&listener, &mux);
                refresh_dashboard(&listener);
            }
            true
        });

        info!("事件协调器已创建");
        Ok(Self {
            ctx,
            handlers: handler_table(),
            builds: BuildTracker::default(),
            tasks: TaskTracker::new(),
            root: CancellationToken::new(),
            runtime,
            mux_subscription,
        })
    }

    /// 分发一个意图
    ///
    /// 耗时操作在后台任务中执行，本方法不会阻塞。
    pub fn handle_event(&self, event: Event) -> Result<(), IntentError> {
        if self.root.is_cancelled() {
            return Err(IntentError::ShutDown);
        }
        let handler = self
            .handlers
            .get(&event.kind)
            .ok_or_else(|| IntentError::UnknownEventKind(event.kind.as_str().to_string()))?;
        debug!("处理意图: {}", event.kind);
        handler(self, event)
    }

    /// 解析并分发一行文本意图
    pub fn handle_line(&self, line: &str) -> Result<(), IntentError> {
        self.handle_event(Event::parse_line(line)?)
    }

    pub fn get_view_model(&self, kind: &str) -> Result<ViewModel, IntentError> {
        let kind: ViewKind = kind.parse()?;
        Ok(self.ctx.state.view_model(kind))
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.ctx.state
    }

    pub fn multiplexer(&self) -> &Arc<SessionMultiplexer> {
        &self.ctx.mux
    }

    /// 只接收之后的广播，不回放
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StateUpdate) -> bool + Send + Sync + 'static,
    {
        self.ctx.state.subscribe(callback)
    }

    pub fn subscribe_notifications<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Notification) -> bool + Send + Sync + 'static,
    {
        self.ctx.state.subscribe_notifications(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.ctx.state.unsubscribe(id)
    }

    /// 重新拉取项目、仓库状态、进程和会话，广播所有视图类型
    pub async fn refresh(&self) {
        refresh_all(&self.ctx).await;
    }

    /// 当前正在运行的构建标签
    pub fn active_build(&self) -> Option<String> {
        self.builds.in_flight()
    }

    /// 等待目前已派发的所有任务结束
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// 取消根作用域，运行中的构建会观察到取消
    pub fn shutdown(&self) {
        if self.root.is_cancelled() {
            return;
        }
        info!("事件协调器关闭，{} 个任务仍在运行", self.tasks.len());
        self.root.cancel();
        self.tasks.close();
    }

    pub fn root_token(&self) -> CancellationToken {
        self.root.clone()
    }

    pub(super) fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    pub(super) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn_on(task, &self.runtime);
    }

    pub(super) fn spawn_handle<F>(&self, task: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn_on(task, &self.runtime)
    }
}

impl Drop for EventCoordinator {
    fn drop(&mut self) {
        self.ctx.mux.unsubscribe(self.mux_subscription);
        self.root.cancel();
    }
}

impl std::fmt::Debug for EventCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCoordinator")
            .field("handlers", &self.handlers.len())
            .field("tasks", &self.tasks.len())
            .field("cancelled", &self.root.is_cancelled())
            .finish()
    }
}
