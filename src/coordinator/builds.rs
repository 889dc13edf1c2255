//! 单飞构建跟踪
//!
//! 同一时刻最多一个构建在逻辑上运行。新构建启动时只向上一个构建发出取消信号，
//! 不等待它结束；新构建在汇报自己的结果之前等待上一个构建完成。

use chrono::Utc;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::views::{builds_mut, refresh_dashboard};
use super::TaskContext;
use crate::services::{BuildEvent, BuildTarget};
use crate::state::{
    ActiveBuild, BuildOutputLine, BuildRecord, BuildStatus, HeaderEvent, Notification, Severity,
    ViewKind,
};
use crate::utils::error_chain_message;

/// 构建结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Succeeded,
    Failed(String),
    /// 被取消，区别于失败
    Cancelled,
}

struct InFlight {
    id: u64,
    label: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct BuildTracker {
    current: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
}

impl BuildTracker {
    /// 取消上一个构建并启动新的构建
    ///
    /// `spawn` 接收新构建的任务并返回其句柄。
    pub(crate) fn start<S>(
        &self,
        ctx: TaskContext,
        target: BuildTarget,
        token: CancellationToken,
        spawn: S,
    ) -> u64
    where
        S: FnOnce(std::pin::Pin<Box<dyn Future<Output = ()> + Send>>) -> JoinHandle<()>,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let label = target.label();

        let mut current = self.current.lock();
        let predecessor = current.take().map(|previous| {
            info!("取消构建 #{} ({})，由 #{} 取代", previous.id, previous.label, id);
            previous.token.cancel();
            previous.handle
        });

        let handle = spawn(Box::pin(run_build(
            ctx,
            id,
            target,
            token.clone(),
            predecessor,
        )));
        *current = Some(InFlight {
            id,
            label,
            token,
            handle,
        });
        id
    }

    /// 取消当前构建，返回是否有构建在运行
    pub(crate) fn cancel(&self) -> bool {
        match self.current.lock().as_ref() {
            Some(build) if !build.handle.is_finished() => {
                info!("取消构建 #{} ({})", build.id, build.label);
                build.token.cancel();
                true
            }
            _ => false,
        }
    }

    pub(crate) fn in_flight(&self) -> Option<String> {
        self.current
            .lock()
            .as_ref()
            .filter(|build| !build.handle.is_finished())
            .map(|build| build.label.clone())
    }
}

fn apply_build_event(ctx: &TaskContext, build_id: u64, event: BuildEvent) {
    let limit = ctx.config.coordinator.build_output_limit;
    let (is_error, text) = match event {
        BuildEvent::Started { label } => {
            debug!("构建步骤开始: {}", label);
            (false, format!("==> {}", label))
        }
        BuildEvent::Output { line } => (false, line),
        BuildEvent::Error { line } => (true, line),
        BuildEvent::Finished { label, success } => {
            debug!("构建步骤结束: {} success={}", label, success);
            (!success, format!("<== {} ({})", label, if success { "ok" } else { "failed" }))
        }
    };

    ctx.state.modify_view_model(ViewKind::Builds, true, |vm| {
        builds_mut(vm, |builds| {
            builds.push_output(
                BuildOutputLine {
                    build_id,
                    is_error,
                    text,
                },
                limit,
            )
        })
    });
}

#[instrument(skip(ctx, token, predecessor), fields(label = %target.label()))]
async fn run_build(
    ctx: TaskContext,
    id: u64,
    target: BuildTarget,
    token: CancellationToken,
    predecessor: Option<JoinHandle<()>>,
) {
    let label = target.label();
    let started_at = Utc::now();

    // 在写锁内检查取消，已被取代的构建不会覆盖后继者的运行状态
    let superseded = ctx.state.modify_view_model(ViewKind::Builds, true, |vm| {
        builds_mut(vm, |builds| {
            if token.is_cancelled() {
                return true;
            }
            builds.active = Some(ActiveBuild {
                id,
                label: label.clone(),
                started_at,
            });
            builds.output.clear();
            false
        })
    });
    if !superseded {
        ctx.state.set_header_event(HeaderEvent::persistent(
            format!("Building {}", label),
            Severity::Info,
        ));
        info!("构建 #{} 开始: {}", id, label);
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = std::sync::Arc::clone(&ctx.services.builds);
    let build = orchestrator.build(target, tx, token.clone());
    tokio::pin!(build);

    let outcome = loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break BuildOutcome::Cancelled,
            Some(event) = rx.recv() => apply_build_event(&ctx, id, event),
            result = &mut build => {
                break match result {
                    _ if token.is_cancelled() => BuildOutcome::Cancelled,
                    Ok(()) => BuildOutcome::Succeeded,
                    Err(e) => BuildOutcome::Failed(error_chain_message(&e)),
                };
            }
        }
    };

    if outcome != BuildOutcome::Cancelled {
        while let Ok(event) = rx.try_recv() {
            apply_build_event(&ctx, id, event);
        }
    }

    // 被取代的构建先汇报
    if let Some(previous) = predecessor {
        if let Err(e) = previous.await {
            warn!("上一个构建任务异常结束: {}", e);
        }
    }

    report_outcome(&ctx, id, &label, started_at, outcome);
}

fn report_outcome(
    ctx: &TaskContext,
    id: u64,
    label: &str,
    started_at: chrono::DateTime<Utc>,
    outcome: BuildOutcome,
) {
    let expiry = ctx.config.header.default_expiry();
    let (status, notification, message) = match &outcome {
        BuildOutcome::Cancelled => {
            info!("构建 #{} 已取消: {}", id, label);
            (
                BuildStatus::Cancelled,
                Notification::warning("Build Cancelled", format!("{} build was cancelled", label)),
                None,
            )
        }
        BuildOutcome::Succeeded => {
            info!("构建 #{} 成功: {}", id, label);
            (
                BuildStatus::Succeeded,
                Notification::success("Build Complete", format!("{} built successfully", label)),
                None,
            )
        }
        BuildOutcome::Failed(reason) => {
            warn!("构建 #{} 失败: {}: {}", id, label, reason);
            (
                BuildStatus::Failed,
                Notification::error("Build Failed", format!("{} build failed: {}", label, reason)),
                Some(reason.clone()),
            )
        }
    };

    let history_limit = ctx.config.coordinator.build_history_limit;
    ctx.state.modify_view_model(ViewKind::Builds, false, |vm| {
        builds_mut(vm, |builds| {
            builds.push_history(
                BuildRecord {
                    id,
                    label: label.to_string(),
                    status,
                    started_at,
                    finished_at: Utc::now(),
                    message,
                },
                history_limit,
            );
            if builds.active.as_ref().is_some_and(|active| active.id == id) {
                builds.active = None;
            }
        })
    });

    ctx.state.set_header_event(HeaderEvent::new(
        notification.message.clone(),
        notification.kind,
        expiry,
    ));
    ctx.state.push_notification(notification);
    refresh_dashboard(&ctx.state);
}
