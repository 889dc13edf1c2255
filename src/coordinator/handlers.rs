//! 意图处理表
//!
//! 每个事件类型对应一个处理函数。同步处理函数直接修改 SharedState 并广播，
//! 耗时操作派发到后台任务，结果通过 SharedState 返回。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use super::dispatcher::EventCoordinator;
use super::error::IntentError;
use super::event::{Event, EventKind};
use super::views::{
    git_mut, refresh_all, refresh_dashboard, refresh_git, refresh_processes, refresh_projects,
    refresh_repository,
};
use super::TaskContext;
use crate::mux::{MuxError, SessionId, SessionKind};
use crate::services::{BuildTarget, ProcessAction, Project};
use crate::state::{GitDetail, Notification, ViewKind};
use crate::utils::error_chain_message;

pub(crate) type Handler = fn(&EventCoordinator, Event) -> Result<(), IntentError>;

const DEFAULT_LOG_LIMIT: usize = 20;

pub(crate) fn handler_table() -> HashMap<EventKind, Handler> {
    let mut table: HashMap<EventKind, Handler> = HashMap::new();
    table.insert(EventKind::BuildStart, build_start);
    table.insert(EventKind::BuildCancel, build_cancel);
    for kind in [
        EventKind::ProcessStart,
        EventKind::ProcessStop,
        EventKind::ProcessRestart,
        EventKind::ProcessKill,
        EventKind::ProcessPause,
        EventKind::ProcessResume,
    ] {
        table.insert(kind, process_control);
    }
    table.insert(EventKind::FilterSet, filter_set);
    table.insert(EventKind::FilterClear, filter_clear);
    table.insert(EventKind::ViewSwitch, view_switch);
    table.insert(EventKind::Refresh, refresh);
    table.insert(EventKind::ProjectAdd, project_add);
    table.insert(EventKind::ProjectRemove, project_remove);
    table.insert(EventKind::GitStatus, git_status);
    table.insert(EventKind::GitDiff, git_diff);
    table.insert(EventKind::GitLog, git_log);
    table.insert(EventKind::SessionCreate, session_create);
    table.insert(EventKind::SessionStart, session_start);
    table.insert(EventKind::SessionStop, session_stop);
    table.insert(EventKind::SessionDelete, session_delete);
    table.insert(EventKind::SessionRename, session_rename);
    table.insert(EventKind::SessionFocus, session_focus);
    table.insert(EventKind::SessionBlur, session_blur);
    table
}

fn notify_error(ctx: &TaskContext, title: &str, message: String) {
    ctx.state.push_notification(Notification::error(title, message));
}

// === 构建 ===

fn build_start(co: &EventCoordinator, event: Event) -> Result<(), IntentError> {
    if event.component.is_some() && event.project_id.is_none() {
        return Err(IntentError::MissingField {
            kind: event.kind.as_str(),
            field: "project_id",
        });
    }
    let target = BuildTarget::from_parts(event.project_id.as_deref(), event.component.as_deref());
    let token = co.child_token();
    co.builds
        .start(co.ctx.clone(), target, token, |task| co.spawn_handle(task));
    Ok(())
}

fn build_cancel(co: &EventCoordinator, _event: Event) -> Result<(), IntentError> {
    if !co.builds.cancel() {
        debug!("没有正在运行的构建");
    }
    Ok(())
}

// === 进程 ===

fn process_action(kind: EventKind) -> Option<ProcessAction> {
    Some(match kind {
        EventKind::ProcessStart => ProcessAction::Start,
        EventKind::ProcessStop => ProcessAction::Stop,
        EventKind::ProcessRestart => ProcessAction::Restart,
        EventKind::ProcessKill => ProcessAction::Kill,
        EventKind::ProcessPause => ProcessAction::Pause,
        EventKind::ProcessResume => ProcessAction::Resume,
        _ => return None,
    })
}

fn process_control(co: &EventCoordinator, event: Event) -> Result<(), IntentError> {
    let action = process_action(event.kind)
        .ok_or_else(|| IntentError::UnknownEventKind(event.kind.as_str().to_string()))?;
    let name = event.require_target()?.to_string();
    let ctx = co.ctx.clone();

    co.spawn(async move {
        match ctx.services.processes.control(&name, action).await {
            Ok(()) => {
                ctx.state.push_notification(Notification::success(
                    "Process Updated",
                    format!("{} {}", name, action.past_tense()),
                ));
            }
            Err(e) => {
                warn!("进程 {} {} 失败: {}", name, action, e);
                notify_error(
                    &ctx,
                    "Process Control Failed",
                    format!("{} {} failed: {}", action, name, error_chain_message(&e)),
                );
            }
        }
        // 无论成功与否都刷新进程视图
        if let Err(e) = refresh_processes(&ctx).await {
            warn!("刷新进程列表失败: {}", e);
        }
        refresh_dashboard(&ctx.state);
    });
    Ok(())
}

// === 过滤与导航 ===

fn view_kind_or_current(co: &EventCoordinator, raw: Option<&str>) -> Result<ViewKind, IntentError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Ok(raw.parse::<ViewKind>()?),
        None => Ok(co.ctx.state.current_view()),
    }
}

fn filter_set(co: &EventCoordinator, event: Event) -> Result<(), IntentError> {
    let kind = view_kind_or_current(co, event.target.as_deref())?;
    let filter = event.value.clone().unwrap_or_default();
    co.ctx.state.set_filter(kind, filter.trim());
    co.ctx.state.publish(kind);
    Ok(())
}

fn filter_clear(co: &EventCoordinator, event: Event) -> Result<(), IntentError> {
    let kind = view_kind_or_current(co, event.target.as_deref())?;
    co.ctx.state.clear_filter(kind);
    co.ctx.state.publish(kind);
    Ok(())
}

fn view_switch(co: &EventCoordinator, event: Event) -> Result<(), IntentError> {
    let raw = event
        .value
        .as_deref()
        .or(event.target.as_deref())
        .ok_or(IntentError::MissingField {
            kind: event.kind.as_str(),
            field: "value",
        })?;
    let kind: ViewKind = raw.parse()?;
    co.ctx.state.set_current_view(kind);
    co.ctx.state.publish(kind);
    Ok(())
}

fn refresh(co: &EventCoordinator, _event: Event) -> Result<(), IntentError> {
    let ctx = co.ctx.clone();
    co.spawn(async move { refresh_all(&ctx).await });
    Ok(())
}

// === 项目 ===

fn project_add(co: &EventCoordinator, event: Event) -> Result<(), IntentError> {
    let id = event.require_project()?.to_string();
    let path = event
        .value
        .as_deref()
        .or_else(|| event.data.get("path").map(String::as_str))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(IntentError::MissingField {
            kind: event.kind.as_str(),
            field: "value",
        })?;

    let mut project = Project::new(id.clone(), path);
    if let Some(name) = event.data.get("name") {
        project.name = name.clone();
    }
    project.build_command = event.data.get("build").cloned();

    let ctx = co.ctx.clone();
    co.spawn(async move {
        if let Err(e) = ctx.services.projects.add(project.clone()).await {
            notify_error(
                &ctx,
                "Project Add Failed",
                format!("{}: {}", id, error_chain_message(&e)),
            );
            return;
        }
        ctx.state
            .push_notification(Notification::success("Project Added", format!("{} added", id)));
        if let Err(e) = refresh_projects(&ctx).await {
            warn!("刷新项目列表失败: {}", e);
        }
        refresh_repository(&ctx, &project).await;
        refresh_dashboard(&ctx.state);
    });
    Ok(())
}

fn project_remove(co: &EventCoordinator, event: Event) -> Result<(), IntentError> {
    let id = event.require_project()?.to_string();
    let ctx = co.ctx.clone();
    co.spawn(async move {
        if let Err(e) = ctx.services.projects.remove(&id).await {
            notify_error(
                &ctx,
                "Project Remove Failed",
                format!("{}: {}", id, error_chain_message(&e)),
            );
            return;
        }
        ctx.state.push_notification(Notification::info(
            "Project Removed",
            format!("{} removed", id),
        ));
        match refresh_projects(&ctx).await {
            Ok(projects) => {
                refresh_git(&ctx, &projects).await;
            }
            Err(e) => warn!("刷新项目列表失败: {}", e),
        }
        refresh_dashboard(&ctx.state);
    });
    Ok(())
}

// === 版本控制 ===

/// 在注册表中查找项目，找不到时发出错误通知
async fn lookup_project(ctx: &TaskContext, project_id: &str) -> Option<Project> {
    match ctx.services.projects.get(project_id).await {
        Ok(Some(project)) => Some(project),
        Ok(None) => {
            notify_error(ctx, "Unknown Project", format!("{} is not registered", project_id));
            None
        }
        Err(e) => {
            notify_error(
                ctx,
                "Project Lookup Failed",
                format!("{}: {}", project_id, error_chain_message(&e)),
            );
            None
        }
    }
}

fn git_status(co: &EventCoordinator, event: Event) -> Result<(), IntentError> {
    let project_id = event.project_id.clone();
    let ctx = co.ctx.clone();
    co.spawn(async move {
        match project_id {
            Some(project_id) => {
                let Some(project) = lookup_project(&ctx, &project_id).await else {
                    return;
                };
                if refresh_repository(&ctx, &project).await {
                    ctx.state
                        .push_notification(Notification::info("Git Status Updated", project_id));
                } else {
                    notify_error(&ctx, "Git Status Failed", project_id);
                }
            }
            None => match ctx.services.projects.list().await {
                Ok(projects) => {
                    let failures = refresh_git(&ctx, &projects).await;
                    if failures > 0 {
                        notify_error(
                            &ctx,
                            "Git Status Failed",
                            format!("{} repositories failed", failures),
                        );
                    } else {
                        ctx.state.push_notification(Notification::info(
                            "Git Status Updated",
                            format!("{} repositories", projects.len()),
                        ));
                    }
                }
                Err(e) => notify_error(&ctx, "Git Status Failed", error_chain_message(&e)),
            },
        }
        refresh_dashboard(&ctx.state);
    });
    Ok(())
}

fn git_diff(co: &EventCoordinator, event: Event) -> Result<(), IntentError> {
    let project_id = event.require_project()?.to_string();
    let file = event.target.clone().filter(|f| !f.trim().is_empty());
    let ctx = co.ctx.clone();
    co.spawn(async move {
        let Some(project) = lookup_project(&ctx, &project_id).await else {
            return;
        };
        match ctx.services.vcs.diff(&project, file.as_deref()).await {
            Ok(text) => {
                let message = match &file {
                    Some(file) => format!("{}: {}", project_id, file),
                    None => project_id.clone(),
                };
                ctx.state.modify_view_model(ViewKind::Git, false, |vm| {
                    git_mut(vm, |git| {
                        git.detail = Some(GitDetail::Diff {
                            project_id,
                            file,
                            text,
                        })
                    })
                });
                ctx.state
                    .push_notification(Notification::info("Diff Loaded", message));
            }
            Err(e) => notify_error(
                &ctx,
                "Git Diff Failed",
                format!("{}: {}", project_id, error_chain_message(&e)),
            ),
        }
    });
    Ok(())
}

fn git_log(co: &EventCoordinator, event: Event) -> Result<(), IntentError> {
    let project_id = event.require_project()?.to_string();
    let limit = match event.value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => raw.parse::<usize>().map_err(|_| IntentError::InvalidField {
            field: "value",
            value: raw.to_string(),
        })?,
        None => DEFAULT_LOG_LIMIT,
    };
    let ctx = co.ctx.clone();
    co.spawn(async move {
        let Some(project) = lookup_project(&ctx, &project_id).await else {
            return;
        };
        match ctx.services.vcs.log(&project, limit).await {
            Ok(commits) => {
                let message = format!("{}: {} commits", project_id, commits.len());
                ctx.state.modify_view_model(ViewKind::Git, false, |vm| {
                    git_mut(vm, |git| {
                        git.detail = Some(GitDetail::Log {
                            project_id,
                            commits,
                        })
                    })
                });
                ctx.state
                    .push_notification(Notification::info("Log Loaded", message));
            }
            Err(e) => notify_error(
                &ctx,
                "Git Log Failed",
                format!("{}: {}", project_id, error_chain_message(&e)),
            ),
        }
    });
    Ok(())
}

// === 会话 ===

fn session_id(event: &Event) -> Result<SessionId, IntentError> {
    Ok(SessionId::from(event.require_target()?))
}

/// 把多路复用器错误转换为一条通知
fn report_mux_error(ctx: &TaskContext, title: &str, err: MuxError) {
    match err {
        MuxError::Attach { .. } => debug!("{}: {}", title, err),
        err => notify_error(ctx, title, err.to_string()),
    }
}

fn session_create(co: &EventCoordinator, event: Event) -> Result<(), IntentError> {
    let kind = match event.value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => raw.parse::<SessionKind>().map_err(|_| IntentError::InvalidField {
            field: "value",
            value: raw.to_string(),
        })?,
        None => SessionKind::Shell,
    };
    let project_id = event.project_id.clone();
    let name = event.data.get("name").cloned();
    let explicit_dir = event.data.get("dir").map(PathBuf::from);
    let start = event.data.get("start").is_some_and(|v| v == "true");

    let ctx = co.ctx.clone();
    co.spawn(async move {
        let work_dir = match (explicit_dir, project_id.as_deref()) {
            (Some(dir), _) => dir,
            (None, Some(project_id)) => match lookup_project(&ctx, project_id).await {
                Some(project) => project.path,
                None => return,
            },
            (None, None) => std::env::current_dir().unwrap_or_else(|_| std::env::temp_dir()),
        };

        let session = match ctx.mux.create_session(kind, project_id, work_dir, name) {
            Ok(session) => session,
            Err(e) => return report_mux_error(&ctx, "Session Create Failed", e),
        };
        if start {
            start_session(&ctx, session.id).await;
        }
    });
    Ok(())
}

/// 宿主启动可能阻塞，放到阻塞线程执行
async fn start_session(ctx: &TaskContext, session_id: SessionId) {
    let mux = Arc::clone(&ctx.mux);
    let id = session_id.clone();
    let result = tokio::task::spawn_blocking(move || mux.start(&id)).await;
    match result {
        Ok(Ok(())) => {
            ctx.state.push_notification(Notification::success(
                "Session Started",
                format!("{} started", session_id),
            ));
        }
        Ok(Err(e)) => report_mux_error(ctx, "Session Failed to Start", e),
        Err(e) => notify_error(ctx, "Session Failed to Start", e.to_string()),
    }
}

fn session_start(co: &EventCoordinator, event: Event) -> Result<(), IntentError> {
    let id = session_id(&event)?;
    let ctx = co.ctx.clone();
    co.spawn(async move { start_session(&ctx, id).await });
    Ok(())
}

fn session_stop(co: &EventCoordinator, event: Event) -> Result<(), IntentError> {
    let id = session_id(&event)?;
    match co.ctx.mux.stop(&id) {
        Ok(()) => {
            co.ctx.state.push_notification(Notification::success(
                "Session Stopped",
                format!("{} stopped", id),
            ));
        }
        Err(e) => report_mux_error(&co.ctx, "Session Stop Failed", e),
    }
    Ok(())
}

fn session_delete(co: &EventCoordinator, event: Event) -> Result<(), IntentError> {
    let id = session_id(&event)?;
    match co.ctx.mux.delete(&id) {
        Ok(()) => {
            co.ctx
                .state
                .push_notification(Notification::info("Session Deleted", format!("{} deleted", id)));
        }
        Err(e) => report_mux_error(&co.ctx, "Session Delete Failed", e),
    }
    Ok(())
}

fn session_rename(co: &EventCoordinator, event: Event) -> Result<(), IntentError> {
    let id = session_id(&event)?;
    let name = event.require_value()?;
    match co.ctx.mux.rename(&id, name) {
        Ok(()) => {
            co.ctx.state.push_notification(Notification::info(
                "Session Renamed",
                format!("{} renamed to {}", id, name),
            ));
        }
        Err(e) => report_mux_error(&co.ctx, "Session Rename Failed", e),
    }
    Ok(())
}

fn session_focus(co: &EventCoordinator, event: Event) -> Result<(), IntentError> {
    let id = session_id(&event)?;
    match co.ctx.mux.foreground(&id) {
        Ok(()) => {
            co.ctx
                .state
                .push_notification(Notification::info("Session Focused", id.to_string()));
        }
        Err(e) => report_mux_error(&co.ctx, "Session Focus Failed", e),
    }
    Ok(())
}

fn session_blur(co: &EventCoordinator, _event: Event) -> Result<(), IntentError> {
    co.ctx.mux.background();
    Ok(())
}
