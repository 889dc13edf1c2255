//! 从外部服务重新拉取数据并写入视图模型

use futures::future::join_all;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::TaskContext;
use crate::mux::SessionMultiplexer;
use crate::services::Project;
use crate::state::{
    BuildsView, DashboardView, GitDetail, GitView, Notification, ProcessesView, ProjectsView,
    RepositoryEntry, SessionSummary, SessionsView, SharedState, ViewKind, ViewModel, ViewPayload,
};
use crate::utils::{error_chain_message, AppResult};

/// 在视图模型中原地修改构建视图
pub(crate) fn builds_mut<R>(vm: &mut ViewModel, f: impl FnOnce(&mut BuildsView) -> R) -> R {
    let mut view = match std::mem::replace(&mut vm.payload, ViewPayload::empty(ViewKind::Builds)) {
        ViewPayload::Builds(view) => view,
        _ => BuildsView::default(),
    };
    let result = f(&mut view);
    vm.payload = ViewPayload::Builds(view);
    result
}

pub(crate) fn git_mut<R>(vm: &mut ViewModel, f: impl FnOnce(&mut GitView) -> R) -> R {
    let mut view = match std::mem::replace(&mut vm.payload, ViewPayload::empty(ViewKind::Git)) {
        ViewPayload::Git(view) => view,
        _ => GitView::default(),
    };
    let result = f(&mut view);
    vm.payload = ViewPayload::Git(view);
    result
}

/// 把错误写入视图模型，保留原有内容
fn mark_error(ctx: &TaskContext, kind: ViewKind, message: &str) {
    ctx.state.modify_view_model(kind, false, |vm| {
        vm.loading = false;
        vm.error = Some(message.to_string());
    });
}

pub(crate) async fn refresh_projects(ctx: &TaskContext) -> AppResult<Vec<Project>> {
    match ctx.services.projects.list().await {
        Ok(projects) => {
            ctx.state
                .update_view_model(ViewModel::new(ViewPayload::Projects(ProjectsView {
                    projects: projects.clone(),
                })));
            Ok(projects)
        }
        Err(e) => {
            mark_error(ctx, ViewKind::Projects, &error_chain_message(&e));
            Err(e)
        }
    }
}

async fn repository_entry(ctx: &TaskContext, project: &Project) -> RepositoryEntry {
    match ctx.services.vcs.status(project).await {
        Ok(status) => RepositoryEntry {
            project_id: project.id.clone(),
            status: Some(status),
            error: None,
        },
        Err(e) => {
            warn!("获取仓库状态失败 {}: {}", project.id, e);
            RepositoryEntry {
                project_id: project.id.clone(),
                status: None,
                error: Some(error_chain_message(&e)),
            }
        }
    }
}

/// 并发获取每个项目的仓库状态，返回失败的项目数
pub(crate) async fn refresh_git(ctx: &TaskContext, projects: &[Project]) -> usize {
    let entries: Vec<RepositoryEntry> =
        join_all(projects.iter().map(|project| repository_entry(ctx, project))).await;
    let failures = entries.iter().filter(|entry| entry.error.is_some()).count();
    debug!("仓库状态刷新完成: {} 个项目, {} 个失败", entries.len(), failures);

    ctx.state.modify_view_model(ViewKind::Git, false, |vm| {
        vm.loading = false;
        vm.error = None;
        git_mut(vm, |git| {
            // 已移除项目的详情不再保留
            let keep_detail = git.detail.as_ref().is_some_and(|detail| {
                let project_id = match detail {
                    GitDetail::Diff { project_id, .. } | GitDetail::Log { project_id, .. } => {
                        project_id
                    }
                };
                entries.iter().any(|entry| &entry.project_id == project_id)
            });
            if !keep_detail {
                git.detail = None;
            }
            git.repositories = entries;
        })
    });
    failures
}

/// 只刷新单个项目的仓库状态
pub(crate) async fn refresh_repository(ctx: &TaskContext, project: &Project) -> bool {
    let entry = repository_entry(ctx, project).await;
    let ok = entry.error.is_none();
    ctx.state.modify_view_model(ViewKind::Git, true, |vm| {
        git_mut(vm, |git| {
            match git
                .repositories
                .iter_mut()
                .find(|existing| existing.project_id == entry.project_id)
            {
                Some(existing) => *existing = entry,
                None => git.repositories.push(entry),
            }
        })
    });
    ok
}

pub(crate) async fn refresh_processes(ctx: &TaskContext) -> AppResult<()> {
    match ctx.services.processes.list().await {
        Ok(processes) => {
            ctx.state
                .update_view_model(ViewModel::new(ViewPayload::Processes(ProcessesView {
                    processes,
                })));
            Ok(())
        }
        Err(e) => {
            mark_error(ctx, ViewKind::Processes, &error_chain_message(&e));
            Err(e)
        }
    }
}

pub(crate) fn refresh_sessions(state: &SharedState, mux: &SessionMultiplexer) {
    let foreground = mux.foreground_session();
    let sessions = mux
        .list()
        .into_iter()
        .map(|session| SessionSummary {
            foreground: foreground.as_ref() == Some(&session.id),
            id: session.id,
            name: session.name,
            kind: session.kind,
            project_id: session.project_id,
            state: session.state,
            last_active: session.last_active,
        })
        .collect();
    state.update_view_model(ViewModel::new(ViewPayload::Sessions(SessionsView {
        sessions,
    })));
}

fn payload(models: &HashMap<ViewKind, ViewModel>, kind: ViewKind) -> Option<&ViewPayload> {
    models.get(&kind).map(|vm| &vm.payload)
}

/// 由其余视图的缓存内容计算仪表盘汇总
fn dashboard_from(models: &HashMap<ViewKind, ViewModel>) -> ViewModel {
    let mut dashboard = DashboardView::default();

    if let Some(ViewPayload::Projects(view)) = payload(models, ViewKind::Projects) {
        dashboard.project_count = view.projects.len();
    }
    if let Some(ViewPayload::Git(view)) = payload(models, ViewKind::Git) {
        dashboard.dirty_repositories = view
            .repositories
            .iter()
            .filter(|entry| entry.status.as_ref().is_some_and(|s| s.is_dirty()))
            .count();
    }
    if let Some(ViewPayload::Processes(view)) = payload(models, ViewKind::Processes) {
        dashboard.running_processes = view.processes.iter().filter(|p| p.status.is_running()).count();
        dashboard.failed_processes = view.processes.iter().filter(|p| p.status.is_failed()).count();
    }
    if let Some(ViewPayload::Sessions(view)) = payload(models, ViewKind::Sessions) {
        dashboard.total_sessions = view.sessions.len();
        dashboard.running_sessions = view
            .sessions
            .iter()
            .filter(|s| s.state.is_active())
            .count();
    }
    if let Some(ViewPayload::Builds(view)) = payload(models, ViewKind::Builds) {
        dashboard.active_build = view.active.as_ref().map(|build| build.label.clone());
        dashboard.last_build = view.history.first().cloned();
    }

    ViewModel::new(ViewPayload::Dashboard(dashboard))
}

/// 重新计算仪表盘并广播，与其余视图的写入串行
pub(crate) fn refresh_dashboard(state: &SharedState) {
    state.derive_view_model(dashboard_from);
}

/// 重新拉取全部数据并广播所有视图类型
///
/// 上游失败汇总为一条错误通知。
pub(crate) async fn refresh_all(ctx: &TaskContext) {
    let mut failures = Vec::new();

    let projects = match refresh_projects(ctx).await {
        Ok(projects) => projects,
        Err(e) => {
            failures.push(format!("projects: {}", error_chain_message(&e)));
            Vec::new()
        }
    };

    let (git_failures, processes) = tokio::join!(refresh_git(ctx, &projects), refresh_processes(ctx));
    if git_failures > 0 {
        failures.push(format!("git: {} repositories failed", git_failures));
    }
    if let Err(e) = processes {
        failures.push(format!("processes: {}", error_chain_message(&e)));
    }

    refresh_sessions(&ctx.state, &ctx.mux);
    ctx.state.publish(ViewKind::Builds);
    refresh_dashboard(&ctx.state);

    if !failures.is_empty() {
        ctx.state
            .push_notification(Notification::error("Refresh Failed", failures.join("; ")));
    }
}
