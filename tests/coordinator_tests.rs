//! 事件协调器集成测试
//!
//! 使用假服务验证单飞构建、同步导航意图、进程控制和会话意图。

mod test_utils;

use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use console_lib::coordinator::{Event, EventKind, IntentError};
use console_lib::mux::SessionState;
use console_lib::services::{ProcessAction, Project};
use console_lib::state::{
    BuildStatus, ProjectsView, Severity, StateUpdate, ViewKind, ViewModel, ViewPayload,
};
use test_utils::{eventually, project, Harness, Script};

fn builds_view(harness: &Harness) -> console_lib::state::BuildsView {
    match harness.state.view_model(ViewKind::Builds).payload {
        ViewPayload::Builds(view) => view,
        other => panic!("意外的视图: {:?}", other.kind()),
    }
}

#[tokio::test]
async fn test_new_build_supersedes_in_flight_build() {
    let harness = Harness::new(vec![project("alpha"), project("beta")]);
    harness.builds.script("alpha", Script::Hang);

    // (partial, 正在运行的构建, 历史条数)
    let builds_updates: Arc<Mutex<Vec<(bool, Option<String>, usize)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&builds_updates);
    harness.coordinator.subscribe(move |update| {
        if let ViewPayload::Builds(view) = &update.view_model.payload {
            sink.lock().push((
                update.partial,
                view.active.as_ref().map(|build| build.label.clone()),
                view.history.len(),
            ));
        }
        true
    });

    harness
        .coordinator
        .handle_line("build.start project=alpha")
        .unwrap();
    assert!(
        eventually(|| harness.builds.started.lock().contains(&"alpha".to_string())).await,
        "alpha 构建没有启动"
    );
    assert_eq!(harness.coordinator.active_build().as_deref(), Some("alpha"));
    assert!(
        eventually(|| builds_updates
            .lock()
            .contains(&(true, Some("alpha".to_string()), 0)))
        .await,
        "没有收到 alpha 的进行中广播"
    );

    harness
        .coordinator
        .handle_line("build.start project=beta")
        .unwrap();
    assert!(eventually(|| harness.notifications.lock().len() >= 2).await);

    let notifications = harness.notifications.lock().clone();
    assert_eq!(notifications[0].kind, Severity::Warning);
    assert_eq!(notifications[0].title, "Build Cancelled");
    assert_eq!(notifications[0].message, "alpha build was cancelled");
    assert_eq!(notifications[1].kind, Severity::Success);
    assert_eq!(notifications[1].title, "Build Complete");
    assert_eq!(notifications[1].message, "beta built successfully");

    let builds = builds_view(&harness);
    assert!(builds.active.is_none());
    assert_eq!(builds.history.len(), 2);
    assert_eq!(builds.history[0].label, "beta");
    assert_eq!(builds.history[0].status, BuildStatus::Succeeded);
    assert_eq!(builds.history[1].status, BuildStatus::Cancelled);

    assert_eq!(
        harness.state.latest_header_event().map(|h| h.message),
        Some("beta built successfully".to_string())
    );
    assert!(harness.coordinator.active_build().is_none());

    let updates = builds_updates.lock().clone();
    let alpha_running = updates
        .iter()
        .position(|(partial, active, _)| *partial && active.as_deref() == Some("alpha"));
    let alpha_cancelled = updates.iter().position(|(_, _, history)| *history >= 1);
    let beta_running = updates
        .iter()
        .position(|(_, active, _)| active.as_deref() == Some("beta"));
    assert!(alpha_running.is_some());
    assert!(alpha_running < alpha_cancelled, "广播顺序: {:?}", updates);
    assert!(alpha_running < beta_running, "广播顺序: {:?}", updates);
    assert_eq!(updates.last().map(|(_, active, history)| (active.clone(), *history)), Some((None, 2)));
}

#[tokio::test]
async fn test_failed_build_reports_reason() {
    let harness = Harness::new(vec![project("gamma")]);
    harness
        .builds
        .script("gamma", Script::Fail("linker error".to_string()));

    harness
        .coordinator
        .handle_event(Event::new(EventKind::BuildStart).project("gamma"))
        .unwrap();
    assert!(eventually(|| !harness.notifications.lock().is_empty()).await);

    let notification = harness.notifications.lock()[0].clone();
    assert_eq!(notification.kind, Severity::Error);
    assert_eq!(notification.title, "Build Failed");
    assert_eq!(notification.message, "gamma build failed: linker error");

    let builds = builds_view(&harness);
    assert_eq!(builds.history[0].message.as_deref(), Some("linker error"));
    assert!(builds.output.iter().any(|line| line.is_error && line.text == "linker error"));
}

#[tokio::test]
async fn test_build_cancel_reports_cancelled_not_failed() {
    let harness = Harness::new(vec![project("alpha")]);
    harness.builds.script("alpha", Script::Hang);

    harness
        .coordinator
        .handle_line("build.start project=alpha")
        .unwrap();
    assert!(eventually(|| !harness.builds.started.lock().is_empty()).await);

    harness.coordinator.handle_line("build.cancel").unwrap();
    assert!(eventually(|| !harness.notifications.lock().is_empty()).await);
    assert_eq!(harness.notification_titles(), vec!["Build Cancelled"]);
    assert_eq!(builds_view(&harness).history[0].status, BuildStatus::Cancelled);
}

#[tokio::test]
async fn test_intent_errors() {
    let harness = Harness::new(Vec::new());

    assert!(matches!(
        harness.coordinator.handle_line("deploy.everything"),
        Err(IntentError::UnknownEventKind(kind)) if kind == "deploy.everything"
    ));
    assert!(matches!(
        harness.coordinator.handle_line("build.start component=web"),
        Err(IntentError::MissingField { field: "project_id", .. })
    ));
    assert!(matches!(
        harness.coordinator.handle_line("process.stop"),
        Err(IntentError::MissingField { .. })
    ));
    assert!(matches!(
        harness.coordinator.get_view_model("nope"),
        Err(IntentError::UnknownViewKind(_))
    ));
    assert!(matches!(
        harness.coordinator.handle_line("filter.set target=nowhere value=x"),
        Err(IntentError::UnknownViewKind(_))
    ));
}

#[tokio::test]
async fn test_filter_intent_is_synchronous_and_broadcast() {
    let harness = Harness::new(Vec::new());
    let updates: Arc<Mutex<Vec<StateUpdate>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    let subscription = harness.coordinator.subscribe(move |update| {
        sink.lock().push(update.clone());
        true
    });

    harness
        .coordinator
        .handle_line("filter.set target=git value=api")
        .unwrap();
    assert_eq!(harness.state.filter(ViewKind::Git).as_deref(), Some("api"));
    assert!(updates.lock().iter().any(|u| u.kind == ViewKind::Git));

    harness
        .coordinator
        .handle_line("filter.clear target=git")
        .unwrap();
    assert!(harness.state.filter(ViewKind::Git).is_none());

    assert!(harness.coordinator.unsubscribe(subscription));
    let seen = updates.lock().len();
    harness
        .coordinator
        .handle_line("filter.set target=builds value=x")
        .unwrap();
    assert_eq!(updates.lock().len(), seen);
}

#[tokio::test]
async fn test_view_switch_keeps_cached_content() {
    let harness = Harness::new(Vec::new());
    let projects = ViewModel::new(ViewPayload::Projects(ProjectsView {
        projects: vec![Project::new("alpha", "/srv/alpha")],
    }));
    harness.state.update_view_model(projects.clone());

    harness
        .coordinator
        .handle_line("view.switch value=git")
        .unwrap();
    assert_eq!(harness.state.current_view(), ViewKind::Git);
    harness
        .coordinator
        .handle_line("view.switch value=projects")
        .unwrap();

    let current = harness.state.current_view_model();
    assert_eq!(current.payload, projects.payload);
    assert_eq!(current.timestamp, projects.timestamp);
}

#[tokio::test]
async fn test_process_control_refreshes_even_on_failure() {
    let harness = Harness::new(Vec::new());
    harness.processes.failing.lock().insert("web".to_string());

    harness
        .coordinator
        .handle_line("process.restart target=web")
        .unwrap();
    assert!(eventually(|| !harness.notifications.lock().is_empty()).await);
    harness.coordinator.wait_idle().await;

    let notification = harness.notifications.lock()[0].clone();
    assert_eq!(notification.title, "Process Control Failed");
    assert!(notification.message.contains("supervisor refused"));
    assert!(harness.processes.list_calls.load(Ordering::SeqCst) >= 1);
    assert_eq!(harness.state.item_count(ViewKind::Processes), 1);

    harness
        .coordinator
        .handle_line("process.pause target=api")
        .unwrap();
    harness.coordinator.wait_idle().await;
    assert_eq!(
        harness.processes.calls.lock().last().cloned(),
        Some(("api".to_string(), ProcessAction::Pause))
    );
    assert!(harness
        .notification_titles()
        .contains(&"Process Updated".to_string()));
}

#[tokio::test]
async fn test_refresh_rebuilds_dashboard() {
    let harness = Harness::new(vec![project("alpha"), project("beta")]);
    harness.vcs.dirty.lock().insert("alpha".to_string());

    harness.coordinator.refresh().await;

    assert_eq!(harness.state.item_count(ViewKind::Projects), 2);
    assert_eq!(harness.state.item_count(ViewKind::Git), 2);
    match harness.state.view_model(ViewKind::Dashboard).payload {
        ViewPayload::Dashboard(dashboard) => {
            assert_eq!(dashboard.project_count, 2);
            assert_eq!(dashboard.dirty_repositories, 1);
            assert!(dashboard.active_build.is_none());
        }
        other => panic!("意外的视图: {:?}", other.kind()),
    }
    assert!(harness.notifications.lock().is_empty());
}

#[tokio::test]
async fn test_refresh_failure_becomes_notification() {
    let harness = Harness::new(vec![project("alpha")]);
    harness.projects.fail_list.store(true, Ordering::SeqCst);

    harness.coordinator.refresh().await;

    assert_eq!(harness.notification_titles(), vec!["Refresh Failed"]);
    assert!(harness
        .state
        .view_model(ViewKind::Projects)
        .error
        .is_some_and(|e| e.contains("registry unavailable")));
}

#[tokio::test]
async fn test_project_add_and_git_log() {
    let harness = Harness::new(Vec::new());

    harness
        .coordinator
        .handle_line("project.add project=delta value=/srv/delta name=Delta")
        .unwrap();
    harness.coordinator.wait_idle().await;
    assert_eq!(harness.state.item_count(ViewKind::Projects), 1);
    assert!(harness
        .notification_titles()
        .contains(&"Project Added".to_string()));

    harness
        .coordinator
        .handle_line("git.log project=delta value=2")
        .unwrap();
    harness.coordinator.wait_idle().await;
    assert_eq!(
        harness.notification_titles().last().map(String::as_str),
        Some("Log Loaded")
    );
    assert!(matches!(
        harness.state.view_model(ViewKind::Git).payload,
        ViewPayload::Git(view) if view.detail.is_some()
    ));

    assert!(matches!(
        harness.coordinator.handle_line("git.log project=delta value=many"),
        Err(IntentError::InvalidField { field: "value", .. })
    ));
}

#[tokio::test]
async fn test_session_intents_drive_the_multiplexer() {
    let harness = Harness::new(Vec::new());

    harness
        .coordinator
        .handle_line("session.create value=shell name=work start=true")
        .unwrap();
    assert!(
        eventually(|| harness
            .mux
            .list()
            .first()
            .is_some_and(|s| s.state == SessionState::Running))
        .await
    );
    let session = harness.mux.list().remove(0);
    assert_eq!(session.name, "work");
    assert_eq!(harness.state.item_count(ViewKind::Sessions), 1);
    assert!(
        eventually(|| harness
            .notification_titles()
            .contains(&"Session Started".to_string()))
        .await
    );

    harness
        .coordinator
        .handle_line(&format!("session.rename target={} value=main", session.id))
        .unwrap();
    assert_eq!(harness.mux.session(&session.id).unwrap().name, "main");

    harness
        .coordinator
        .handle_line(&format!("session.focus target={}", session.id))
        .unwrap();
    assert!(harness.mux.input_mode());

    harness
        .coordinator
        .handle_line(&format!("session.stop target={}", session.id))
        .unwrap();
    assert_eq!(
        harness.mux.session(&session.id).unwrap().state,
        SessionState::Stopped
    );
    assert!(!harness.mux.input_mode());

    harness
        .coordinator
        .handle_line(&format!("session.delete target={}", session.id))
        .unwrap();
    assert!(eventually(|| harness.state.item_count(ViewKind::Sessions) == 0).await);

    assert_eq!(
        harness.notification_titles(),
        vec![
            "Session Started",
            "Session Renamed",
            "Session Focused",
            "Session Stopped",
            "Session Deleted",
        ]
    );
    let notifications = harness.notifications.lock().clone();
    assert_eq!(notifications[0].kind, Severity::Success);
    assert_eq!(notifications[1].message, format!("{} renamed to main", session.id));
    assert_eq!(notifications[3].kind, Severity::Success);
    assert_eq!(notifications[4].kind, Severity::Info);
}

#[tokio::test]
async fn test_git_intents_notify_on_success() {
    let harness = Harness::new(vec![project("alpha"), project("beta")]);
    harness.vcs.dirty.lock().insert("beta".to_string());

    harness.coordinator.handle_line("git.status").unwrap();
    harness.coordinator.wait_idle().await;
    harness
        .coordinator
        .handle_line("git.status project=beta")
        .unwrap();
    harness.coordinator.wait_idle().await;
    harness
        .coordinator
        .handle_line("git.diff project=alpha target=src/main.rs")
        .unwrap();
    harness.coordinator.wait_idle().await;
    harness
        .coordinator
        .handle_line("git.log project=alpha value=2")
        .unwrap();
    harness.coordinator.wait_idle().await;

    let notifications = harness.notifications.lock().clone();
    let summary: Vec<(&str, &str, Severity)> = notifications
        .iter()
        .map(|n| (n.title.as_str(), n.message.as_str(), n.kind))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("Git Status Updated", "2 repositories", Severity::Info),
            ("Git Status Updated", "beta", Severity::Info),
            ("Diff Loaded", "alpha: src/main.rs", Severity::Info),
            ("Log Loaded", "alpha: 2 commits", Severity::Info),
        ]
    );
    assert!(matches!(
        harness.state.view_model(ViewKind::Git).payload,
        ViewPayload::Git(view) if view.repositories.len() == 2 && view.detail.is_some()
    ));

    harness
        .coordinator
        .handle_line("git.diff project=ghost")
        .unwrap();
    harness.coordinator.wait_idle().await;
    assert_eq!(
        harness.notification_titles().last().map(String::as_str),
        Some("Unknown Project")
    );
}

#[tokio::test]
async fn test_session_launch_failure_notifies() {
    let harness = Harness::new(Vec::new());
    harness.host.fail.store(true, Ordering::SeqCst);

    harness
        .coordinator
        .handle_line("session.create value=database start=true")
        .unwrap();
    harness.coordinator.wait_idle().await;

    assert_eq!(
        harness.notification_titles(),
        vec!["Session Failed to Start"]
    );
    let session = harness.mux.list().remove(0);
    assert_eq!(session.state, SessionState::Errored);
}

#[tokio::test]
async fn test_shutdown_rejects_new_intents() {
    let harness = Harness::new(vec![project("alpha")]);
    harness.builds.script("alpha", Script::Hang);
    harness
        .coordinator
        .handle_line("build.start project=alpha")
        .unwrap();
    assert!(eventually(|| !harness.builds.started.lock().is_empty()).await);

    let token = harness.coordinator.root_token();
    harness.coordinator.shutdown();
    assert!(token.is_cancelled());
    assert_eq!(
        harness.coordinator.handle_line("refresh"),
        Err(IntentError::ShutDown)
    );

    harness.coordinator.wait_idle().await;
    assert_eq!(harness.notification_titles(), vec!["Build Cancelled"]);
}
