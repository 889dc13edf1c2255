//! 并发状态访问测试
//!
//! 多个写入者同时修改不同视图类型时，读取者不会看到写了一半的视图模型，
//! 每个类型的广播顺序与写入顺序一致。

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use console_lib::services::{ProcessInfo, ProcessStatus, Project};
use console_lib::state::{
    DashboardView, HeaderEvent, Notification, ProcessesView, ProjectsView, Severity, SharedState,
    ViewKind, ViewModel, ViewPayload, HEADER_QUEUE_LIMIT,
};

fn projects_model(generation: usize) -> ViewModel {
    // 条目数和名称一起写入，用于检测撕裂读
    let projects = (0..generation % 7 + 1)
        .map(|i| {
            let mut project = Project::new(format!("p{}", i), format!("/srv/p{}", i));
            project.name = format!("gen-{}", generation);
            project
        })
        .collect();
    ViewModel::new(ViewPayload::Projects(ProjectsView { projects }))
}

fn processes_model(generation: usize) -> ViewModel {
    let processes = (0..generation % 5 + 1)
        .map(|i| ProcessInfo {
            name: format!("gen-{}", generation),
            project_id: None,
            status: ProcessStatus::Running,
            pid: Some(i as u32),
            started_at: None,
            restarts: generation as u32,
        })
        .collect();
    ViewModel::new(ViewPayload::Processes(ProcessesView { processes }))
}

fn generation_of(model: &ViewModel) -> Option<usize> {
    match &model.payload {
        ViewPayload::Projects(view) => {
            let first = view.projects.first()?;
            let generation: usize = first.name.strip_prefix("gen-")?.parse().ok()?;
            let consistent = view.projects.len() == generation % 7 + 1
                && view.projects.iter().all(|p| p.name == first.name);
            consistent.then_some(generation)
        }
        ViewPayload::Processes(view) => {
            let first = view.processes.first()?;
            let generation = first.restarts as usize;
            let consistent = view.processes.len() == generation % 5 + 1
                && view.processes.iter().all(|p| p.restarts == first.restarts);
            consistent.then_some(generation)
        }
        _ => None,
    }
}

/// 两个写入者分别写 Projects 和 Processes，多个读取者同时读取
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_on_two_kinds() {
    const WRITES: usize = 200;

    let state = Arc::new(SharedState::new());
    let delivered: Arc<Mutex<HashMap<ViewKind, Vec<usize>>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let sink = Arc::clone(&delivered);
    state.subscribe(move |update| {
        if let Some(generation) = generation_of(&update.view_model) {
            sink.lock().entry(update.kind).or_default().push(generation);
        }
        true
    });

    let mut join_set = JoinSet::new();

    let writer = Arc::clone(&state);
    join_set.spawn(async move {
        for generation in 1..=WRITES {
            writer.update_view_model(projects_model(generation));
            if generation % 20 == 0 {
                tokio::task::yield_now().await;
            }
        }
        ("projects_writer", WRITES)
    });

    let writer = Arc::clone(&state);
    join_set.spawn(async move {
        for generation in 1..=WRITES {
            writer.update_view_model(processes_model(generation));
            if generation % 20 == 0 {
                tokio::task::yield_now().await;
            }
        }
        ("processes_writer", WRITES)
    });

    for _ in 0..3 {
        let reader = Arc::clone(&state);
        join_set.spawn(async move {
            let mut reads = 0;
            for _ in 0..300 {
                for kind in [ViewKind::Projects, ViewKind::Processes] {
                    let model = reader.view_model(kind);
                    if model.payload.item_count() != 0 {
                        assert!(
                            generation_of(&model).is_some(),
                            "读到了不一致的视图模型: {:?}",
                            kind
                        );
                        reads += 1;
                    }
                }
                tokio::time::sleep(Duration::from_micros(10)).await;
            }
            ("reader", reads)
        });
    }

    while let Some(result) = join_set.join_next().await {
        let (name, count) = result.expect("任务执行失败");
        println!("任务 {} 完成 {} 次操作", name, count);
    }

    assert_eq!(generation_of(&state.view_model(ViewKind::Projects)), Some(WRITES));
    assert_eq!(generation_of(&state.view_model(ViewKind::Processes)), Some(WRITES));

    let delivered = delivered.lock();
    for kind in [ViewKind::Projects, ViewKind::Processes] {
        let generations = &delivered[&kind];
        assert_eq!(generations.len(), WRITES);
        assert!(
            generations.windows(2).all(|pair| pair[0] < pair[1]),
            "{} 的广播顺序与写入顺序不一致",
            kind
        );
    }
}

/// 并发的读-改-写不会丢失更新
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_modify_loses_no_updates() {
    let state = Arc::new(SharedState::new());
    let mut join_set = JoinSet::new();

    for writer in 0..8 {
        let state = Arc::clone(&state);
        join_set.spawn(async move {
            for i in 0..25 {
                state.modify_view_model(ViewKind::Projects, true, |vm| {
                    if let ViewPayload::Projects(view) = &mut vm.payload {
                        view.projects.push(Project::new(
                            format!("w{}-{}", writer, i),
                            "/tmp",
                        ));
                    }
                });
                tokio::task::yield_now().await;
            }
        });
    }
    while let Some(result) = join_set.join_next().await {
        result.expect("任务执行失败");
    }

    assert_eq!(state.item_count(ViewKind::Projects), 200);
}

fn derive_dashboard(models: &HashMap<ViewKind, ViewModel>) -> ViewModel {
    let project_count = models
        .get(&ViewKind::Projects)
        .map_or(0, |vm| vm.payload.item_count());
    ViewModel::new(ViewPayload::Dashboard(DashboardView {
        project_count,
        ..Default::default()
    }))
}

/// 多个写入者各自写入项目后重算仪表盘，广播出的仪表盘总是对应最近一次项目广播
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_derived_dashboard_never_published_stale() {
    let state = Arc::new(SharedState::new());
    let last_projects = Arc::new(Mutex::new(0usize));
    let mismatches = Arc::new(Mutex::new(Vec::new()));
    let last_dashboard = Arc::new(Mutex::new(None));
    {
        let last_projects = Arc::clone(&last_projects);
        let mismatches = Arc::clone(&mismatches);
        let last_dashboard = Arc::clone(&last_dashboard);
        state.subscribe(move |update| {
            match &update.view_model.payload {
                ViewPayload::Projects(view) => *last_projects.lock() = view.projects.len(),
                ViewPayload::Dashboard(view) => {
                    let expected = *last_projects.lock();
                    if view.project_count != expected {
                        mismatches.lock().push((view.project_count, expected));
                    }
                    *last_dashboard.lock() = Some(view.project_count);
                }
                _ => {}
            }
            true
        });
    }

    let mut join_set = JoinSet::new();
    for writer in 0..6 {
        let state = Arc::clone(&state);
        join_set.spawn(async move {
            for generation in 0..50 {
                state.update_view_model(projects_model(writer * 50 + generation));
                tokio::task::yield_now().await;
                state.derive_view_model(derive_dashboard);
            }
        });
    }
    while let Some(result) = join_set.join_next().await {
        result.expect("任务执行失败");
    }

    let mismatches = mismatches.lock();
    assert!(mismatches.is_empty(), "仪表盘与项目视图不一致: {:?}", *mismatches);
    let final_count = state.item_count(ViewKind::Projects);
    assert_eq!(*last_dashboard.lock(), Some(final_count));
    match state.view_model(ViewKind::Dashboard).payload {
        ViewPayload::Dashboard(view) => assert_eq!(view.project_count, final_count),
        other => panic!("仪表盘负载类型错误: {:?}", other),
    }
}

#[tokio::test]
async fn test_header_queue_bounded_under_concurrent_pushes() {
    let state = Arc::new(SharedState::new());
    let mut join_set = JoinSet::new();

    for writer in 0..4 {
        let state = Arc::clone(&state);
        join_set.spawn(async move {
            for i in 0..30 {
                state.set_header_event(HeaderEvent::new(
                    format!("writer {} event {}", writer, i),
                    Severity::Info,
                    Duration::from_secs(30),
                ));
                tokio::task::yield_now().await;
            }
        });
    }
    while let Some(result) = join_set.join_next().await {
        result.expect("任务执行失败");
    }

    assert_eq!(state.header_events().len(), HEADER_QUEUE_LIMIT);

    // 常驻消息在下一条事件到来时被移除
    state.set_header_event(HeaderEvent::persistent("Building alpha", Severity::Info));
    state.set_header_event(HeaderEvent::new(
        "alpha built successfully",
        Severity::Success,
        Duration::from_secs(3),
    ));
    assert!(state.header_events().iter().all(|e| !e.persistent));

    // 与最新一条相同的消息只刷新时间
    let before = state.header_events().len();
    state.set_header_event(HeaderEvent::new(
        "alpha built successfully",
        Severity::Success,
        Duration::from_secs(3),
    ));
    assert_eq!(state.header_events().len(), before);
}

#[tokio::test]
async fn test_expired_header_events_are_cleared() {
    let state = SharedState::new();
    state.set_header_event(HeaderEvent::new("short", Severity::Info, Duration::from_millis(10)));
    state.set_header_event(HeaderEvent::new("long", Severity::Info, Duration::from_secs(60)));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(state.clear_expired_header_events(), 1);
    assert_eq!(
        state.latest_header_event().map(|e| e.message),
        Some("long".to_string())
    );
}

#[tokio::test]
async fn test_notification_history_is_bounded() {
    let state = SharedState::with_notification_limit(5);
    let received = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&received);
    let subscription = state.subscribe_notifications(move |_| {
        *sink.lock() += 1;
        true
    });

    for i in 0..12 {
        state.push_notification(Notification::info("Tick", format!("{}", i)));
    }

    let history = state.notifications();
    assert_eq!(history.len(), 5);
    assert_eq!(history.last().map(|n| n.message.as_str()), Some("11"));
    assert_eq!(*received.lock(), 12);

    assert!(state.unsubscribe(subscription));
    state.push_notification(Notification::info("Tick", "late"));
    assert_eq!(*received.lock(), 12);
}
