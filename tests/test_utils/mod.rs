/*!
 * 集成测试共用的假实现
 *
 * - 假会话宿主，记录写入的按键，可以模拟启动失败和进程退出
 * - 内存中的项目注册表、可编排结果的构建器、进程监管和版本控制服务
 */

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use console_lib::config::{ConfigHandle, ConsoleConfig};
use console_lib::coordinator::EventCoordinator;
use console_lib::git::{CommitInfo, RepositoryStatus};
use console_lib::mux::{
    HostedProcess, LaunchSpec, ScreenCapture, SessionHost, SessionId, SessionMultiplexer,
    TerminalSize,
};
use console_lib::services::{
    BuildEvent, BuildOrchestrator, BuildTarget, ProcessAction, ProcessInfo, ProcessStatus,
    ProcessSupervisor, Project, ProjectRegistry, Services, VcsStatusService,
};
use console_lib::state::{Notification, SharedState};
use console_lib::utils::AppResult;

// === 会话宿主 ===

#[derive(Default)]
pub struct FakeProcess {
    pub input: Mutex<Vec<u8>>,
    pub dead: AtomicBool,
    pub lines: Mutex<Vec<String>>,
    pub detached: AtomicBool,
}

impl FakeProcess {
    pub fn input_text(&self) -> String {
        String::from_utf8_lossy(&self.input.lock()).into_owned()
    }
}

impl HostedProcess for FakeProcess {
    fn write(&self, data: &[u8]) -> AppResult<()> {
        if self.dead.load(Ordering::SeqCst) {
            anyhow::bail!("进程已退出");
        }
        self.input.lock().extend_from_slice(data);
        Ok(())
    }

    fn resize(&self, _size: TerminalSize) -> AppResult<()> {
        Ok(())
    }

    fn capture(&self) -> AppResult<ScreenCapture> {
        let lines = self.lines.lock().clone();
        Ok(ScreenCapture {
            line_count: lines.len(),
            lines,
        })
    }

    fn is_alive(&self) -> bool {
        !self.dead.load(Ordering::SeqCst)
    }

    fn terminate(&self) -> AppResult<()> {
        self.dead.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }
}

/// 按会话 id 记录进程；`surviving` 中的会话视为仍在宿主中运行
#[derive(Default)]
pub struct FakeHost {
    pub fail: AtomicBool,
    pub launches: AtomicUsize,
    pub processes: Mutex<HashMap<SessionId, Arc<FakeProcess>>>,
    pub surviving: Mutex<HashSet<SessionId>>,
}

impl FakeHost {
    pub fn process(&self, id: &SessionId) -> Option<Arc<FakeProcess>> {
        self.processes.lock().get(id).cloned()
    }
}

impl SessionHost for FakeHost {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn launch(&self, spec: &LaunchSpec, _size: TerminalSize) -> AppResult<Arc<dyn HostedProcess>> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("命令不存在: {}", spec.command.executable);
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        let process = Arc::new(FakeProcess::default());
        self.processes
            .lock()
            .insert(spec.session_id.clone(), Arc::clone(&process));
        Ok(process as Arc<dyn HostedProcess>)
    }

    fn exists(&self, session_id: &SessionId) -> bool {
        self.surviving.lock().contains(session_id)
    }
}

// === 外部服务 ===

#[derive(Default)]
pub struct FakeProjects {
    pub projects: Mutex<Vec<Project>>,
    pub fail_list: AtomicBool,
}

impl FakeProjects {
    pub fn with(projects: Vec<Project>) -> Self {
        Self {
            projects: Mutex::new(projects),
            fail_list: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ProjectRegistry for FakeProjects {
    async fn list(&self) -> AppResult<Vec<Project>> {
        if self.fail_list.load(Ordering::SeqCst) {
            anyhow::bail!("registry unavailable");
        }
        Ok(self.projects.lock().clone())
    }

    async fn add(&self, project: Project) -> AppResult<()> {
        let mut projects = self.projects.lock();
        if projects.iter().any(|p| p.id == project.id) {
            anyhow::bail!("project {} already exists", project.id);
        }
        projects.push(project);
        Ok(())
    }

    async fn remove(&self, project_id: &str) -> AppResult<()> {
        let mut projects = self.projects.lock();
        let before = projects.len();
        projects.retain(|p| p.id != project_id);
        if projects.len() == before {
            anyhow::bail!("project {} not found", project_id);
        }
        Ok(())
    }
}

/// 构建脚本
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    Succeed,
    Fail(String),
    /// 一直运行直到被取消
    Hang,
}

#[derive(Default)]
pub struct ScriptedBuilds {
    scripts: Mutex<HashMap<String, Script>>,
    pub started: Mutex<Vec<String>>,
    pub observed_cancel: Mutex<Vec<String>>,
}

impl ScriptedBuilds {
    pub fn script(&self, label: &str, script: Script) {
        self.scripts.lock().insert(label.to_string(), script);
    }
}

#[async_trait]
impl BuildOrchestrator for ScriptedBuilds {
    async fn build(
        &self,
        target: BuildTarget,
        events: UnboundedSender<BuildEvent>,
        cancel: CancellationToken,
    ) -> AppResult<()> {
        let label = target.label();
        self.started.lock().push(label.clone());
        let script = self
            .scripts
            .lock()
            .get(&label)
            .cloned()
            .unwrap_or(Script::Succeed);

        let _ = events.send(BuildEvent::Started {
            label: label.clone(),
        });
        let _ = events.send(BuildEvent::Output {
            line: format!("compiling {}", label),
        });

        match script {
            Script::Succeed => {
                let _ = events.send(BuildEvent::Finished {
                    label,
                    success: true,
                });
                Ok(())
            }
            Script::Fail(reason) => {
                let _ = events.send(BuildEvent::Error {
                    line: reason.clone(),
                });
                anyhow::bail!(reason)
            }
            Script::Hang => {
                cancel.cancelled().await;
                self.observed_cancel.lock().push(label.clone());
                anyhow::bail!("{} interrupted", label)
            }
        }
    }
}

#[derive(Default)]
pub struct FakeProcesses {
    pub calls: Mutex<Vec<(String, ProcessAction)>>,
    pub failing: Mutex<HashSet<String>>,
    pub list_calls: AtomicUsize,
}

#[async_trait]
impl ProcessSupervisor for FakeProcesses {
    async fn control(&self, name: &str, action: ProcessAction) -> AppResult<()> {
        self.calls.lock().push((name.to_string(), action));
        if self.failing.lock().contains(name) {
            anyhow::bail!("supervisor refused");
        }
        Ok(())
    }

    async fn list(&self) -> AppResult<Vec<ProcessInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let calls = self.calls.lock();
        let mut names: Vec<&String> = calls.iter().map(|(name, _)| name).collect();
        names.sort();
        names.dedup();
        Ok(names
            .into_iter()
            .map(|name| ProcessInfo {
                name: name.clone(),
                project_id: None,
                status: ProcessStatus::Running,
                pid: Some(4242),
                started_at: None,
                restarts: 0,
            })
            .collect())
    }
}

#[derive(Default)]
pub struct FakeVcs {
    pub dirty: Mutex<HashSet<String>>,
}

#[async_trait]
impl VcsStatusService for FakeVcs {
    async fn status(&self, project: &Project) -> AppResult<RepositoryStatus> {
        let mut status = RepositoryStatus {
            is_repository: true,
            current_branch: Some("main".to_string()),
            ..Default::default()
        };
        if self.dirty.lock().contains(&project.id) {
            status.untracked_files.push(console_lib::git::FileChange {
                path: "new.txt".to_string(),
                status: console_lib::git::FileChangeStatus::Untracked,
                old_path: None,
            });
        }
        Ok(status)
    }

    async fn diff(&self, project: &Project, file: Option<&str>) -> AppResult<String> {
        Ok(format!("diff --git {} {}", project.id, file.unwrap_or("*")))
    }

    async fn log(&self, project: &Project, limit: usize) -> AppResult<Vec<CommitInfo>> {
        Ok((0..limit.min(3))
            .map(|i| CommitInfo {
                hash: format!("{}{:038}", project.id.len(), i),
                short_hash: format!("abc{}", i),
                author_name: "dev".to_string(),
                date: "2024-01-01".to_string(),
                message: format!("commit {}", i),
                refs: Vec::new(),
            })
            .collect())
    }
}

// === 组装 ===

pub fn test_config() -> ConfigHandle {
    let mut config = ConsoleConfig::default();
    config.sessions.poll_interval_ms = 10;
    config.sessions.shell_command = Some("/bin/sh".to_string());
    config.into_handle()
}

/// 一套完整的协调器和它的假依赖
pub struct Harness {
    pub coordinator: EventCoordinator,
    pub state: Arc<SharedState>,
    pub mux: Arc<SessionMultiplexer>,
    pub host: Arc<FakeHost>,
    pub projects: Arc<FakeProjects>,
    pub builds: Arc<ScriptedBuilds>,
    pub processes: Arc<FakeProcesses>,
    pub vcs: Arc<FakeVcs>,
    pub notifications: Arc<Mutex<Vec<Notification>>>,
}

impl Harness {
    pub fn new(projects: Vec<Project>) -> Self {
        let config = test_config();
        let state = Arc::new(SharedState::new());
        let host = Arc::new(FakeHost::default());
        let mux = Arc::new(SessionMultiplexer::with_host(
            Arc::clone(&config),
            Arc::clone(&host) as Arc<dyn SessionHost>,
        ));

        let projects = Arc::new(FakeProjects::with(projects));
        let builds = Arc::new(ScriptedBuilds::default());
        let processes = Arc::new(FakeProcesses::default());
        let vcs = Arc::new(FakeVcs::default());
        let services = Services {
            projects: Arc::clone(&projects) as Arc<dyn ProjectRegistry>,
            builds: Arc::clone(&builds) as Arc<dyn BuildOrchestrator>,
            processes: Arc::clone(&processes) as Arc<dyn ProcessSupervisor>,
            vcs: Arc::clone(&vcs) as Arc<dyn VcsStatusService>,
        };

        let coordinator =
            EventCoordinator::new(config, Arc::clone(&state), services, Arc::clone(&mux))
                .expect("协调器创建失败");

        let notifications = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notifications);
        coordinator.subscribe_notifications(move |n| {
            sink.lock().push(n.clone());
            true
        });

        Self {
            coordinator,
            state,
            mux,
            host,
            projects,
            builds,
            processes,
            vcs,
            notifications,
        }
    }

    pub fn notification_titles(&self) -> Vec<String> {
        self.notifications
            .lock()
            .iter()
            .map(|n| n.title.clone())
            .collect()
    }
}

pub fn project(id: &str) -> Project {
    Project::new(id, std::env::temp_dir().join(id))
}

/// 异步轮询直到条件成立，超时返回 false
pub async fn eventually<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// 同步版本，供线程测试使用
pub fn eventually_blocking<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub async fn with_timeout<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("操作超时")
}
