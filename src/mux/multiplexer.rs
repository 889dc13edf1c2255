/*!
 * 会话多路复用器
 *
 * 管理多个并发运行的交互会话（助手、数据库客户端、shell）。会话表由一把读写锁保护，
 * 宿主调用（启动、抓取、结束）都在锁外执行。同一时刻最多一个前台会话接收按键，
 * 前台会话的输出由轮询线程按固定间隔抓取。
 */

use crossterm::event::KeyEvent;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use super::error::{MuxError, MuxResult};
use super::host::{host_from_config, HostedProcess, SessionHost};
use super::keys::{encode_key, ReservedKeys};
use super::poller::{PollTarget, PollerHandle};
use super::types::{
    CommandSpec, LaunchSpec, MuxNotification, ScreenCapture, ScreenSnapshot, Session, SessionId,
    SessionKind, SessionRecord, SessionState, TerminalInfo, TerminalSize,
};
use crate::config::ConfigHandle;
use crate::utils::{error_chain_message, SubscriberRegistry, SubscriptionId};

/// 会话绑定的终端，每个会话恰好一个
struct Terminal {
    size: TerminalSize,
    running: bool,
    output_line_count: usize,
    screen: Vec<String>,
    generation: u64,
    process: Option<Arc<dyn HostedProcess>>,
}

impl Terminal {
    fn new(size: TerminalSize) -> Self {
        Self {
            size,
            running: false,
            output_line_count: 0,
            screen: Vec::new(),
            generation: 0,
            process: None,
        }
    }

    fn info(&self) -> TerminalInfo {
        TerminalInfo {
            size: self.size,
            running: self.running,
            output_line_count: self.output_line_count,
            generation: self.generation,
        }
    }
}

struct SessionEntry {
    session: Session,
    terminal: Terminal,
}

/// 轮询线程与多路复用器共享的部分
struct MuxShared {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    foreground: RwLock<Option<SessionId>>,
    input_mode: AtomicBool,
    subscribers: SubscriberRegistry<MuxNotification>,
}

impl MuxShared {
    fn notify(&self, notification: MuxNotification) {
        self.subscribers.notify(&notification);
    }

    fn is_foreground(&self, session_id: &SessionId) -> bool {
        self.foreground.read().as_ref() == Some(session_id)
    }

    /// 宿主进程已退出：会话降为 Stopped，前台会话同时退出终端输入模式
    fn host_exited(&self, session_id: &SessionId) -> bool {
        let from = {
            let mut sessions = self.sessions.write();
            let Some(entry) = sessions.get_mut(session_id) else {
                return false;
            };
            let from = entry.session.state;
            if !from.is_active() {
                return false;
            }
            entry.session.state = SessionState::Stopped;
            entry.terminal.running = false;
            entry.terminal.process = None;
            from
        };

        info!("会话 {} 的宿主进程已退出", session_id);
        self.notify(MuxNotification::SessionStateChanged {
            session_id: session_id.clone(),
            from,
            to: SessionState::Stopped,
        });

        if self.is_foreground(session_id) && self.input_mode.swap(false, Ordering::AcqRel) {
            self.notify(MuxNotification::InputModeExited {
                session_id: session_id.clone(),
            });
        }
        true
    }

    /// 写入抓取结果，内容变化时返回新的代数
    fn apply_capture(&self, session_id: &SessionId, capture: ScreenCapture) -> Option<u64> {
        let mut sessions = self.sessions.write();
        let entry = sessions.get_mut(session_id)?;
        if entry.session.state != SessionState::Running {
            return None;
        }
        let terminal = &mut entry.terminal;
        terminal.output_line_count = terminal.output_line_count.max(capture.line_count);
        if terminal.screen == capture.lines {
            return None;
        }
        terminal.screen = capture.lines;
        terminal.generation += 1;
        Some(terminal.generation)
    }
}

impl PollTarget for MuxShared {
    fn poll_once(&self, session_id: &SessionId) -> bool {
        if !self.is_foreground(session_id) {
            return false;
        }

        let process = {
            let sessions = self.sessions.read();
            match sessions.get(session_id) {
                Some(entry) if entry.session.state == SessionState::Running => {
                    entry.terminal.process.clone()
                }
                _ => None,
            }
        };
        let Some(process) = process else {
            return false;
        };

        if !process.is_alive() {
            self.host_exited(session_id);
            return false;
        }

        match process.capture() {
            Ok(capture) => {
                if let Some(generation) = self.apply_capture(session_id, capture) {
                    self.notify(MuxNotification::ScreenUpdated {
                        session_id: session_id.clone(),
                        generation,
                    });
                }
                true
            }
            Err(e) => {
                if process.is_alive() {
                    warn!("抓取会话 {} 输出失败: {}", session_id, e);
                    true
                } else {
                    self.host_exited(session_id);
                    false
                }
            }
        }
    }
}

fn terminate_in_background(session_id: SessionId, process: Arc<dyn HostedProcess>) {
    let spawned = thread::Builder::new()
        .name(format!("mux-teardown-{}", session_id))
        .spawn(move || {
            if let Err(e) = process.terminate() {
                warn!("结束会话 {} 失败: {}", session_id, e);
            }
        });
    if let Err(e) = spawned {
        warn!("无法创建会话清理线程: {}", e);
    }
}

pub struct SessionMultiplexer {
    shared: Arc<MuxShared>,
    host: Arc<dyn SessionHost>,
    config: ConfigHandle,
    reserved: ReservedKeys,
    poller: Mutex<Option<PollerHandle>>,
}

impl SessionMultiplexer {
    /// 按配置选择宿主
    pub fn new(config: ConfigHandle) -> Self {
        let host = host_from_config(&config.sessions);
        Self::with_host(config, host)
    }

    pub fn with_host(config: ConfigHandle, host: Arc<dyn SessionHost>) -> Self {
        info!("会话多路复用器使用 {} 宿主", host.name());
        let reserved = ReservedKeys::from_config(&config.keys);
        Self {
            shared: Arc::new(MuxShared {
                sessions: RwLock::new(HashMap::new()),
                foreground: RwLock::new(None),
                input_mode: AtomicBool::new(false),
                subscribers: SubscriberRegistry::new(),
            }),
            host,
            config,
            reserved,
            poller: Mutex::new(None),
        }
    }

    pub fn host_name(&self) -> &'static str {
        self.host.name()
    }

    fn default_size(&self) -> TerminalSize {
        TerminalSize::new(
            self.config.sessions.default_rows,
            self.config.sessions.default_cols,
        )
    }

    /// 按会话类型从配置生成启动命令
    fn command_for(&self, kind: SessionKind) -> Result<CommandSpec, String> {
        let sessions = &self.config.sessions;
        let line = match kind {
            SessionKind::Assistant => sessions.assistant_command.clone(),
            SessionKind::Database => sessions.database_command.clone(),
            SessionKind::Shell => sessions
                .shell_command
                .clone()
                .or_else(|| std::env::var("SHELL").ok())
                .unwrap_or_else(|| "sh".to_string()),
        };
        let mut command = CommandSpec::parse(&line)?;
        for (key, value) in &sessions.env {
            command.env.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Ok(command)
    }

    fn insert_session(&self, session: Session) {
        let session_id = session.id.clone();
        let terminal = Terminal::new(self.default_size());
        self.shared
            .sessions
            .write()
            .insert(session_id.clone(), SessionEntry { session, terminal });
        self.shared
            .notify(MuxNotification::SessionCreated { session_id });
    }

    /// 为项目创建一个新会话，不启动进程
    pub fn create_session(
        &self,
        kind: SessionKind,
        project_id: Option<String>,
        work_dir: PathBuf,
        name: Option<String>,
    ) -> MuxResult<Session> {
        let session_id = SessionId::new();
        let command = self
            .command_for(kind)
            .map_err(|reason| MuxError::Launch {
                session_id: session_id.clone(),
                reason,
            })?;

        let mut session = Session::new(
            kind,
            project_id,
            LaunchSpec {
                session_id,
                work_dir,
                command,
            },
        );
        if let Some(name) = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
            session.name = name;
        }

        info!("创建会话: {} ({})", session.id, session.kind);
        self.insert_session(session.clone());
        Ok(session)
    }

    /// 返回已有终端，或为启动描述惰性创建会话和终端，不启动进程
    pub fn get_or_create(
        &self,
        session_id: &SessionId,
        work_dir: PathBuf,
        command: CommandSpec,
    ) -> TerminalInfo {
        if let Some(entry) = self.shared.sessions.read().get(session_id) {
            return entry.terminal.info();
        }

        let session = Session::new(
            SessionKind::Shell,
            None,
            LaunchSpec {
                session_id: session_id.clone(),
                work_dir,
                command,
            },
        );

        // 并发创建时以先插入者为准
        let info = {
            let mut sessions = self.shared.sessions.write();
            if let Some(entry) = sessions.get(session_id) {
                return entry.terminal.info();
            }
            let terminal = Terminal::new(self.default_size());
            let info = terminal.info();
            sessions.insert(session_id.clone(), SessionEntry { session, terminal });
            info
        };

        debug!("惰性创建会话: {}", session_id);
        self.shared.notify(MuxNotification::SessionCreated {
            session_id: session_id.clone(),
        });
        info
    }

    /// 启动会话，或重新连接到宿主中仍在运行的会话
    ///
    /// `Created/Stopped/Errored -> Starting -> Running`，失败时进入 Errored。
    /// 宿主启动可能阻塞，异步上下文中应放到阻塞线程执行。
    pub fn start(&self, session_id: &SessionId) -> MuxResult<()> {
        let (from, spec, size) = {
            let mut sessions = self.shared.sessions.write();
            let entry = sessions
                .get_mut(session_id)
                .ok_or_else(|| MuxError::NotFound(session_id.clone()))?;
            let from = entry.session.state;
            match from {
                SessionState::Running => return Ok(()),
                SessionState::Starting => {
                    return Err(MuxError::InvalidTransition {
                        session_id: session_id.clone(),
                        from,
                        to: SessionState::Starting,
                    })
                }
                _ => {}
            }
            entry.session.state = SessionState::Starting;
            (from, entry.session.launch.clone(), entry.terminal.size)
        };
        self.shared.notify(MuxNotification::SessionStateChanged {
            session_id: session_id.clone(),
            from,
            to: SessionState::Starting,
        });

        match self.host.launch(&spec, size) {
            Ok(process) => self.attach_process(session_id, process),
            Err(e) => {
                let reason = error_chain_message(&e);
                warn!("会话 {} 启动失败: {}", session_id, reason);
                let errored = {
                    let mut sessions = self.shared.sessions.write();
                    match sessions.get_mut(session_id) {
                        Some(entry) if entry.session.state == SessionState::Starting => {
                            entry.session.state = SessionState::Errored;
                            entry.terminal.running = false;
                            true
                        }
                        _ => false,
                    }
                };
                if errored {
                    self.shared.notify(MuxNotification::SessionStateChanged {
                        session_id: session_id.clone(),
                        from: SessionState::Starting,
                        to: SessionState::Errored,
                    });
                }
                Err(MuxError::Launch {
                    session_id: session_id.clone(),
                    reason,
                })
            }
        }
    }

    fn attach_process(
        &self,
        session_id: &SessionId,
        process: Arc<dyn HostedProcess>,
    ) -> MuxResult<()> {
        let attached = {
            let mut sessions = self.shared.sessions.write();
            match sessions.get_mut(session_id) {
                Some(entry) if entry.session.state == SessionState::Starting => {
                    entry.session.state = SessionState::Running;
                    entry.session.last_active = chrono::Utc::now();
                    entry.terminal.running = true;
                    entry.terminal.process = Some(Arc::clone(&process));
                    Some(true)
                }
                Some(_) => Some(false),
                None => None,
            }
        };

        match attached {
            Some(true) => {
                info!("会话已运行: {}", session_id);
                self.shared.notify(MuxNotification::SessionStateChanged {
                    session_id: session_id.clone(),
                    from: SessionState::Starting,
                    to: SessionState::Running,
                });
                if self.shared.is_foreground(session_id) {
                    self.shared.input_mode.store(true, Ordering::Release);
                    self.ensure_poller(session_id);
                }
                Ok(())
            }
            // 启动期间被停止
            Some(false) => {
                debug!("会话 {} 在启动过程中被停止", session_id);
                terminate_in_background(session_id.clone(), process);
                Ok(())
            }
            None => {
                terminate_in_background(session_id.clone(), process);
                Err(MuxError::NotFound(session_id.clone()))
            }
        }
    }

    /// 调整终端大小，只在 Running 状态下有效
    pub fn set_size(&self, session_id: &SessionId, cols: u16, rows: u16) -> MuxResult<()> {
        let size = TerminalSize::new(rows, cols);
        let process = {
            let mut sessions = self.shared.sessions.write();
            let entry = sessions
                .get_mut(session_id)
                .ok_or_else(|| MuxError::NotFound(session_id.clone()))?;
            if entry.session.state != SessionState::Running {
                return Err(MuxError::Attach {
                    session_id: session_id.clone(),
                    state: entry.session.state,
                });
            }
            entry.terminal.size = size;
            entry.terminal.process.clone()
        };

        if let Some(process) = process {
            process
                .resize(size)
                .map_err(|e| MuxError::Host(error_chain_message(&e)))?;
        }
        Ok(())
    }

    /// 把按键转发给前台会话，返回按键是否被会话消费
    ///
    /// 保留按键永远不转发；前台会话不在 Running 状态时忽略按键。
    pub fn handle_key(&self, key: &KeyEvent) -> bool {
        if self.reserved.is_reserved(key) || !self.input_mode() {
            return false;
        }
        let Some(session_id) = self.foreground_session() else {
            return false;
        };
        let Some(bytes) = encode_key(key) else {
            return false;
        };

        match self.write_input(&session_id, &bytes) {
            Ok(()) => true,
            Err(MuxError::Attach { state, .. }) => {
                debug!("忽略发往 {} 状态会话的按键", state);
                false
            }
            Err(e) => {
                debug!("按键转发失败: {}", e);
                false
            }
        }
    }

    /// 向会话写入原始输入
    pub fn write_input(&self, session_id: &SessionId, data: &[u8]) -> MuxResult<()> {
        let process = {
            let sessions = self.shared.sessions.read();
            let entry = sessions
                .get(session_id)
                .ok_or_else(|| MuxError::NotFound(session_id.clone()))?;
            match (&entry.session.state, &entry.terminal.process) {
                (SessionState::Running, Some(process)) => Arc::clone(process),
                (state, _) => {
                    return Err(MuxError::Attach {
                        session_id: session_id.clone(),
                        state: *state,
                    })
                }
            }
        };

        if let Err(e) = process.write(data) {
            if !process.is_alive() {
                self.shared.host_exited(session_id);
            }
            return Err(MuxError::Host(error_chain_message(&e)));
        }
        Ok(())
    }

    /// 停止会话
    ///
    /// 状态立即变为 Stopped，宿主清理在后台线程继续进行。
    /// 对 Created/Stopped/Errored 状态的会话无操作。
    pub fn stop(&self, session_id: &SessionId) -> MuxResult<()> {
        let (from, process) = {
            let mut sessions = self.shared.sessions.write();
            let entry = sessions
                .get_mut(session_id)
                .ok_or_else(|| MuxError::NotFound(session_id.clone()))?;
            let from = entry.session.state;
            if !from.is_active() {
                return Ok(());
            }
            entry.session.state = SessionState::Stopped;
            entry.terminal.running = false;
            (from, entry.terminal.process.take())
        };

        info!("停止会话: {}", session_id);
        self.shared.notify(MuxNotification::SessionStateChanged {
            session_id: session_id.clone(),
            from,
            to: SessionState::Stopped,
        });
        if self.shared.is_foreground(session_id) {
            self.shared.input_mode.store(false, Ordering::Release);
        }
        if let Some(process) = process {
            terminate_in_background(session_id.clone(), process);
        }
        Ok(())
    }

    /// 删除会话并结束其终端
    pub fn delete(&self, session_id: &SessionId) -> MuxResult<()> {
        let entry = self
            .shared
            .sessions
            .write()
            .remove(session_id)
            .ok_or_else(|| MuxError::NotFound(session_id.clone()))?;

        if self.shared.is_foreground(session_id) {
            self.background();
        }
        if let Some(process) = entry.terminal.process {
            terminate_in_background(session_id.clone(), process);
        }

        info!("删除会话: {}", session_id);
        self.shared.notify(MuxNotification::SessionDeleted {
            session_id: session_id.clone(),
        });
        Ok(())
    }

    pub fn rename(&self, session_id: &SessionId, name: &str) -> MuxResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MuxError::EmptyName);
        }
        {
            let mut sessions = self.shared.sessions.write();
            let entry = sessions
                .get_mut(session_id)
                .ok_or_else(|| MuxError::NotFound(session_id.clone()))?;
            entry.session.name = name.to_string();
        }
        self.shared.notify(MuxNotification::SessionRenamed {
            session_id: session_id.clone(),
            name: name.to_string(),
        });
        Ok(())
    }

    /// 切换前台会话
    ///
    /// 运行中的会话进入终端输入模式并开始轮询输出。
    pub fn foreground(&self, session_id: &SessionId) -> MuxResult<()> {
        let running = {
            let mut sessions = self.shared.sessions.write();
            let entry = sessions
                .get_mut(session_id)
                .ok_or_else(|| MuxError::NotFound(session_id.clone()))?;
            entry.session.last_active = chrono::Utc::now();
            entry.session.state == SessionState::Running
        };

        let previous = self.shared.foreground.write().replace(session_id.clone());
        self.shared.input_mode.store(running, Ordering::Release);

        if running {
            self.ensure_poller(session_id);
        } else {
            self.stop_poller();
        }

        if previous.as_ref() != Some(session_id) {
            debug!("前台会话切换为 {}", session_id);
            self.shared.notify(MuxNotification::ForegroundChanged {
                session_id: Some(session_id.clone()),
            });
        }
        Ok(())
    }

    /// 取消前台会话，停止轮询
    pub fn background(&self) {
        let previous = self.shared.foreground.write().take();
        self.shared.input_mode.store(false, Ordering::Release);
        self.stop_poller();
        if previous.is_some() {
            self.shared
                .notify(MuxNotification::ForegroundChanged { session_id: None });
        }
    }

    pub fn foreground_session(&self) -> Option<SessionId> {
        self.shared.foreground.read().clone()
    }

    pub fn input_mode(&self) -> bool {
        self.shared.input_mode.load(Ordering::Acquire)
    }

    /// 切换终端输入模式，只有运行中的前台会话才能进入
    pub fn set_input_mode(&self, enabled: bool) -> bool {
        let allowed = enabled
            && self
                .foreground_session()
                .and_then(|id| self.session(&id))
                .is_some_and(|s| s.state == SessionState::Running);
        self.shared.input_mode.store(allowed, Ordering::Release);
        allowed
    }

    fn ensure_poller(&self, session_id: &SessionId) {
        let mut slot = self.poller.lock();
        if let Some(handle) = slot.as_ref() {
            if handle.session_id() == session_id && handle.is_active() {
                return;
            }
        }
        if let Some(old) = slot.take() {
            old.stop();
        }
        *slot = Some(PollerHandle::spawn(
            Arc::downgrade(&self.shared),
            session_id.clone(),
            self.config.sessions.poll_interval(),
        ));
    }

    fn stop_poller(&self) {
        if let Some(handle) = self.poller.lock().take() {
            handle.stop();
        }
    }

    /// 是否有轮询线程在运行
    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .is_some_and(|handle| handle.is_active())
    }

    /// 宿主中的程序是否存活，与界面是否连接无关
    pub fn is_running(&self, session_id: &SessionId) -> bool {
        let process = self
            .shared
            .sessions
            .read()
            .get(session_id)
            .and_then(|entry| entry.terminal.process.clone());
        process.is_some_and(|p| p.is_alive())
    }

    /// 按创建时间排序的会话列表
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .shared
            .sessions
            .read()
            .values()
            .map(|entry| entry.session.clone())
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        sessions
    }

    pub fn session(&self, session_id: &SessionId) -> Option<Session> {
        self.shared
            .sessions
            .read()
            .get(session_id)
            .map(|entry| entry.session.clone())
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.shared.sessions.read().contains_key(session_id)
    }

    pub fn terminal_info(&self, session_id: &SessionId) -> Option<TerminalInfo> {
        self.shared
            .sessions
            .read()
            .get(session_id)
            .map(|entry| entry.terminal.info())
    }

    /// 最近一次抓取的屏幕内容
    pub fn screen(&self, session_id: &SessionId) -> Option<ScreenSnapshot> {
        self.shared
            .sessions
            .read()
            .get(session_id)
            .map(|entry| ScreenSnapshot {
                lines: entry.terminal.screen.clone(),
                line_count: entry.terminal.output_line_count,
                generation: entry.terminal.generation,
            })
    }

    /// 持久化用的会话描述
    pub fn records(&self) -> Vec<SessionRecord> {
        self.list().iter().map(Session::record).collect()
    }

    /// 按持久化描述重建会话表，宿主中仍存在的会话会重新连接
    ///
    /// 返回重新连接的会话数。
    pub fn restore_records(&self, records: Vec<SessionRecord>) -> usize {
        let mut reattached = 0;
        for record in records {
            if self.contains(&record.id) {
                continue;
            }
            let session_id = record.id.clone();
            self.insert_session(Session::from(record));

            if !self.host.exists(&session_id) {
                continue;
            }
            match self.start(&session_id) {
                Ok(()) => reattached += 1,
                Err(e) => warn!("重新连接会话 {} 失败: {}", session_id, e),
            }
        }
        if reattached > 0 {
            info!("重新连接了 {} 个会话", reattached);
        }
        reattached
    }

    /// 注册会话事件回调，返回 false 自动取消
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&MuxNotification) -> bool + Send + Sync + 'static,
    {
        self.shared.subscribers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.subscribers.unsubscribe(id)
    }

    /// 关闭多路复用器
    ///
    /// `detach` 为 true 时保留宿主中的程序，下次启动可以重新连接。
    pub fn shutdown(&self, detach: bool) {
        if let Some(handle) = self.poller.lock().take() {
            handle.join();
        }
        *self.shared.foreground.write() = None;
        self.shared.input_mode.store(false, Ordering::Release);

        let processes: Vec<(SessionId, Arc<dyn HostedProcess>)> = {
            let mut sessions = self.shared.sessions.write();
            sessions
                .iter_mut()
                .filter_map(|(id, entry)| {
                    let process = entry.terminal.process.take()?;
                    entry.terminal.running = false;
                    if !detach {
                        entry.session.state = SessionState::Stopped;
                    }
                    Some((id.clone(), process))
                })
                .collect()
        };

        info!(
            "多路复用器关闭: {} 个会话, detach={}",
            processes.len(),
            detach
        );
        for (session_id, process) in processes {
            if detach {
                process.detach();
            } else if let Err(e) = process.terminate() {
                warn!("结束会话 {} 失败: {}", session_id, e);
            }
        }
    }
}

impl std::fmt::Debug for SessionMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMultiplexer")
            .field("host", &self.host.name())
            .field("sessions", &self.shared.sessions.read().len())
            .field("foreground", &self.foreground_session())
            .finish()
    }
}
