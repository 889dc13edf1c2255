//! 无界面驱动
//!
//! 从标准输入逐行读取意图（`<tag> [key=value ...]`），把状态广播和通知以 JSON 行
//! 写到标准输出。`detach` 保存快照后退出，宿主中的会话继续运行；下次启动时恢复。

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigHandle, ConfigLoader};
use crate::coordinator::EventCoordinator;
use crate::mux::{KeyChord, SessionMultiplexer};
use crate::reattach::{
    FocusArea, NavigationState, PanelPosition, ReattachProtocol, SessionCatalog, SessionDirectory,
    SnapshotStore,
};
use crate::services::Services;
use crate::state::{SharedState, ViewKind};
use crate::utils::{error_chain_message, AppResult};

const TICK_INTERVAL: Duration = Duration::from_millis(250);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// 命令行参数
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(name = "devconsole", version, about = "本地开发运维控制台")]
pub struct DriverOptions {
    /// 配置文件路径，缺省时使用用户配置目录
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// 打印合并后的配置并退出
    #[arg(long)]
    pub print_config: bool,
}

/// 退出方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// 保存快照，保留宿主会话
    Detach,
    /// 结束所有会话并清除快照
    Quit,
}

/// 驱动自身处理的命令，其余内容作为意图交给协调器
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Detach,
    Quit,
    Show(Option<&'a str>),
    Screen,
    Key(&'a str),
    Send(&'a str),
    Select(&'a str),
    Search(&'a str),
    Browse(&'a str),
    Intent(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    match head {
        "detach" => Command::Detach,
        "quit" | "exit" => Command::Quit,
        "show" => Command::Show((!rest.is_empty()).then_some(rest)),
        "screen" => Command::Screen,
        "key" => Command::Key(rest),
        "send" => Command::Send(rest),
        "select" => Command::Select(rest),
        "search" => Command::Search(rest),
        "browse" => Command::Browse(rest),
        _ => Command::Intent(line),
    }
}

fn emit(kind: &str, data: impl Serialize) {
    match serde_json::to_string(&json!({ "type": kind, "data": data })) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("输出序列化失败: {}", e),
    }
}

pub async fn run(options: DriverOptions) -> AppResult<()> {
    let config = ConfigLoader::load(options.config_path.as_deref())?;
    if options.print_config {
        println!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let console = Console::start(config).await?;
    console.serve().await
}

struct Console {
    coordinator: EventCoordinator,
    mux: Arc<SessionMultiplexer>,
    state: Arc<SharedState>,
    protocol: ReattachProtocol,
    store: SnapshotStore,
    catalog: SessionCatalog,
    nav: NavigationState,
}

impl Console {
    async fn start(config: ConfigHandle) -> AppResult<Self> {
        let state = Arc::new(SharedState::with_notification_limit(
            config.coordinator.notification_history,
        ));
        let services = Services::local(&config);
        let mux = Arc::new(SessionMultiplexer::new(Arc::clone(&config)));
        info!("会话宿主: {}", mux.host_name());

        let catalog = SessionCatalog::from_config(&config.storage);
        let records = catalog.load().await?;
        if !records.is_empty() {
            let restoring = Arc::clone(&mux);
            let reattached = tokio::task::spawn_blocking(move || restoring.restore_records(records))
                .await
                .context("恢复会话目录失败")?;
            debug!("从会话目录重新连接 {} 个会话", reattached);
        }

        let coordinator = EventCoordinator::new(
            Arc::clone(&config),
            Arc::clone(&state),
            services,
            Arc::clone(&mux),
        )?;
        coordinator.subscribe(|update| {
            emit("update", update);
            true
        });
        coordinator.subscribe_notifications(|notification| {
            emit("notification", notification);
            true
        });
        coordinator.refresh().await;

        let directory = Arc::clone(&mux) as Arc<dyn SessionDirectory>;
        let protocol = ReattachProtocol::new(Arc::clone(&state), directory);
        let store = SnapshotStore::from_config(&config.storage);

        let mut nav = NavigationState::new();
        match store.load().await {
            Ok(Some(snapshot)) => {
                let summary = protocol.import(&mut nav, snapshot, |nav| {
                    if let Some(id) = &nav.foreground_session {
                        if let Err(e) = mux.foreground(id) {
                            warn!("恢复前台会话失败: {}", e);
                        }
                    }
                });
                info!(
                    "已恢复导航状态，移除 {} 个失效会话",
                    summary.dropped_sessions.len()
                );
            }
            Ok(None) => debug!("没有可恢复的快照"),
            Err(e) => warn!("读取重连快照失败: {}", error_chain_message(&e)),
        }

        Ok(Self {
            coordinator,
            mux,
            state,
            protocol,
            store,
            catalog,
            nav,
        })
    }

    async fn serve(mut self) -> AppResult<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let exit = loop {
            tokio::select! {
                line = lines.next_line() => match line.context("读取标准输入失败")? {
                    Some(line) => {
                        if let Some(exit) = self.execute(line.trim()) {
                            break exit;
                        }
                    }
                    None => break Exit::Detach,
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("收到中断信号，分离控制台");
                    break Exit::Detach;
                }
                _ = tick.tick() => {
                    self.state.clear_expired_header_events();
                }
            }
        };

        self.finish(exit).await
    }

    fn execute(&mut self, line: &str) -> Option<Exit> {
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        match parse_command(line) {
            Command::Detach => return Some(Exit::Detach),
            Command::Quit => return Some(Exit::Quit),
            Command::Show(kind) => {
                let view = match kind {
                    Some(kind) => self.coordinator.get_view_model(kind),
                    None => Ok(self.state.current_view_model()),
                };
                match view {
                    Ok(view) => emit("view", view),
                    Err(e) => emit("error", e.to_string()),
                }
                emit("header", self.state.latest_header_event().map(|h| h.message));
            }
            Command::Screen => match self.mux.foreground_session() {
                Some(id) => emit("screen", self.mux.screen(&id).map(|s| s.lines)),
                None => emit("error", "没有前台会话"),
            },
            Command::Key(chord) => match chord.parse::<KeyChord>() {
                Ok(chord) => {
                    let consumed = self.mux.handle_key(&chord.to_event());
                    emit("key", json!({ "chord": chord.to_string(), "forwarded": consumed }));
                }
                Err(e) => emit("error", e),
            },
            Command::Send(text) => match self.mux.foreground_session() {
                Some(id) => {
                    let mut data = text.as_bytes().to_vec();
                    data.push(b'\r');
                    if let Err(e) = self.mux.write_input(&id, &data) {
                        emit("error", e.to_string());
                    }
                }
                None => emit("error", "没有前台会话"),
            },
            Command::Select(index) => match index.parse::<usize>() {
                Ok(selected) => self.select(selected),
                Err(_) => emit("error", format!("无效的行号: {}", index)),
            },
            Command::Search(text) => {
                self.nav.search_text = text.to_string();
            }
            Command::Browse(dir) => {
                if let Err(e) = self.nav.file_browser.open(dir) {
                    emit("error", error_chain_message(&e));
                } else {
                    emit("browse", &self.nav.file_browser.entries);
                }
            }
            Command::Intent(line) => {
                if let Err(e) = self.coordinator.handle_line(line) {
                    emit("error", e.to_string());
                }
            }
        }

        self.sync_sessions();
        None
    }

    fn select(&mut self, selected: usize) {
        let kind: ViewKind = self.state.current_view();
        let previous = self.nav.position(kind);
        let mut position = PanelPosition::new(selected, previous.scroll.min(selected));
        position.clamp(self.state.item_count(kind));
        self.nav.set_position(kind, position);
        self.nav.focus = FocusArea::Content;
    }

    /// 用多路复用器的实际状态更新导航中的会话字段
    fn sync_sessions(&mut self) {
        self.nav.foreground_session = self.mux.foreground_session();
        self.nav.active_sessions = self
            .mux
            .list()
            .into_iter()
            .filter(|session| session.state.is_active())
            .map(|session| session.id)
            .collect();

        let input_mode = self.mux.input_mode();
        self.nav.modal.terminal_input = input_mode;
        if input_mode {
            self.nav.focus = FocusArea::Terminal;
        } else if self.nav.focus == FocusArea::Terminal {
            self.nav.focus = FocusArea::Content;
        }
    }

    async fn finish(mut self, exit: Exit) -> AppResult<()> {
        self.sync_sessions();
        self.coordinator.shutdown();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.coordinator.wait_idle())
            .await
            .is_err()
        {
            warn!("后台任务未在 {:?} 内结束", SHUTDOWN_GRACE);
        }

        let detach = exit == Exit::Detach;
        if detach {
            let snapshot = self.protocol.export(&self.nav);
            if let Err(e) = self.store.save(&snapshot).await {
                error!("保存重连快照失败: {}", error_chain_message(&e));
            }
            if let Err(e) = self.catalog.save(&self.mux.records()).await {
                error!("保存会话目录失败: {}", error_chain_message(&e));
            }
        } else {
            if let Err(e) = self.store.clear().await {
                warn!("清除重连快照失败: {}", error_chain_message(&e));
            }
            if let Err(e) = self.catalog.save(&[]).await {
                warn!("清空会话目录失败: {}", error_chain_message(&e));
            }
        }

        let mux = Arc::clone(&self.mux);
        tokio::task::spawn_blocking(move || mux.shutdown(detach))
            .await
            .context("关闭多路复用器失败")?;
        info!("控制台已退出 (detach={})", detach);
        Ok(())
    }
}
