//! 会话多路复用器的核心类型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// 全局唯一、对外不透明的会话 id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Assistant,
    Database,
    Shell,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assistant => "assistant",
            Self::Database => "database",
            Self::Shell => "shell",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assistant" | "ai" => Ok(Self::Assistant),
            "database" | "db" => Ok(Self::Database),
            "shell" | "sh" => Ok(Self::Shell),
            other => Err(format!("未知的会话类型: {}", other)),
        }
    }
}

/// 会话生命周期
///
/// `Created -> Starting -> Running -> {Stopped, Errored}`，
/// 只有显式的 Start 才能从 Stopped/Errored 回到 Starting。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Starting,
    Running,
    Stopped,
    Errored,
}

impl SessionState {
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created | Stopped | Errored, Starting)
                | (Starting, Running | Errored | Stopped)
                | (Running, Stopped | Errored)
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Errored => "errored",
        };
        f.write_str(text)
    }
}

/// 要执行的程序，多路复用器不解释参数含义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl CommandSpec {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// 从命令行文本解析
    pub fn parse(line: &str) -> Result<Self, String> {
        let words = shell_words::split(line).map_err(|e| format!("无法解析命令 {}: {}", line, e))?;
        let mut words = words.into_iter();
        let executable = words.next().ok_or_else(|| "命令为空".to_string())?;
        Ok(Self {
            executable,
            args: words.collect(),
            env: HashMap::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSpec {
    pub session_id: SessionId,
    pub work_dir: PathBuf,
    pub command: CommandSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
}

impl TerminalSize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// 宿主可见缓冲区的一次抓取
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScreenCapture {
    pub lines: Vec<String>,
    /// 自启动以来输出的总行数
    pub line_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub kind: SessionKind,
    pub project_id: Option<String>,
    pub work_dir: PathBuf,
    pub launch: LaunchSpec,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(kind: SessionKind, project_id: Option<String>, launch: LaunchSpec) -> Self {
        let now = Utc::now();
        Self {
            id: launch.session_id.clone(),
            name: kind.as_str().to_string(),
            kind,
            project_id,
            work_dir: launch.work_dir.clone(),
            launch,
            state: SessionState::Created,
            created_at: now,
            last_active: now,
        }
    }

    pub fn record(&self) -> SessionRecord {
        SessionRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            project_id: self.project_id.clone(),
            work_dir: self.work_dir.clone(),
            launch: self.launch.clone(),
            created_at: self.created_at,
            last_active: self.last_active,
        }
    }
}

/// 持久化的会话描述，用于重启后重建会话表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: SessionId,
    pub name: String,
    pub kind: SessionKind,
    pub project_id: Option<String>,
    pub work_dir: PathBuf,
    pub launch: LaunchSpec,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl From<SessionRecord> for Session {
    fn from(record: SessionRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            kind: record.kind,
            project_id: record.project_id,
            work_dir: record.work_dir,
            launch: record.launch,
            state: SessionState::Created,
            created_at: record.created_at,
            last_active: record.last_active,
        }
    }
}

/// 终端状态快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalInfo {
    pub size: TerminalSize,
    pub running: bool,
    pub output_line_count: usize,
    pub generation: u64,
}

/// 前台会话的屏幕内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenSnapshot {
    pub lines: Vec<String>,
    pub line_count: usize,
    /// 单调递增，不会回退
    pub generation: u64,
}

/// 多路复用器事件
#[derive(Debug, Clone, PartialEq)]
pub enum MuxNotification {
    SessionCreated {
        session_id: SessionId,
    },
    SessionStateChanged {
        session_id: SessionId,
        from: SessionState,
        to: SessionState,
    },
    SessionRenamed {
        session_id: SessionId,
        name: String,
    },
    SessionDeleted {
        session_id: SessionId,
    },
    ForegroundChanged {
        session_id: Option<SessionId>,
    },
    ScreenUpdated {
        session_id: SessionId,
        generation: u64,
    },
    /// 按键转发失败导致退出终端输入模式
    InputModeExited {
        session_id: SessionId,
    },
}

impl MuxNotification {
    /// 会改变会话列表展示内容的事件
    pub fn affects_session_list(&self) -> bool {
        !matches!(self, Self::ScreenUpdated { .. })
    }
}
