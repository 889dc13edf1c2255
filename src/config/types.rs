//! 控制台配置类型定义

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// 注入到协调器和多路复用器中的只读配置句柄
pub type ConfigHandle = Arc<ConsoleConfig>;

/// 控制台配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConsoleConfig {
    /// 交互会话配置
    pub sessions: SessionConfig,
    /// 保留给界面的按键
    pub keys: KeyConfig,
    /// 协调器配置
    pub coordinator: CoordinatorConfig,
    /// 头部事件配置
    pub header: HeaderConfig,
    /// 快照存储配置
    pub storage: StorageConfig,
    /// 项目列表
    pub projects: Vec<ProjectConfig>,
    /// 受监管的进程列表
    pub processes: Vec<ProcessConfig>,
}

impl ConsoleConfig {
    pub fn into_handle(self) -> ConfigHandle {
        Arc::new(self)
    }
}

/// 会话宿主类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostKind {
    /// tmux 会话，界面退出后进程继续运行
    #[default]
    Tmux,
    /// 进程内 PTY，界面退出时一并结束
    Pty,
}

impl std::str::FromStr for HostKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tmux" => Ok(Self::Tmux),
            "pty" => Ok(Self::Pty),
            other => Err(format!("未知的会话宿主类型: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub host: HostKind,
    /// tmux 可执行文件
    pub tmux_program: String,
    /// tmux 会话名前缀
    pub name_prefix: String,
    /// 前台会话输出抓取间隔（毫秒）
    pub poll_interval_ms: u64,
    /// PTY 宿主保留的回滚行数
    pub scrollback_lines: usize,
    pub default_rows: u16,
    pub default_cols: u16,
    /// 助手会话启动命令
    pub assistant_command: String,
    /// 数据库客户端启动命令
    pub database_command: String,
    /// shell 会话启动命令，为空时使用 $SHELL
    pub shell_command: Option<String>,
    /// 所有会话附加的环境变量
    pub env: HashMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: HostKind::Tmux,
            tmux_program: "tmux".to_string(),
            name_prefix: "devconsole-".to_string(),
            poll_interval_ms: 100,
            scrollback_lines: 2_000,
            default_rows: 24,
            default_cols: 80,
            assistant_command: "claude".to_string(),
            database_command: "psql".to_string(),
            shell_command: None,
            env: HashMap::new(),
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeyConfig {
    /// 命令前缀键
    pub command_prefix: String,
    /// 面板切换键
    pub panel_switch: Vec<String>,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            command_prefix: "ctrl+]".to_string(),
            panel_switch: (1..=6).map(|n| format!("alt+{}", n)).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// 构建视图保留的输出行数
    pub build_output_limit: usize,
    /// 构建历史条数
    pub build_history_limit: usize,
    /// 保留的通知条数
    pub notification_history: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            build_output_limit: 500,
            build_history_limit: 20,
            notification_history: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeaderConfig {
    /// 头部事件默认过期时间（毫秒）
    pub default_expiry_ms: u64,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            default_expiry_ms: 5_000,
        }
    }
}

impl HeaderConfig {
    pub fn default_expiry(&self) -> Duration {
        Duration::from_millis(self.default_expiry_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// 状态目录，为空时使用平台数据目录
    pub state_dir: Option<PathBuf>,
    pub backup_count: usize,
    pub compression: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            backup_count: 3,
            compression: true,
        }
    }
}

impl StorageConfig {
    pub fn resolved_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("devconsole")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ProjectConfig {
    pub id: String,
    pub name: Option<String>,
    pub path: PathBuf,
    pub build_command: Option<String>,
    pub components: Vec<ComponentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ComponentConfig {
    pub name: String,
    pub build_command: String,
    /// 相对项目根目录的工作目录
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ProcessConfig {
    pub name: String,
    pub project_id: Option<String>,
    pub command: String,
    pub work_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
}
