//! 会话宿主
//!
//! 宿主负责真正运行交互程序。tmux 宿主中的程序在界面退出后继续运行，
//! PTY 宿主在进程内运行，作为没有 tmux 时的后备。

mod pty;
mod screen;
mod tmux;

pub use pty::PtyHost;
pub use tmux::TmuxHost;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{HostKind, SessionConfig};
use crate::mux::types::{LaunchSpec, ScreenCapture, SessionId, TerminalSize};
use crate::utils::AppResult;

/// 宿主中运行的一个会话进程
pub trait HostedProcess: Send + Sync {
    fn write(&self, data: &[u8]) -> AppResult<()>;

    fn resize(&self, size: TerminalSize) -> AppResult<()>;

    /// 抓取当前可见缓冲区
    fn capture(&self) -> AppResult<ScreenCapture>;

    fn is_alive(&self) -> bool;

    /// 结束程序，可能阻塞，调用方应在后台线程执行
    fn terminate(&self) -> AppResult<()>;

    /// 界面分离时调用，能存活的宿主保持程序运行
    fn detach(&self) {}
}

pub trait SessionHost: Send + Sync {
    fn name(&self) -> &'static str;

    /// 启动程序，或重新连接到仍在运行的宿主会话
    fn launch(&self, spec: &LaunchSpec, size: TerminalSize) -> AppResult<Arc<dyn HostedProcess>>;

    /// 宿主中是否仍存在该会话
    fn exists(&self, session_id: &SessionId) -> bool;
}

/// 按配置创建宿主
pub fn host_from_config(config: &SessionConfig) -> Arc<dyn SessionHost> {
    match config.host {
        HostKind::Tmux => Arc::new(TmuxHost::new(&config.tmux_program, &config.name_prefix)),
        HostKind::Pty => Arc::new(PtyHost::new(config.scrollback_lines)),
    }
}

/// 在 PATH 中查找可执行文件
pub fn resolve_executable(executable: &str) -> Option<PathBuf> {
    let candidate = Path::new(executable);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(executable))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
