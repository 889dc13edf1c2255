//! 多路复用器错误类型

use thiserror::Error;

use super::types::{SessionId, SessionState};

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("会话不存在: {0}")]
    NotFound(SessionId),

    /// 宿主无法启动或命令不存在，会话进入 Errored
    #[error("会话 {session_id} 启动失败: {reason}")]
    Launch { session_id: SessionId, reason: String },

    /// 会话不在 Running 状态
    #[error("会话 {session_id} 未运行 (当前状态: {state})")]
    Attach {
        session_id: SessionId,
        state: SessionState,
    },

    #[error("会话 {session_id} 不能从 {from} 转换到 {to}")]
    InvalidTransition {
        session_id: SessionId,
        from: SessionState,
        to: SessionState,
    },

    #[error("会话名称不能为空")]
    EmptyName,

    #[error("宿主操作失败: {0}")]
    Host(String),
}

impl MuxError {
    pub fn is_launch(&self) -> bool {
        matches!(self, Self::Launch { .. })
    }

    pub fn is_attach(&self) -> bool {
        matches!(self, Self::Attach { .. })
    }
}

pub type MuxResult<T> = Result<T, MuxError>;
