//! 意图错误

use thiserror::Error;

use crate::state::UnknownViewKind;

/// 调用方传入了无法处理的意图，属于调用方错误，不会转换为通知
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntentError {
    #[error("未知的事件类型: {0}")]
    UnknownEventKind(String),

    #[error("未知的视图类型: {0}")]
    UnknownViewKind(String),

    #[error("{kind} 缺少必需字段 {field}")]
    MissingField { kind: &'static str, field: &'static str },

    #[error("字段 {field} 的值无效: {value}")]
    InvalidField { field: &'static str, value: String },

    /// 协调器已关闭，不再接受新的意图
    #[error("协调器已关闭")]
    ShutDown,
}

impl From<UnknownViewKind> for IntentError {
    fn from(err: UnknownViewKind) -> Self {
        Self::UnknownViewKind(err.0)
    }
}
