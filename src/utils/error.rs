/*!
 * 错误处理模块
 *
 * 基于 anyhow 的统一错误处理系统，模块内部的可区分错误使用 thiserror 定义，
 * 跨模块的管道代码统一使用 AppResult 并通过 context 补充错误信息。
 */

use anyhow::{anyhow, Result as AnyhowResult};

/// 统一的应用程序结果类型
pub type AppResult<T> = AnyhowResult<T>;

/// 统一的应用程序错误类型
pub type AppError = anyhow::Error;

/// 创建简单的应用程序错误
pub fn app_error(msg: impl Into<String>) -> AppError {
    anyhow!(msg.into())
}

/// 将错误链压平为一行，用于通知消息
pub fn error_chain_message(err: &AppError) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        if !text.is_empty() && !parts.contains(&text) {
            parts.push(text);
        }
    }
    parts.join(": ")
}

// ============================================================================
// 便捷的错误创建宏
// ============================================================================

/// 快速创建带上下文的错误并返回
#[macro_export]
macro_rules! app_bail {
    ($msg:literal $(,)?) => {
        return Err(anyhow::anyhow!($msg))
    };
    ($err:expr $(,)?) => {
        return Err(anyhow::anyhow!($err))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err(anyhow::anyhow!($fmt, $($arg)*))
    };
}
