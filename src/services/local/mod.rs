//! 基于配置和本地命令的服务实现

mod builds;
mod processes;
mod projects;

pub use builds::CommandBuildOrchestrator;
pub use processes::CommandProcessSupervisor;
pub use projects::ConfigProjectRegistry;

use anyhow::Context;
use tokio::process::Command as AsyncCommand;

use crate::utils::AppResult;

/// 按 shell 规则拆分命令行，不经过 shell 执行
pub(crate) fn command_from_line(line: &str) -> AppResult<AsyncCommand> {
    let words = shell_words::split(line).with_context(|| format!("无法解析命令: {}", line))?;
    let Some((program, args)) = words.split_first() else {
        crate::app_bail!("命令为空");
    };
    let mut cmd = AsyncCommand::new(program);
    cmd.args(args);
    Ok(cmd)
}
