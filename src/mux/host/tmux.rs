//! tmux 宿主
//!
//! 每个会话对应一个分离的 tmux 会话，界面退出后程序继续运行，
//! 下次启动时按会话名重新连接。

use anyhow::{anyhow, Context};
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{resolve_executable, HostedProcess, SessionHost};
use crate::app_bail;
use crate::mux::types::{LaunchSpec, ScreenCapture, SessionId, TerminalSize};
use crate::utils::AppResult;

#[derive(Debug, Clone)]
pub struct TmuxHost {
    program: String,
    prefix: String,
}

impl TmuxHost {
    pub fn new(program: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            prefix: prefix.into(),
        }
    }

    /// tmux 会话名，`.` `:` 等目标语法字符替换为 `_`
    pub fn session_name(&self, session_id: &SessionId) -> String {
        format!("{}{}", self.prefix, session_id)
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn has_session(&self, name: &str) -> bool {
        run_tmux(&self.program, &["has-session", "-t", exact(name).as_str()])
            .map(|out| out.status.success())
            .unwrap_or(false)
    }
}

/// `=name` 按会话名精确匹配
fn exact(name: &str) -> String {
    format!("={}", name)
}

fn run_tmux(program: &str, args: &[&str]) -> AppResult<Output> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("执行 {} {} 失败", program, args.first().unwrap_or(&"")))
}

fn run_tmux_checked(program: &str, args: &[&str]) -> AppResult<Output> {
    let output = run_tmux(program, args)?;
    if !output.status.success() {
        app_bail!(
            "{} {} 失败: {}",
            program,
            args.first().unwrap_or(&""),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output)
}

impl SessionHost for TmuxHost {
    fn name(&self) -> &'static str {
        "tmux"
    }

    fn launch(&self, spec: &LaunchSpec, size: TerminalSize) -> AppResult<Arc<dyn HostedProcess>> {
        let name = self.session_name(&spec.session_id);
        let process: Arc<dyn HostedProcess> = Arc::new(TmuxProcess {
            program: self.program.clone(),
            name: name.clone(),
        });

        if self.has_session(&name) {
            info!("重新连接 tmux 会话: {}", name);
            if let Err(e) = process.resize(size) {
                warn!("调整 tmux 会话大小失败: {}", e);
            }
            return Ok(process);
        }

        if resolve_executable(&spec.command.executable).is_none() {
            app_bail!("命令不存在: {}", spec.command.executable);
        }

        let cols = size.cols.to_string();
        let rows = size.rows.to_string();
        let work_dir = spec.work_dir.to_string_lossy().into_owned();
        let mut args: Vec<String> = [
            "new-session",
            "-d",
            "-s",
            name.as_str(),
            "-x",
            cols.as_str(),
            "-y",
            rows.as_str(),
            "-c",
            work_dir.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let mut env: Vec<_> = spec.command.env.iter().collect();
        env.sort();
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push("--".to_string());
        args.push(spec.command.executable.clone());
        args.extend(spec.command.args.iter().cloned());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        debug!("创建 tmux 会话: {} {:?}", name, spec.command);
        run_tmux_checked(&self.program, &arg_refs)
            .with_context(|| format!("创建 tmux 会话失败: {}", name))?;

        if !self.has_session(&name) {
            app_bail!("{} 启动后立即退出", spec.command.executable);
        }

        info!("tmux 会话已启动: {}", name);
        Ok(process)
    }

    fn exists(&self, session_id: &SessionId) -> bool {
        self.has_session(&self.session_name(session_id))
    }
}

struct TmuxProcess {
    program: String,
    name: String,
}

impl TmuxProcess {
    /// 窗格目标：会话中的当前窗格
    fn pane_target(&self) -> String {
        format!("={}:", self.name)
    }
}

impl HostedProcess for TmuxProcess {
    fn write(&self, data: &[u8]) -> AppResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let target = self.pane_target();
        let hex: Vec<String> = data.iter().map(|b| format!("{:02x}", b)).collect();
        let mut args = vec!["send-keys", "-t", target.as_str(), "-H"];
        args.extend(hex.iter().map(String::as_str));
        run_tmux_checked(&self.program, &args)
            .with_context(|| format!("向 tmux 会话 {} 发送按键失败", self.name))?;
        Ok(())
    }

    fn resize(&self, size: TerminalSize) -> AppResult<()> {
        let target = self.pane_target();
        let cols = size.cols.to_string();
        let rows = size.rows.to_string();
        run_tmux_checked(
            &self.program,
            &[
                "resize-window",
                "-t",
                target.as_str(),
                "-x",
                cols.as_str(),
                "-y",
                rows.as_str(),
            ],
        )?;
        Ok(())
    }

    fn capture(&self) -> AppResult<ScreenCapture> {
        let target = self.pane_target();
        let output = run_tmux_checked(&self.program, &["capture-pane", "-p", "-t", target.as_str()])?;
        let text = String::from_utf8_lossy(&output.stdout);
        let mut lines: Vec<String> = text.lines().map(|l| l.trim_end().to_string()).collect();
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }

        let history = run_tmux(
            &self.program,
            &["display-message", "-p", "-t", target.as_str(), "#{history_size}"],
        )
        .ok()
        .and_then(|out| String::from_utf8_lossy(&out.stdout).trim().parse::<usize>().ok())
        .unwrap_or(0);

        Ok(ScreenCapture {
            line_count: history + lines.len(),
            lines,
        })
    }

    fn is_alive(&self) -> bool {
        run_tmux(&self.program, &["has-session", "-t", exact(&self.name).as_str()])
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn terminate(&self) -> AppResult<()> {
        if !self.is_alive() {
            return Ok(());
        }
        run_tmux_checked(&self.program, &["kill-session", "-t", exact(&self.name).as_str()])
            .map_err(|e| anyhow!("结束 tmux 会话 {} 失败: {}", self.name, e))?;
        debug!("tmux 会话已结束: {}", self.name);
        Ok(())
    }

    fn detach(&self) {
        debug!("保留 tmux 会话: {}", self.name);
    }
}
