use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::command_from_line;
use crate::app_bail;
use crate::config::{ConsoleConfig, ProcessConfig};
use crate::services::{ProcessAction, ProcessInfo, ProcessStatus, ProcessSupervisor};
use crate::utils::AppResult;

const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

type SignalSender = fn(u32, Signal) -> AppResult<()>;

struct ManagedProcess {
    config: ProcessConfig,
    child: Option<Child>,
    status: ProcessStatus,
    started_at: Option<DateTime<Utc>>,
    restarts: u32,
    send_signal: SignalSender,
}

impl ManagedProcess {
    fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            child: None,
            status: ProcessStatus::Stopped,
            started_at: None,
            restarts: 0,
            send_signal,
        }
    }

    fn signal(&self, signal: Signal) -> AppResult<()> {
        let pid = self
            .pid()
            .ok_or_else(|| anyhow!("进程 {} 已退出", self.config.name))?;
        (self.send_signal)(pid, signal)
    }

    /// 回收已退出的子进程
    fn reap(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(exit)) => {
                debug!("进程 {} 已退出: {:?}", self.config.name, exit.code());
                self.status = ProcessStatus::Exited { code: exit.code() };
                self.child = None;
            }
            Ok(None) => {}
            Err(e) => warn!("检查进程 {} 状态失败: {}", self.config.name, e),
        }
    }

    fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    fn info(&self) -> ProcessInfo {
        ProcessInfo {
            name: self.config.name.clone(),
            project_id: self.config.project_id.clone(),
            status: self.status,
            pid: self.pid(),
            started_at: self.started_at,
            restarts: self.restarts,
        }
    }

    fn start(&mut self) -> AppResult<()> {
        self.reap();
        if self.child.is_some() {
            debug!("进程 {} 已在运行", self.config.name);
            return Ok(());
        }

        let mut cmd = command_from_line(&self.config.command)?;
        cmd.envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.work_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("启动进程失败: {}", self.config.name))?;
        info!("进程 {} 已启动, pid={:?}", self.config.name, child.id());
        self.child = Some(child);
        self.status = ProcessStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    async fn stop(&mut self) -> AppResult<()> {
        self.reap();
        if self.child.is_none() {
            self.status = ProcessStatus::Stopped;
            return Ok(());
        }

        // 暂停的进程收不到 SIGTERM，先恢复
        if self.status == ProcessStatus::Paused {
            self.signal(Signal::Continue)?;
            self.status = ProcessStatus::Running;
        }
        // 信号发送失败时保留子进程句柄，状态仍与实际一致
        self.signal(Signal::Terminate)?;

        if let Some(mut child) = self.child.take() {
            let waited = match tokio::time::timeout(STOP_GRACE_PERIOD, child.wait()).await {
                Ok(result) => result.map(|_| ()).context("等待进程退出失败"),
                Err(_) => {
                    warn!("进程 {} 未在期限内退出，强制结束", self.config.name);
                    child.kill().await.context("强制结束进程失败")
                }
            };
            // 句柄已释放，kill_on_drop 会结束残留进程
            self.status = ProcessStatus::Stopped;
            waited?;
        }
        self.status = ProcessStatus::Stopped;
        Ok(())
    }

    async fn kill(&mut self) -> AppResult<()> {
        self.reap();
        if let Some(mut child) = self.child.take() {
            child.kill().await.context("强制结束进程失败")?;
        }
        self.status = ProcessStatus::Stopped;
        Ok(())
    }

    fn pause(&mut self) -> AppResult<()> {
        self.reap();
        if self.child.is_none() {
            app_bail!("进程 {} 未运行", self.config.name);
        }
        self.signal(Signal::Stop)?;
        self.status = ProcessStatus::Paused;
        Ok(())
    }

    fn resume(&mut self) -> AppResult<()> {
        self.reap();
        if self.child.is_none() {
            app_bail!("进程 {} 未运行", self.config.name);
        }
        self.signal(Signal::Continue)?;
        self.status = ProcessStatus::Running;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Stop,
    Continue,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> AppResult<()> {
    use nix::sys::signal::{kill, Signal as NixSignal};
    use nix::unistd::Pid;

    let sig = match signal {
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Stop => NixSignal::SIGSTOP,
        Signal::Continue => NixSignal::SIGCONT,
    };
    kill(Pid::from_raw(pid as i32), sig).with_context(|| format!("发送 {:?} 失败", sig))?;
    Ok(())
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, signal: Signal) -> AppResult<()> {
    Err(anyhow!("当前平台不支持信号 {:?}", signal))
}

/// 按配置启动和控制长驻进程的监管器
pub struct CommandProcessSupervisor {
    processes: Mutex<BTreeMap<String, ManagedProcess>>,
}

impl CommandProcessSupervisor {
    pub fn new(configs: Vec<ProcessConfig>) -> Self {
        let processes = configs
            .into_iter()
            .map(|c| (c.name.clone(), ManagedProcess::new(c)))
            .collect();
        Self {
            processes: Mutex::new(processes),
        }
    }

    pub fn from_config(config: &ConsoleConfig) -> Self {
        Self::new(config.processes.clone())
    }
}

#[async_trait]
impl ProcessSupervisor for CommandProcessSupervisor {
    async fn control(&self, name: &str, action: ProcessAction) -> AppResult<()> {
        let mut processes = self.processes.lock().await;
        let process = processes
            .get_mut(name)
            .ok_or_else(|| anyhow!("未知进程: {}", name))?;

        debug!("进程控制: {} {}", action, name);
        match action {
            ProcessAction::Start => process.start(),
            ProcessAction::Stop => process.stop().await,
            ProcessAction::Restart => {
                process.stop().await?;
                process.start()?;
                process.restarts += 1;
                Ok(())
            }
            ProcessAction::Kill => process.kill().await,
            ProcessAction::Pause => process.pause(),
            ProcessAction::Resume => process.resume(),
        }
    }

    async fn list(&self) -> AppResult<Vec<ProcessInfo>> {
        let mut processes = self.processes.lock().await;
        Ok(processes
            .values_mut()
            .map(|p| {
                p.reap();
                p.info()
            })
            .collect())
    }
}
