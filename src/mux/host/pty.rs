//! 进程内 PTY 宿主
//!
//! 程序随控制台进程一起结束。读线程持续把输出送入终端屏幕，
//! 后台会话切回前台时可以立即显示最新内容。

use anyhow::Context;
use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use super::screen::TerminalScreen;
use super::{resolve_executable, HostedProcess, SessionHost};
use crate::app_bail;
use crate::mux::types::{LaunchSpec, ScreenCapture, SessionId, TerminalSize};
use crate::utils::AppResult;

const READ_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Clone)]
pub struct PtyHost {
    scrollback: usize,
}

impl PtyHost {
    pub fn new(scrollback: usize) -> Self {
        Self { scrollback }
    }
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

impl SessionHost for PtyHost {
    fn name(&self) -> &'static str {
        "pty"
    }

    fn launch(&self, spec: &LaunchSpec, size: TerminalSize) -> AppResult<Arc<dyn HostedProcess>> {
        let Some(executable) = resolve_executable(&spec.command.executable) else {
            app_bail!("命令不存在: {}", spec.command.executable);
        };

        let pair = native_pty_system()
            .openpty(pty_size(size))
            .with_context(|| format!("创建PTY失败: session={}", spec.session_id))?;

        let mut cmd = CommandBuilder::new(executable);
        cmd.args(&spec.command.args);
        cmd.cwd(&spec.work_dir);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        for (key, value) in &spec.command.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("启动进程失败: {}", spec.command.executable))?;
        // 关闭从端，子进程退出后读端才能读到 EOF
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .context("获取PTY读取器失败")?;
        let writer = pair.master.take_writer().context("获取PTY写入器失败")?;

        let process = Arc::new(PtyProcess {
            session_id: spec.session_id.clone(),
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            child: Mutex::new(child),
            screen: Arc::new(Mutex::new(TerminalScreen::new(size, self.scrollback))),
            dead: Arc::new(AtomicBool::new(false)),
        });
        process.spawn_reader(reader);

        info!("PTY 会话已启动: {}", spec.session_id);
        Ok(process as Arc<dyn HostedProcess>)
    }

    fn exists(&self, _session_id: &SessionId) -> bool {
        false
    }
}

struct PtyProcess {
    session_id: SessionId,
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    screen: Arc<Mutex<TerminalScreen>>,
    dead: Arc<AtomicBool>,
}

impl PtyProcess {
    fn spawn_reader(&self, mut reader: Box<dyn Read + Send>) {
        let session_id = self.session_id.clone();
        let screen = Arc::clone(&self.screen);
        let dead = Arc::clone(&self.dead);

        thread::spawn(move || {
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];

            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(len) => screen.lock().process(&buffer[..len]),
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        debug!("会话 {} 读线程结束: {}", session_id, err);
                        break;
                    }
                }
            }

            dead.store(true, Ordering::Release);
            debug!("会话 {} 输出结束", session_id);
        });
    }
}

impl HostedProcess for PtyProcess {
    fn write(&self, data: &[u8]) -> AppResult<()> {
        if !self.is_alive() {
            app_bail!("会话 {} 已退出", self.session_id);
        }
        let mut writer = self.writer.lock();
        writer
            .write_all(data)
            .with_context(|| format!("会话 {} PTY写入失败", self.session_id))?;
        writer
            .flush()
            .with_context(|| format!("会话 {} PTY刷新失败", self.session_id))?;
        Ok(())
    }

    fn resize(&self, size: TerminalSize) -> AppResult<()> {
        self.master
            .lock()
            .resize(pty_size(size))
            .with_context(|| format!("会话 {} PTY调整大小失败", self.session_id))?;
        self.screen.lock().resize(size);
        Ok(())
    }

    fn capture(&self) -> AppResult<ScreenCapture> {
        Ok(self.screen.lock().capture())
    }

    fn is_alive(&self) -> bool {
        if self.dead.load(Ordering::Acquire) {
            return false;
        }
        matches!(self.child.lock().try_wait(), Ok(None))
    }

    fn terminate(&self) -> AppResult<()> {
        let mut child = self.child.lock();
        if let Ok(None) = child.try_wait() {
            if let Err(e) = child.kill() {
                warn!("结束会话 {} 失败: {}", self.session_id, e);
            }
            let _ = child.wait();
        }
        self.dead.store(true, Ordering::Release);
        Ok(())
    }

    fn detach(&self) {
        // 进程内会话无法脱离控制台存活
        if let Err(e) = self.terminate() {
            warn!("分离时结束会话 {} 失败: {}", self.session_id, e);
        }
    }
}
