//! 会话多路复用器
//!
//! 管理助手、数据库客户端和 shell 等长时间运行的交互会话：会话表、终端、
//! 宿主（tmux / 进程内 PTY）、按键转换和前台输出轮询。

pub mod error;
pub mod host;
pub mod keys;
pub mod multiplexer;
mod poller;
pub mod types;

pub use error::{MuxError, MuxResult};
pub use host::{host_from_config, HostedProcess, PtyHost, SessionHost, TmuxHost};
pub use keys::{encode_key, KeyChord, ReservedKeys};
pub use multiplexer::SessionMultiplexer;
pub use types::*;
