//! devconsole 核心库
//!
//! 本地开发运维控制台的协调与并发层：
//! - 事件协调器，把界面意图转换为可取消的异步操作
//! - 共享状态，集中缓存视图模型并广播更新
//! - 会话多路复用器，管理多个长期运行的交互式会话
//! - 分离与重连，界面退出后可以原样恢复

pub mod config;
pub mod coordinator;
pub mod driver;
pub mod git;
pub mod mux;
pub mod reattach;
pub mod services;
pub mod state;
pub mod utils;

use clap::Parser;
use tracing::{error, info};

use driver::DriverOptions;
use utils::{error_chain_message, init_logging};

pub fn run() {
    // 初始化日志系统
    if let Err(e) = init_logging() {
        eprintln!("日志系统初始化失败: {}", e);
        std::process::exit(1);
    }

    // 参数错误或 --help 时由 clap 打印并退出
    let options = DriverOptions::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("devconsole-worker")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("创建 tokio 运行时失败: {}", e);
            std::process::exit(1);
        }
    };

    info!("devconsole 启动");
    if let Err(e) = runtime.block_on(driver::run(options)) {
        error!("控制台异常退出: {}", error_chain_message(&e));
        std::process::exit(1);
    }
}
