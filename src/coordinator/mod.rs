/*!
 * 事件协调器
 *
 * 把界面意图转换为可取消的异步操作。耗时操作在独立任务中执行，
 * 结果只通过修改 SharedState 并广播的方式返回，不阻塞界面事件循环。
 */

mod builds;
mod dispatcher;
pub mod error;
pub mod event;
mod handlers;
mod views;

use std::sync::Arc;

use crate::config::ConfigHandle;
use crate::mux::SessionMultiplexer;
use crate::services::Services;
use crate::state::SharedState;

pub use builds::BuildOutcome;
pub use dispatcher::EventCoordinator;
pub use error::IntentError;
pub use event::{Event, EventKind};

/// 后台任务共享的依赖
#[derive(Clone)]
pub(crate) struct TaskContext {
    pub state: Arc<SharedState>,
    pub services: Services,
    pub config: ConfigHandle,
    pub mux: Arc<SessionMultiplexer>,
}
