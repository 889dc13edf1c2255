/*!
 * 共享状态模块
 *
 * 进程内唯一的视图模型缓存，附带头部事件队列和通知队列。
 */

pub mod header;
pub mod notification;
pub mod store;
pub mod types;

pub use header::{HeaderEvent, HeaderQueue, HEADER_QUEUE_LIMIT};
pub use notification::{Notification, Severity};
pub use store::SharedState;
pub use types::*;
