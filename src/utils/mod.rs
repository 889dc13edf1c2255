// 工具模块

pub mod error;

pub mod logging;

pub mod subscribers;

pub use error::{app_error, error_chain_message, AppError, AppResult};
pub use logging::init_logging;
pub use subscribers::{SubscriberCallback, SubscriberRegistry, SubscriptionId};
