/*!
 * 配置系统模块
 *
 * 配置只在启动时加载一次，随后以 `ConfigHandle` 显式注入各组件，
 * 不提供全局访问入口。
 */

pub mod manager;
pub mod types;

pub use manager::{ConfigError, ConfigLoader, ConfigResult, CONFIG_ENV_VAR, CONFIG_FILE_NAME};
pub use types::*;
