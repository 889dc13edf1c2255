/*!
 * 分离与重连
 *
 * 界面进程退出前导出导航快照，重新启动后导入。视图模型内容从不持久化，
 * 重连后总是实时重新拉取。
 */

pub mod catalog;
pub mod navigation;
pub mod protocol;
pub mod snapshot;
pub mod store;

pub use catalog::{SessionCatalog, CATALOG_FILE_NAME};
pub use navigation::{FileBrowser, FocusArea, ModalState, NavigationState, PanelPosition};
pub use protocol::{ImportSummary, ReattachProtocol, SessionDirectory};
pub use snapshot::{ReattachSnapshot, SNAPSHOT_VERSION};
pub use store::{SnapshotStore, SnapshotStoreOptions, SNAPSHOT_FILE_NAME};
