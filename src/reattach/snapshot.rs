//! 重连快照
//!
//! 扁平的导航记录，不包含任何视图模型内容。所有字段都带默认值，
//! 旧版本写出的快照缺少新字段时按默认值处理。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::navigation::{FocusArea, PanelPosition};
use crate::mux::SessionId;
use crate::state::ViewKind;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReattachSnapshot {
    pub version: u32,
    pub current_view: Option<ViewKind>,
    pub focus_area: Option<FocusArea>,
    /// 各面板的选中行和滚动偏移
    pub positions: BTreeMap<ViewKind, PanelPosition>,
    pub filters: BTreeMap<ViewKind, String>,
    pub search_text: String,
    pub browse_dir: Option<PathBuf>,
    pub browse_position: PanelPosition,
    pub active_session_ids: Vec<SessionId>,
    pub foreground_session: Option<SessionId>,
    pub captured_at: Option<DateTime<Utc>>,
}

impl Default for ReattachSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            current_view: None,
            focus_area: None,
            positions: BTreeMap::new(),
            filters: BTreeMap::new(),
            search_text: String::new(),
            browse_dir: None,
            browse_position: PanelPosition::default(),
            active_session_ids: Vec::new(),
            foreground_session: None,
            captured_at: None,
        }
    }
}

impl ReattachSnapshot {
    /// 没有任何导航信息
    pub fn is_empty(&self) -> bool {
        self.current_view.is_none()
            && self.focus_area.is_none()
            && self.positions.is_empty()
            && self.filters.is_empty()
            && self.search_text.is_empty()
            && self.browse_dir.is_none()
            && self.active_session_ids.is_empty()
            && self.foreground_session.is_none()
    }
}
