//! 快照导出与导入

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::navigation::{FocusArea, NavigationState};
use super::snapshot::{ReattachSnapshot, SNAPSHOT_VERSION};
use crate::mux::{SessionId, SessionMultiplexer};
use crate::state::SharedState;

/// 判断会话是否仍然存在
pub trait SessionDirectory: Send + Sync {
    fn knows(&self, id: &SessionId) -> bool;
}

impl SessionDirectory for SessionMultiplexer {
    fn knows(&self, id: &SessionId) -> bool {
        self.contains(id)
    }
}

/// 导入时重新推导的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub dropped_sessions: Vec<SessionId>,
    pub browse_entries: usize,
}

pub struct ReattachProtocol {
    state: Arc<SharedState>,
    sessions: Arc<dyn SessionDirectory>,
}

impl ReattachProtocol {
    pub fn new(state: Arc<SharedState>, sessions: Arc<dyn SessionDirectory>) -> Self {
        Self { state, sessions }
    }

    /// 导出当前导航状态，模态状态不会被导出
    pub fn export(&self, nav: &NavigationState) -> ReattachSnapshot {
        let snapshot = ReattachSnapshot {
            version: SNAPSHOT_VERSION,
            current_view: Some(self.state.current_view()),
            focus_area: Some(nav.focus),
            positions: nav
                .positions
                .iter()
                .filter(|(_, position)| !position.is_origin())
                .map(|(kind, position)| (*kind, *position))
                .collect(),
            filters: self.state.filters(),
            search_text: nav.search_text.clone(),
            browse_dir: nav.file_browser.dir.clone(),
            browse_position: nav.file_browser.position,
            active_session_ids: nav.active_sessions.clone(),
            foreground_session: nav.foreground_session.clone(),
            captured_at: Some(Utc::now()),
        };
        debug!(
            "导出快照: view={:?}, {} 个会话",
            snapshot.current_view,
            snapshot.active_session_ids.len()
        );
        snapshot
    }

    /// 在新建的界面实例上恢复导航状态
    ///
    /// 模态状态总是关闭；缺省字段保持默认值；面板位置原样恢复，
    /// 视图内容稍后才会重新拉取，由界面在拿到实时条目数后再收紧。
    /// 文件浏览器的目录列表在这里重新读取，选中位置按新列表收紧。
    /// 全部完成后调用 `on_complete`。
    pub fn import<F>(
        &self,
        nav: &mut NavigationState,
        snapshot: ReattachSnapshot,
        on_complete: F,
    ) -> ImportSummary
    where
        F: FnOnce(&NavigationState),
    {
        if snapshot.version > SNAPSHOT_VERSION {
            warn!(
                "快照版本 {} 高于当前版本 {}，未知字段将被忽略",
                snapshot.version, SNAPSHOT_VERSION
            );
        }
        let mut summary = ImportSummary::default();

        nav.modal.reset();

        if let Some(view) = snapshot.current_view {
            self.state.set_current_view(view);
        }
        if let Some(focus) = snapshot.focus_area {
            nav.focus = focus;
        }
        for (kind, position) in snapshot.positions {
            nav.set_position(kind, position);
        }
        for (kind, filter) in snapshot.filters {
            if !filter.is_empty() {
                self.state.set_filter(kind, filter);
            }
        }
        if !snapshot.search_text.is_empty() {
            nav.search_text = snapshot.search_text;
        }

        if let Some(dir) = snapshot.browse_dir {
            nav.file_browser.dir = Some(dir);
            nav.file_browser.position = snapshot.browse_position;
            match nav.file_browser.reload() {
                Ok(count) => summary.browse_entries = count,
                Err(e) => {
                    warn!("恢复文件浏览目录失败: {}", e);
                    nav.file_browser = Default::default();
                }
            }
        }

        if !snapshot.active_session_ids.is_empty() {
            let (known, dropped): (Vec<_>, Vec<_>) = snapshot
                .active_session_ids
                .into_iter()
                .partition(|id| self.sessions.knows(id));
            nav.active_sessions = known;
            summary.dropped_sessions = dropped;
        }
        if let Some(id) = snapshot.foreground_session {
            if self.sessions.knows(&id) {
                nav.foreground_session = Some(id);
            } else {
                summary.dropped_sessions.push(id);
            }
        }
        if nav.focus == FocusArea::Terminal && nav.foreground_session.is_none() {
            nav.focus = FocusArea::Content;
        }

        if !summary.dropped_sessions.is_empty() {
            info!("{} 个会话已不存在，已从快照中移除", summary.dropped_sessions.len());
        }

        self.state.publish(self.state.current_view());
        on_complete(nav);
        summary
    }
}

impl std::fmt::Debug for ReattachProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReattachProtocol").finish_non_exhaustive()
    }
}
