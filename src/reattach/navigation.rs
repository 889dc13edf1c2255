//! 界面导航状态
//!
//! 界面进程持有的可重连部分：焦点、面板位置、搜索文本、文件浏览器和会话选择。
//! 模态状态只在进程内有效，导入快照时总是被重置。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::mux::SessionId;
use crate::state::ViewKind;
use crate::utils::AppResult;
use anyhow::Context;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusArea {
    #[default]
    Sidebar,
    Content,
    Terminal,
}

/// 列表面板的选中行和滚动偏移
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelPosition {
    pub selected: usize,
    pub scroll: usize,
}

impl PanelPosition {
    pub fn new(selected: usize, scroll: usize) -> Self {
        Self { selected, scroll }
    }

    pub fn is_origin(&self) -> bool {
        self.selected == 0 && self.scroll == 0
    }

    /// 按实际条目数收紧位置，滚动偏移不超过选中行
    pub fn clamp(&mut self, count: usize) {
        if count == 0 {
            *self = Self::default();
            return;
        }
        self.selected = self.selected.min(count - 1);
        self.scroll = self.scroll.min(self.selected);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModalState {
    pub open_dialog: Option<String>,
    pub search_editing: bool,
    pub filter_editing: bool,
    pub terminal_input: bool,
}

impl ModalState {
    pub fn is_closed(&self) -> bool {
        *self == Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 文件浏览器，条目列表总是从磁盘重新读取
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileBrowser {
    pub dir: Option<PathBuf>,
    pub entries: Vec<PathBuf>,
    pub position: PanelPosition,
}

impl FileBrowser {
    pub fn open(&mut self, dir: impl Into<PathBuf>) -> AppResult<usize> {
        self.dir = Some(dir.into());
        self.position = PanelPosition::default();
        self.reload()
    }

    /// 重新读取目录，目录在前，各自按名称排序
    pub fn reload(&mut self) -> AppResult<usize> {
        let Some(dir) = self.dir.clone() else {
            self.entries.clear();
            self.position = PanelPosition::default();
            return Ok(0);
        };

        let entries = read_listing(&dir)?;
        debug!("目录 {} 共 {} 个条目", dir.display(), entries.len());
        self.entries = entries;
        self.position.clamp(self.entries.len());
        Ok(self.entries.len())
    }

    pub fn selected_entry(&self) -> Option<&Path> {
        self.entries.get(self.position.selected).map(PathBuf::as_path)
    }
}

fn read_listing(dir: &Path) -> AppResult<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("读取目录失败: {}", dir.display()))?
    {
        let entry = entry.with_context(|| format!("遍历目录失败: {}", dir.display()))?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            dirs.push(entry.path());
        } else {
            files.push(entry.path());
        }
    }
    dirs.sort();
    files.sort();
    dirs.extend(files);
    Ok(dirs)
}

/// 界面实例的导航状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationState {
    pub focus: FocusArea,
    pub positions: BTreeMap<ViewKind, PanelPosition>,
    pub search_text: String,
    pub file_browser: FileBrowser,
    pub active_sessions: Vec<SessionId>,
    pub foreground_session: Option<SessionId>,
    pub modal: ModalState,
}

impl NavigationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, kind: ViewKind) -> PanelPosition {
        self.positions.get(&kind).copied().unwrap_or_default()
    }

    pub fn set_position(&mut self, kind: ViewKind, position: PanelPosition) {
        if position.is_origin() {
            self.positions.remove(&kind);
        } else {
            self.positions.insert(kind, position);
        }
    }
}
