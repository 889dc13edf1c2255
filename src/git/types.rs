use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FileChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
    Untracked,
    Conflicted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: String,
    pub status: FileChangeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
}

/// 单个仓库的工作区状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryStatus {
    pub is_repository: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_branch: Option<String>,
    pub staged_files: Vec<FileChange>,
    pub modified_files: Vec<FileChange>,
    pub untracked_files: Vec<FileChange>,
    pub conflicted_files: Vec<FileChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ahead: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behind: Option<u32>,
    pub is_empty: bool,
    pub is_detached: bool,
}

impl RepositoryStatus {
    pub fn not_a_repository() -> Self {
        Self::default()
    }

    /// 工作区是否有未提交的变更
    pub fn is_dirty(&self) -> bool {
        !(self.staged_files.is_empty()
            && self.modified_files.is_empty()
            && self.untracked_files.is_empty()
            && self.conflicted_files.is_empty())
    }

    pub fn change_count(&self) -> usize {
        self.staged_files.len()
            + self.modified_files.len()
            + self.untracked_files.len()
            + self.conflicted_files.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub hash: String,
    pub short_hash: String,
    pub author_name: String,
    pub date: String,
    pub message: String,
    #[serde(default)]
    pub refs: Vec<String>,
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("不是 git 仓库: {0}")]
    NotARepository(String),

    #[error("未找到 git 可执行文件")]
    NotInstalled,

    #[error("git {args} 执行失败: {stderr}")]
    CommandFailed { args: String, stderr: String },

    #[error("无法解析 git 输出: {0}")]
    Parse(String),

    #[error("git I/O 错误: {0}")]
    Io(#[from] std::io::Error),
}
