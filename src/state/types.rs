//! 视图模型和广播信封

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::git::{CommitInfo, RepositoryStatus};
use crate::mux::{SessionId, SessionKind, SessionState};
use crate::services::{ProcessInfo, Project};

/// 视图类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    #[default]
    Dashboard,
    Projects,
    Builds,
    Processes,
    Git,
    Sessions,
}

impl ViewKind {
    pub const ALL: [ViewKind; 6] = [
        ViewKind::Dashboard,
        ViewKind::Projects,
        ViewKind::Builds,
        ViewKind::Processes,
        ViewKind::Git,
        ViewKind::Sessions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::Projects => "projects",
            Self::Builds => "builds",
            Self::Processes => "processes",
            Self::Git => "git",
            Self::Sessions => "sessions",
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("未知的视图类型: {0}")]
pub struct UnknownViewKind(pub String);

impl FromStr for ViewKind {
    type Err = UnknownViewKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownViewKind(s.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub project_count: usize,
    pub dirty_repositories: usize,
    pub running_processes: usize,
    pub failed_processes: usize,
    pub running_sessions: usize,
    pub total_sessions: usize,
    pub active_build: Option<String>,
    pub last_build: Option<BuildRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectsView {
    pub projects: Vec<Project>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveBuild {
    pub id: u64,
    pub label: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildStatus {
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRecord {
    pub id: u64,
    pub label: String,
    pub status: BuildStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutputLine {
    pub build_id: u64,
    pub is_error: bool,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildsView {
    pub active: Option<ActiveBuild>,
    /// 最新的在前
    pub history: Vec<BuildRecord>,
    pub output: Vec<BuildOutputLine>,
}

impl BuildsView {
    /// 追加输出并只保留最近 `limit` 行
    pub fn push_output(&mut self, line: BuildOutputLine, limit: usize) {
        self.output.push(line);
        if self.output.len() > limit {
            let excess = self.output.len() - limit;
            self.output.drain(..excess);
        }
    }

    pub fn push_history(&mut self, record: BuildRecord, limit: usize) {
        self.history.insert(0, record);
        self.history.truncate(limit);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessesView {
    pub processes: Vec<ProcessInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryEntry {
    pub project_id: String,
    pub status: Option<RepositoryStatus>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GitDetail {
    Diff {
        project_id: String,
        file: Option<String>,
        text: String,
    },
    Log {
        project_id: String,
        commits: Vec<CommitInfo>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitView {
    pub repositories: Vec<RepositoryEntry>,
    pub detail: Option<GitDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: SessionId,
    pub name: String,
    pub kind: SessionKind,
    pub project_id: Option<String>,
    pub state: SessionState,
    pub foreground: bool,
    pub last_active: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsView {
    pub sessions: Vec<SessionSummary>,
}

/// 视图负载，自身声明所属的视图类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ViewPayload {
    Dashboard(DashboardView),
    Projects(ProjectsView),
    Builds(BuildsView),
    Processes(ProcessesView),
    Git(GitView),
    Sessions(SessionsView),
}

impl ViewPayload {
    pub fn empty(kind: ViewKind) -> Self {
        match kind {
            ViewKind::Dashboard => Self::Dashboard(DashboardView::default()),
            ViewKind::Projects => Self::Projects(ProjectsView::default()),
            ViewKind::Builds => Self::Builds(BuildsView::default()),
            ViewKind::Processes => Self::Processes(ProcessesView::default()),
            ViewKind::Git => Self::Git(GitView::default()),
            ViewKind::Sessions => Self::Sessions(SessionsView::default()),
        }
    }

    pub fn kind(&self) -> ViewKind {
        match self {
            Self::Dashboard(_) => ViewKind::Dashboard,
            Self::Projects(_) => ViewKind::Projects,
            Self::Builds(_) => ViewKind::Builds,
            Self::Processes(_) => ViewKind::Processes,
            Self::Git(_) => ViewKind::Git,
            Self::Sessions(_) => ViewKind::Sessions,
        }
    }

    /// 面板中可选择的条目数
    pub fn item_count(&self) -> usize {
        match self {
            Self::Dashboard(_) => 0,
            Self::Projects(v) => v.projects.len(),
            Self::Builds(v) => v.history.len(),
            Self::Processes(v) => v.processes.len(),
            Self::Git(v) => v.repositories.len(),
            Self::Sessions(v) => v.sessions.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewModel {
    pub timestamp: DateTime<Utc>,
    pub loading: bool,
    pub error: Option<String>,
    pub payload: ViewPayload,
}

impl ViewModel {
    pub fn new(payload: ViewPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            loading: false,
            error: None,
            payload,
        }
    }

    pub fn empty(kind: ViewKind) -> Self {
        Self::new(ViewPayload::empty(kind))
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn kind(&self) -> ViewKind {
        self.payload.kind()
    }

    pub fn touch(&mut self) {
        self.timestamp = Utc::now();
    }
}

/// 协调器到界面的广播信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    pub kind: ViewKind,
    pub view_model: ViewModel,
    pub partial: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_kind_parsing() {
        assert_eq!("Git".parse::<ViewKind>().unwrap(), ViewKind::Git);
        assert_eq!(" sessions ".parse::<ViewKind>().unwrap(), ViewKind::Sessions);
        assert_eq!(
            "nope".parse::<ViewKind>(),
            Err(UnknownViewKind("nope".to_string()))
        );
    }

    #[test]
    fn payload_declares_its_kind() {
        for kind in ViewKind::ALL {
            assert_eq!(ViewModel::empty(kind).kind(), kind);
        }
    }

    #[test]
    fn build_output_is_bounded() {
        let mut view = BuildsView::default();
        for i in 0..5 {
            view.push_output(
                BuildOutputLine {
                    build_id: 1,
                    is_error: false,
                    text: i.to_string(),
                },
                3,
            );
        }
        let texts: Vec<_> = view.output.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["2", "3", "4"]);
    }
}
