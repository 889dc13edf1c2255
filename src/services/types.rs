//! 外部协作服务共用的数据类型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::config::{ComponentConfig, ProjectConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub build_command: Option<String>,
    #[serde(default)]
    pub components: Vec<Component>,
}

impl Project {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            path: path.into(),
            build_command: None,
            components: Vec::new(),
        }
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }
}

impl From<&ProjectConfig> for Project {
    fn from(config: &ProjectConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            path: config.path.clone(),
            build_command: config.build_command.clone(),
            components: config.components.iter().map(Component::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub name: String,
    pub build_command: String,
    pub work_dir: Option<PathBuf>,
}

impl From<&ComponentConfig> for Component {
    fn from(config: &ComponentConfig) -> Self {
        Self {
            name: config.name.clone(),
            build_command: config.build_command.clone(),
            work_dir: config.work_dir.clone(),
        }
    }
}

/// 构建目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "camelCase")]
pub enum BuildTarget {
    All,
    Project {
        project_id: String,
    },
    Component {
        project_id: String,
        component: String,
    },
}

impl BuildTarget {
    pub fn from_parts(project_id: Option<&str>, component: Option<&str>) -> Self {
        match (project_id, component) {
            (Some(project_id), Some(component)) => Self::Component {
                project_id: project_id.to_string(),
                component: component.to_string(),
            },
            (Some(project_id), None) => Self::Project {
                project_id: project_id.to_string(),
            },
            (None, _) => Self::All,
        }
    }

    /// 通知和头部事件中显示的名称
    pub fn label(&self) -> String {
        match self {
            Self::All => "all projects".to_string(),
            Self::Project { project_id } => project_id.clone(),
            Self::Component {
                project_id,
                component,
            } => format!("{}/{}", project_id, component),
        }
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// 构建过程中发出的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BuildEvent {
    Started { label: String },
    Output { line: String },
    Error { line: String },
    Finished { label: String, success: bool },
}

/// 进程控制动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessAction {
    Start,
    Stop,
    Restart,
    Kill,
    Pause,
    Resume,
}

impl ProcessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Kill => "kill",
            Self::Pause => "pause",
            Self::Resume => "resume",
        }
    }

    /// 成功后的过去式描述
    pub fn past_tense(&self) -> &'static str {
        match self {
            Self::Start => "started",
            Self::Stop => "stopped",
            Self::Restart => "restarted",
            Self::Kill => "killed",
            Self::Pause => "paused",
            Self::Resume => "resumed",
        }
    }
}

impl fmt::Display for ProcessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessStatus {
    Stopped,
    Running,
    Paused,
    Exited { code: Option<i32> },
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// 非零退出码视为失败
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Exited { code } if *code != Some(0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub name: String,
    pub project_id: Option<String>,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub restarts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_labels() {
        assert_eq!(BuildTarget::from_parts(None, None).label(), "all projects");
        assert_eq!(BuildTarget::from_parts(Some("alpha"), None).label(), "alpha");
        assert_eq!(
            BuildTarget::from_parts(Some("alpha"), Some("web")).label(),
            "alpha/web"
        );
        // 没有项目时忽略组件
        assert_eq!(BuildTarget::from_parts(None, Some("web")), BuildTarget::All);
    }

    #[test]
    fn exited_status_failure() {
        assert!(ProcessStatus::Exited { code: Some(1) }.is_failed());
        assert!(ProcessStatus::Exited { code: None }.is_failed());
        assert!(!ProcessStatus::Exited { code: Some(0) }.is_failed());
        assert!(ProcessStatus::Paused.is_running());
    }
}
