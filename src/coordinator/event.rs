//! 界面意图
//!
//! 事件类型是封闭枚举，未知的标签在解析时就会失败。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::error::IntentError;

macro_rules! event_kinds {
    ($($variant:ident => $tag:literal),+ $(,)?) => {
        /// 事件类型
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum EventKind {
            $(
                #[serde(rename = $tag)]
                $variant,
            )+
        }

        impl EventKind {
            pub const ALL: &'static [EventKind] = &[$(EventKind::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $tag,)+
                }
            }
        }

        impl FromStr for EventKind {
            type Err = IntentError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($tag => Ok(Self::$variant),)+
                    other => Err(IntentError::UnknownEventKind(other.to_string())),
                }
            }
        }
    };
}

event_kinds! {
    BuildStart => "build.start",
    BuildCancel => "build.cancel",
    ProcessStart => "process.start",
    ProcessStop => "process.stop",
    ProcessRestart => "process.restart",
    ProcessKill => "process.kill",
    ProcessPause => "process.pause",
    ProcessResume => "process.resume",
    FilterSet => "filter.set",
    FilterClear => "filter.clear",
    ViewSwitch => "view.switch",
    Refresh => "refresh",
    ProjectAdd => "project.add",
    ProjectRemove => "project.remove",
    GitStatus => "git.status",
    GitDiff => "git.diff",
    GitLog => "git.log",
    SessionCreate => "session.create",
    SessionStart => "session.start",
    SessionStop => "session.stop",
    SessionDelete => "session.delete",
    SessionRename => "session.rename",
    SessionFocus => "session.focus",
    SessionBlur => "session.blur",
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 界面发出的意图信封
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, String>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            target: None,
            project_id: None,
            component: None,
            value: None,
            data: HashMap::new(),
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// 解析一行文本意图：`<tag> [key=value ...]`
    ///
    /// `target`、`project`、`component`、`value` 映射到对应字段，其余键进入 `data`。
    pub fn parse_line(line: &str) -> Result<Self, IntentError> {
        let words = shell_words::split(line).map_err(|e| IntentError::InvalidField {
            field: "line",
            value: e.to_string(),
        })?;
        let mut words = words.into_iter();
        let tag = words
            .next()
            .ok_or_else(|| IntentError::UnknownEventKind(String::new()))?;
        let mut event = Event::new(tag.parse()?);

        for word in words {
            let Some((key, value)) = word.split_once('=') else {
                return Err(IntentError::InvalidField {
                    field: "argument",
                    value: word,
                });
            };
            let value = value.to_string();
            match key {
                "target" => event.target = Some(value),
                "project" | "project_id" => event.project_id = Some(value),
                "component" => event.component = Some(value),
                "value" => event.value = Some(value),
                other => {
                    event.data.insert(other.to_string(), value);
                }
            }
        }
        Ok(event)
    }

    /// 必需的 target 字段
    pub(crate) fn require_target(&self) -> Result<&str, IntentError> {
        non_empty(self.target.as_deref()).ok_or(IntentError::MissingField {
            kind: self.kind.as_str(),
            field: "target",
        })
    }

    pub(crate) fn require_project(&self) -> Result<&str, IntentError> {
        non_empty(self.project_id.as_deref()).ok_or(IntentError::MissingField {
            kind: self.kind.as_str(),
            field: "project_id",
        })
    }

    pub(crate) fn require_value(&self) -> Result<&str, IntentError> {
        non_empty(self.value.as_deref()).ok_or(IntentError::MissingField {
            kind: self.kind.as_str(),
            field: "value",
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
