//! 配置加载
//!
//! 按优先级加载：显式路径 -> 环境变量指定路径 -> 工作目录 -> 平台配置目录，
//! 之后用环境变量覆盖并验证。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::{ConfigHandle, ConsoleConfig};

pub const CONFIG_ENV_VAR: &str = "DEVCONSOLE_CONFIG";
pub const CONFIG_FILE_NAME: &str = "devconsole.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件失败 {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("解析配置文件失败 {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("序列化配置失败: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("配置无效: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConsoleConfig {
    /// 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        debug!("从文件加载配置: {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// 从环境变量覆盖配置
    ///
    /// `lookup` 便于测试时注入环境
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("DEVCONSOLE_SESSION_HOST") {
            match val.parse() {
                Ok(host) => {
                    self.sessions.host = host;
                    debug!("从环境变量设置 sessions.host = {:?}", host);
                }
                Err(e) => warn!("忽略 DEVCONSOLE_SESSION_HOST: {}", e),
            }
        }

        if let Some(val) = lookup("DEVCONSOLE_POLL_INTERVAL_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.sessions.poll_interval_ms = ms;
                debug!("从环境变量设置 sessions.poll_interval_ms = {}", ms);
            }
        }

        if let Some(val) = lookup("DEVCONSOLE_TMUX") {
            if !val.trim().is_empty() {
                self.sessions.tmux_program = val;
            }
        }

        if let Some(val) = lookup("DEVCONSOLE_STATE_DIR") {
            if !val.trim().is_empty() {
                self.storage.state_dir = Some(PathBuf::from(val));
            }
        }

        if let Some(val) = lookup("DEVCONSOLE_ASSISTANT") {
            if !val.trim().is_empty() {
                self.sessions.assistant_command = val;
            }
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> ConfigResult<()> {
        if self.sessions.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sessions.poll_interval_ms 不能为0".to_string(),
            ));
        }

        if self.sessions.default_rows == 0 || self.sessions.default_cols == 0 {
            return Err(ConfigError::Invalid(
                "sessions.default_rows/default_cols 不能为0".to_string(),
            ));
        }

        if self.sessions.scrollback_lines == 0 {
            return Err(ConfigError::Invalid(
                "sessions.scrollback_lines 不能为0".to_string(),
            ));
        }

        if self.coordinator.build_output_limit == 0 {
            return Err(ConfigError::Invalid(
                "coordinator.build_output_limit 不能为0".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for project in &self.projects {
            if project.id.trim().is_empty() {
                return Err(ConfigError::Invalid("项目 id 不能为空".to_string()));
            }
            if !ids.insert(project.id.as_str()) {
                return Err(ConfigError::Invalid(format!("项目 id 重复: {}", project.id)));
            }
        }

        let mut names = HashSet::new();
        for process in &self.processes {
            if process.name.trim().is_empty() || process.command.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "进程的 name 和 command 不能为空".to_string(),
                ));
            }
            if !names.insert(process.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "进程名重复: {}",
                    process.name
                )));
            }
        }

        debug!("配置验证通过");
        Ok(())
    }
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 加载配置并包装成句柄
    pub fn load(explicit: Option<&Path>) -> ConfigResult<ConfigHandle> {
        let mut config = match Self::find_config_file(explicit) {
            Some(path) => {
                let config = ConsoleConfig::from_file(&path)?;
                info!("从文件加载配置: {}", path.display());
                config
            }
            None => {
                info!("未找到配置文件，使用默认配置");
                ConsoleConfig::default()
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config.into_handle())
    }

    fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        let mut candidates = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            candidates.push(PathBuf::from(path));
        }
        candidates.push(PathBuf::from(CONFIG_FILE_NAME));
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("devconsole").join("config.toml"));
        }

        candidates.into_iter().find(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostKind;
    use std::collections::HashMap;

    #[test]
    fn parses_partial_file_with_defaults() {
        let config = ConsoleConfig::from_toml_str(
            r#"
            [sessions]
            host = "pty"
            poll_interval_ms = 50

            [[projects]]
            id = "alpha"
            path = "/tmp/alpha"
            build_command = "cargo build"

            [[projects.components]]
            name = "web"
            build_command = "npm run build"
            "#,
        )
        .unwrap();

        assert_eq!(config.sessions.host, HostKind::Pty);
        assert_eq!(config.sessions.poll_interval_ms, 50);
        assert_eq!(config.sessions.tmux_program, "tmux");
        assert_eq!(config.projects.len(), 1);
        assert_eq!(config.projects[0].components[0].name, "web");
        assert_eq!(config.header.default_expiry_ms, 5_000);
        config.validate().unwrap();
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = [
            ("DEVCONSOLE_SESSION_HOST", "pty"),
            ("DEVCONSOLE_POLL_INTERVAL_MS", "250"),
            ("DEVCONSOLE_STATE_DIR", "/var/tmp/console"),
        ]
        .into_iter()
        .collect();

        let mut config = ConsoleConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.sessions.host, HostKind::Pty);
        assert_eq!(config.sessions.poll_interval_ms, 250);
        assert_eq!(
            config.storage.state_dir,
            Some(PathBuf::from("/var/tmp/console"))
        );
    }

    #[test]
    fn duplicate_project_ids_are_rejected() {
        let config = ConsoleConfig::from_toml_str(
            r#"
            [[projects]]
            id = "alpha"
            path = "/a"

            [[projects]]
            id = "alpha"
            path = "/b"
            "#,
        )
        .unwrap();

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut config = ConsoleConfig::default();
        config.sessions.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.toml");
        std::fs::write(&path, "[coordinator]\nbuild_output_limit = 42\n").unwrap();

        let handle = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(handle.coordinator.build_output_limit, 42);
    }

    #[test]
    fn toml_round_trip_preserves_defaults() {
        let config = ConsoleConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(ConsoleConfig::from_toml_str(&text).unwrap(), config);
    }
}
