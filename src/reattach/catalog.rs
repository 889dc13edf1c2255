//! 会话目录
//!
//! 以 JSON 保存 `SessionRecord` 列表，控制台重启后据此重建会话表。

use anyhow::Context;
use std::path::PathBuf;
use tokio::fs as async_fs;
use tracing::{debug, warn};

use super::store::atomic_write;
use crate::config::StorageConfig;
use crate::mux::SessionRecord;
use crate::utils::AppResult;

pub const CATALOG_FILE_NAME: &str = "sessions.json";

#[derive(Debug, Clone)]
pub struct SessionCatalog {
    path: PathBuf,
}

impl SessionCatalog {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: state_dir.into().join(CATALOG_FILE_NAME),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.resolved_state_dir())
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub async fn save(&self, records: &[SessionRecord]) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            async_fs::create_dir_all(parent)
                .await
                .with_context(|| format!("创建状态目录失败: {}", parent.display()))?;
        }
        let json = serde_json::to_vec_pretty(records).context("会话目录序列化失败")?;
        atomic_write(&self.path, &json).await?;
        debug!("已保存 {} 条会话记录", records.len());
        Ok(())
    }

    /// 文件不存在时返回空列表，内容损坏时记录警告并返回空列表
    pub async fn load(&self) -> AppResult<Vec<SessionRecord>> {
        if !async_fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let bytes = async_fs::read(&self.path)
            .await
            .with_context(|| format!("读取会话目录失败: {}", self.path.display()))?;
        match serde_json::from_slice(&bytes) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!("会话目录损坏，已忽略: {}: {}", self.path.display(), e);
                Ok(Vec::new())
            }
        }
    }
}
