//! 快照持久化
//!
//! MessagePack（结构体按 map 编码）+ 可选 gzip 压缩 + SHA-256 校验，
//! 原子写入并保留轮转备份，主文件损坏时从最新的备份恢复。

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use rmp_serde::{Deserializer, Serializer};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tracing::{debug, error, warn};

use super::snapshot::ReattachSnapshot;
use crate::config::StorageConfig;
use crate::utils::AppResult;

pub const SNAPSHOT_FILE_NAME: &str = "reattach.msgpack";
const BACKUP_DIR_NAME: &str = "backups";
const MAX_FILE_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SnapshotStoreOptions {
    pub compression: bool,
    pub backup_count: usize,
}

impl Default for SnapshotStoreOptions {
    fn default() -> Self {
        Self {
            compression: true,
            backup_count: 3,
        }
    }
}

impl From<&StorageConfig> for SnapshotStoreOptions {
    fn from(config: &StorageConfig) -> Self {
        Self {
            compression: config.compression,
            backup_count: config.backup_count,
        }
    }
}

/// 磁盘上的包装结构
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    timestamp: DateTime<Utc>,
    checksum: String,
    compressed: bool,
    data: Vec<u8>,
}

fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub struct SnapshotStore {
    state_dir: PathBuf,
    options: SnapshotStoreOptions,
}

impl SnapshotStore {
    pub fn new(state_dir: impl Into<PathBuf>, options: SnapshotStoreOptions) -> Self {
        Self {
            state_dir: state_dir.into(),
            options,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.resolved_state_dir(), config.into())
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join(SNAPSHOT_FILE_NAME)
    }

    fn backup_dir(&self) -> PathBuf {
        self.state_dir.join(BACKUP_DIR_NAME)
    }

    pub fn encode(&self, snapshot: &ReattachSnapshot) -> AppResult<Vec<u8>> {
        let mut buf = Vec::new();
        snapshot
            .serialize(&mut Serializer::new(&mut buf).with_struct_map())
            .map_err(|e| anyhow!("快照序列化失败: {}", e))?;

        let (data, compressed) = if self.options.compression {
            let raw_len = buf.len();
            let data = compress(&buf)?;
            debug!("快照压缩: {} -> {} bytes", raw_len, data.len());
            (data, true)
        } else {
            (buf, false)
        };

        let envelope = Envelope {
            version: snapshot.version,
            timestamp: Utc::now(),
            checksum: checksum(&data),
            compressed,
            data,
        };

        let mut result = Vec::new();
        envelope
            .serialize(&mut Serializer::new(&mut result).with_struct_map())
            .map_err(|e| anyhow!("包装器序列化失败: {}", e))?;

        if result.len() > MAX_FILE_SIZE {
            return Err(anyhow!(
                "快照过大: {} bytes，超过限制 {} bytes",
                result.len(),
                MAX_FILE_SIZE
            ));
        }
        Ok(result)
    }

    pub fn decode(&self, bytes: &[u8]) -> AppResult<ReattachSnapshot> {
        let envelope: Envelope = Deserialize::deserialize(&mut Deserializer::new(bytes))
            .map_err(|e| anyhow!("包装器反序列化失败: {}", e))?;

        if checksum(&envelope.data) != envelope.checksum {
            return Err(anyhow!("快照校验和不匹配"));
        }

        let data = if envelope.compressed {
            decompress(&envelope.data)?
        } else {
            envelope.data
        };

        let snapshot: ReattachSnapshot = Deserialize::deserialize(&mut Deserializer::new(&data[..]))
            .map_err(|e| anyhow!("快照反序列化失败: {}", e))?;
        debug!(
            "快照已解码: version={}, 写入时间 {}",
            envelope.version, envelope.timestamp
        );
        Ok(snapshot)
    }

    pub async fn save(&self, snapshot: &ReattachSnapshot) -> AppResult<()> {
        async_fs::create_dir_all(&self.state_dir)
            .await
            .with_context(|| format!("创建状态目录失败: {}", self.state_dir.display()))?;

        let bytes = self.encode(snapshot)?;
        let path = self.snapshot_path();
        if async_fs::try_exists(&path).await.unwrap_or(false) {
            self.create_backup(&path).await?;
        }
        atomic_write(&path, &bytes).await?;
        self.cleanup_old_backups().await?;
        debug!("快照已保存: {}", path.display());
        Ok(())
    }

    /// 读取快照，主文件损坏时依次尝试备份
    pub async fn load(&self) -> AppResult<Option<ReattachSnapshot>> {
        let path = self.snapshot_path();
        if !async_fs::try_exists(&path).await.unwrap_or(false) {
            debug!("快照文件不存在: {}", path.display());
            return Ok(None);
        }

        let bytes = async_fs::read(&path)
            .await
            .with_context(|| format!("读取快照失败: {}", path.display()))?;
        match self.decode(&bytes) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                error!("快照文件损坏: {}", e);
                warn!("尝试从备份恢复快照");
                self.restore_from_backup().await
            }
        }
    }

    /// 删除快照和全部备份
    pub async fn clear(&self) -> AppResult<()> {
        let path = self.snapshot_path();
        if async_fs::try_exists(&path).await.unwrap_or(false) {
            async_fs::remove_file(&path)
                .await
                .with_context(|| format!("删除快照失败: {}", path.display()))?;
        }
        let backup_dir = self.backup_dir();
        if async_fs::try_exists(&backup_dir).await.unwrap_or(false) {
            async_fs::remove_dir_all(&backup_dir)
                .await
                .with_context(|| format!("删除备份目录失败: {}", backup_dir.display()))?;
        }
        Ok(())
    }

    async fn create_backup(&self, source: &Path) -> AppResult<PathBuf> {
        let backup_dir = self.backup_dir();
        async_fs::create_dir_all(&backup_dir)
            .await
            .with_context(|| format!("创建备份目录失败: {}", backup_dir.display()))?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S%.6f");
        let backup = backup_dir.join(format!("reattach_{}.msgpack.bak", timestamp));
        async_fs::copy(source, &backup)
            .await
            .with_context(|| format!("创建备份失败: {}", backup.display()))?;
        Ok(backup)
    }

    /// 备份按文件名倒序，最新的在前
    async fn list_backups(&self) -> AppResult<Vec<PathBuf>> {
        let backup_dir = self.backup_dir();
        if !async_fs::try_exists(&backup_dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        let mut entries = async_fs::read_dir(&backup_dir)
            .await
            .with_context(|| format!("读取备份目录失败: {}", backup_dir.display()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("遍历备份目录失败: {}", backup_dir.display()))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("bak") {
                backups.push(path);
            }
        }
        backups.sort_by(|a, b| b.cmp(a));
        Ok(backups)
    }

    async fn restore_from_backup(&self) -> AppResult<Option<ReattachSnapshot>> {
        for backup in self.list_backups().await? {
            match async_fs::read(&backup).await {
                Ok(bytes) => match self.decode(&bytes) {
                    Ok(snapshot) => {
                        warn!("已从备份恢复快照: {}", backup.display());
                        return Ok(Some(snapshot));
                    }
                    Err(e) => warn!("备份文件损坏，尝试下一个: {} - {}", backup.display(), e),
                },
                Err(e) => warn!("读取备份文件失败: {} - {}", backup.display(), e),
            }
        }
        error!("所有快照备份都无法恢复");
        Ok(None)
    }

    async fn cleanup_old_backups(&self) -> AppResult<()> {
        let backups = self.list_backups().await?;
        for old in backups.iter().skip(self.options.backup_count) {
            match async_fs::remove_file(old).await {
                Ok(()) => debug!("删除旧备份: {}", old.display()),
                Err(e) => warn!("删除旧备份失败: {} - {}", old.display(), e),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("state_dir", &self.state_dir)
            .field("compression", &self.options.compression)
            .field("backup_count", &self.options.backup_count)
            .finish()
    }
}

fn compress(data: &[u8]) -> AppResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| anyhow!("数据压缩失败: {}", e))?;
    encoder.finish().map_err(|e| anyhow!("压缩完成失败: {}", e))
}

fn decompress(data: &[u8]) -> AppResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut result = Vec::new();
    decoder
        .read_to_end(&mut result)
        .map_err(|e| anyhow!("数据解压缩失败: {}", e))?;
    Ok(result)
}

/// 先写临时文件再重命名
pub(crate) async fn atomic_write(target: &Path, data: &[u8]) -> AppResult<()> {
    let temp = target.with_extension("tmp");
    async_fs::write(&temp, data)
        .await
        .with_context(|| format!("写入临时文件失败: {}", temp.display()))?;

    if let Err(e) = async_fs::rename(&temp, target).await {
        let _ = async_fs::remove_file(&temp).await;
        return Err(anyhow!(
            "原子重命名失败: {} -> {}: {}",
            temp.display(),
            target.display(),
            e
        ));
    }
    Ok(())
}
