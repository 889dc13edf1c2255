/*!
 * 外部协作服务
 *
 * 协调器只通过这里的 trait 调用项目注册表、构建、进程监管和版本控制服务，
 * `local` 子模块提供基于配置和本地命令的默认实现。
 */

pub mod local;
pub mod types;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::ConsoleConfig;
use crate::git::{CommitInfo, GitService, RepositoryStatus};
use crate::utils::AppResult;

pub use types::*;

#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    async fn list(&self) -> AppResult<Vec<Project>>;

    async fn add(&self, project: Project) -> AppResult<()>;

    async fn remove(&self, project_id: &str) -> AppResult<()>;

    async fn get(&self, project_id: &str) -> AppResult<Option<Project>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|p| p.id == project_id))
    }
}

/// 构建编排器
///
/// 实现需要在步骤之间检查 `cancel`，被取消后尽快返回。
#[async_trait]
pub trait BuildOrchestrator: Send + Sync {
    async fn build(
        &self,
        target: BuildTarget,
        events: UnboundedSender<BuildEvent>,
        cancel: CancellationToken,
    ) -> AppResult<()>;
}

#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn control(&self, name: &str, action: ProcessAction) -> AppResult<()>;

    async fn list(&self) -> AppResult<Vec<ProcessInfo>>;
}

#[async_trait]
pub trait VcsStatusService: Send + Sync {
    async fn status(&self, project: &Project) -> AppResult<RepositoryStatus>;

    async fn diff(&self, project: &Project, file: Option<&str>) -> AppResult<String>;

    async fn log(&self, project: &Project, limit: usize) -> AppResult<Vec<CommitInfo>>;
}

/// 注入协调器的服务集合
#[derive(Clone)]
pub struct Services {
    pub projects: Arc<dyn ProjectRegistry>,
    pub builds: Arc<dyn BuildOrchestrator>,
    pub processes: Arc<dyn ProcessSupervisor>,
    pub vcs: Arc<dyn VcsStatusService>,
}

impl Services {
    /// 基于配置和本地命令的默认服务
    pub fn local(config: &ConsoleConfig) -> Self {
        let projects: Arc<dyn ProjectRegistry> =
            Arc::new(local::ConfigProjectRegistry::from_config(config));
        Self {
            builds: Arc::new(local::CommandBuildOrchestrator::new(Arc::clone(&projects))),
            processes: Arc::new(local::CommandProcessSupervisor::from_config(config)),
            vcs: Arc::new(GitService::default()),
            projects,
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
