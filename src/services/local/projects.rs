use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::app_bail;
use crate::config::ConsoleConfig;
use crate::services::{Project, ProjectRegistry};
use crate::utils::AppResult;

/// 以配置文件中的项目为初始内容的内存注册表
#[derive(Debug, Default)]
pub struct ConfigProjectRegistry {
    projects: RwLock<Vec<Project>>,
}

impl ConfigProjectRegistry {
    pub fn new(projects: Vec<Project>) -> Self {
        Self {
            projects: RwLock::new(projects),
        }
    }

    pub fn from_config(config: &ConsoleConfig) -> Self {
        Self::new(config.projects.iter().map(Project::from).collect())
    }
}

#[async_trait]
impl ProjectRegistry for ConfigProjectRegistry {
    async fn list(&self) -> AppResult<Vec<Project>> {
        Ok(self.projects.read().clone())
    }

    async fn add(&self, project: Project) -> AppResult<()> {
        if project.id.trim().is_empty() {
            app_bail!("项目 id 不能为空");
        }
        let mut projects = self.projects.write();
        if projects.iter().any(|p| p.id == project.id) {
            app_bail!("项目已存在: {}", project.id);
        }
        debug!("添加项目: {}", project.id);
        projects.push(project);
        Ok(())
    }

    async fn remove(&self, project_id: &str) -> AppResult<()> {
        let mut projects = self.projects.write();
        let before = projects.len();
        projects.retain(|p| p.id != project_id);
        if projects.len() == before {
            app_bail!("项目不存在: {}", project_id);
        }
        debug!("移除项目: {}", project_id);
        Ok(())
    }
}
