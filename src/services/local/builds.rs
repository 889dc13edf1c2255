use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::command_from_line;
use crate::app_bail;
use crate::services::{BuildEvent, BuildOrchestrator, BuildTarget, Project, ProjectRegistry};
use crate::utils::AppResult;

/// 单个构建步骤
#[derive(Debug, Clone)]
struct BuildStep {
    label: String,
    command: String,
    work_dir: PathBuf,
}

/// 按配置中的构建命令依次执行的构建编排器
pub struct CommandBuildOrchestrator {
    projects: Arc<dyn ProjectRegistry>,
}

impl CommandBuildOrchestrator {
    pub fn new(projects: Arc<dyn ProjectRegistry>) -> Self {
        Self { projects }
    }

    async fn plan(&self, target: &BuildTarget) -> AppResult<Vec<BuildStep>> {
        match target {
            BuildTarget::All => {
                let mut steps = Vec::new();
                for project in self.projects.list().await? {
                    steps.extend(project_steps(&project));
                }
                Ok(steps)
            }
            BuildTarget::Project { project_id } => {
                let project = self.require_project(project_id).await?;
                let steps = project_steps(&project);
                if steps.is_empty() {
                    app_bail!("项目 {} 没有配置构建命令", project_id);
                }
                Ok(steps)
            }
            BuildTarget::Component {
                project_id,
                component,
            } => {
                let project = self.require_project(project_id).await?;
                let Some(c) = project.component(component) else {
                    app_bail!("项目 {} 中不存在组件 {}", project_id, component);
                };
                Ok(vec![component_step(&project, c)])
            }
        }
    }

    async fn require_project(&self, project_id: &str) -> AppResult<Project> {
        self.projects
            .get(project_id)
            .await?
            .ok_or_else(|| anyhow!("项目不存在: {}", project_id))
    }
}

fn project_steps(project: &Project) -> Vec<BuildStep> {
    match &project.build_command {
        Some(command) => vec![BuildStep {
            label: project.id.clone(),
            command: command.clone(),
            work_dir: project.path.clone(),
        }],
        None => project
            .components
            .iter()
            .map(|c| component_step(project, c))
            .collect(),
    }
}

fn component_step(project: &Project, component: &crate::services::Component) -> BuildStep {
    BuildStep {
        label: format!("{}/{}", project.id, component.name),
        command: component.build_command.clone(),
        work_dir: component
            .work_dir
            .as_ref()
            .map(|dir| project.path.join(dir))
            .unwrap_or_else(|| project.path.clone()),
    }
}

async fn forward_lines<R>(reader: R, events: UnboundedSender<BuildEvent>, is_error: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let event = if is_error {
                    BuildEvent::Error { line }
                } else {
                    BuildEvent::Output { line }
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!("读取构建输出失败: {}", e);
                return;
            }
        }
    }
}

async fn run_step(
    step: &BuildStep,
    events: &UnboundedSender<BuildEvent>,
    cancel: &CancellationToken,
) -> AppResult<()> {
    let mut cmd = command_from_line(&step.command)?;
    cmd.current_dir(&step.work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("启动构建命令失败: {}", step.command))?;

    let stdout = child.stdout.take().map(|out| {
        tokio::spawn(forward_lines(out, events.clone(), false))
    });
    let stderr = child.stderr.take().map(|err| {
        tokio::spawn(forward_lines(err, events.clone(), true))
    });

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("构建被取消，终止进程: {}", step.label);
            let _ = child.kill().await;
            app_bail!("{} 构建被取消", step.label);
        }
        status = child.wait() => status.context("等待构建进程失败")?,
    };

    for task in [stdout, stderr].into_iter().flatten() {
        let _ = task.await;
    }

    if !status.success() {
        app_bail!(
            "{} exited with {}",
            step.command,
            status.code().map_or("signal".to_string(), |c| format!("code {}", c))
        );
    }
    Ok(())
}

#[async_trait]
impl BuildOrchestrator for CommandBuildOrchestrator {
    async fn build(
        &self,
        target: BuildTarget,
        events: UnboundedSender<BuildEvent>,
        cancel: CancellationToken,
    ) -> AppResult<()> {
        let steps = self.plan(&target).await?;
        info!("开始构建 {}，共 {} 个步骤", target, steps.len());

        for step in &steps {
            if cancel.is_cancelled() {
                app_bail!("{} 构建被取消", target);
            }
            let _ = events.send(BuildEvent::Started {
                label: step.label.clone(),
            });
            let result = run_step(step, &events, &cancel).await;
            let _ = events.send(BuildEvent::Finished {
                label: step.label.clone(),
                success: result.is_ok(),
            });
            result?;
        }
        Ok(())
    }
}
