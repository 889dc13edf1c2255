//! 基于 git 命令行的版本控制状态服务

use async_trait::async_trait;
use std::io;
use std::path::Path;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, instrument};

use crate::git::types::*;
use crate::services::{Project, VcsStatusService};
use crate::utils::AppResult;

const MAX_LOG_ENTRIES: usize = 200;

/// `git` CLI 封装
#[derive(Debug, Clone)]
pub struct GitService {
    program: String,
}

impl Default for GitService {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitService {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn execute(&self, args: &[&str], cwd: &Path) -> Result<Vec<u8>, GitError> {
        let mut cmd = AsyncCommand::new(&self.program);
        cmd.args(args).current_dir(cwd).kill_on_drop(true);

        let output = cmd.output().await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => GitError::NotInstalled,
            _ => GitError::Io(e),
        })?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_not_a_repository(&stderr) {
            return Err(GitError::NotARepository(cwd.display().to_string()));
        }
        Err(GitError::CommandFailed {
            args: args.join(" "),
            stderr,
        })
    }

    /// 返回仓库根目录，非仓库返回 None
    pub async fn repository_root(&self, path: &Path) -> Result<Option<String>, GitError> {
        match self.execute(&["rev-parse", "--show-toplevel"], path).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).trim().to_string())),
            Err(GitError::NotARepository(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn get_status(&self, path: &Path) -> Result<RepositoryStatus, GitError> {
        let Some(root) = self.repository_root(path).await? else {
            return Ok(RepositoryStatus::not_a_repository());
        };

        let output = self
            .execute(
                &["status", "--porcelain=v1", "--branch", "-z"],
                Path::new(&root),
            )
            .await?;

        let mut status = parse_porcelain_status(&output);
        status.is_repository = true;
        status.root_path = Some(root);
        debug!(
            "仓库状态: branch={:?}, changes={}",
            status.current_branch,
            status.change_count()
        );
        Ok(status)
    }

    pub async fn get_diff(&self, path: &Path, file: Option<&str>) -> Result<String, GitError> {
        let mut args = vec!["diff", "--no-color", "--unified=3"];
        if let Some(file) = file {
            args.push("--");
            args.push(file);
        }
        let output = self.execute(&args, path).await?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    pub async fn get_commits(&self, path: &Path, limit: usize) -> Result<Vec<CommitInfo>, GitError> {
        let limit = limit.clamp(1, MAX_LOG_ENTRIES);
        let n_arg = format!("-n{}", limit);
        let args = [
            "log",
            "-z",
            n_arg.as_str(),
            "--date=iso-strict",
            "--pretty=format:%H%x1f%h%x1f%an%x1f%ad%x1f%D%x1f%s",
        ];

        match self.execute(&args, path).await {
            Ok(bytes) => Ok(parse_log_records(&bytes)),
            Err(GitError::CommandFailed { stderr, .. })
                if stderr.contains("does not have any commits yet") =>
            {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl VcsStatusService for GitService {
    async fn status(&self, project: &Project) -> AppResult<RepositoryStatus> {
        Ok(self.get_status(&project.path).await?)
    }

    async fn diff(&self, project: &Project, file: Option<&str>) -> AppResult<String> {
        Ok(self.get_diff(&project.path, file).await?)
    }

    async fn log(&self, project: &Project, limit: usize) -> AppResult<Vec<CommitInfo>> {
        Ok(self.get_commits(&project.path, limit).await?)
    }
}

fn is_not_a_repository(stderr: &str) -> bool {
    let msg = stderr.to_lowercase();
    msg.contains("not a git repository") || (msg.contains("fatal:") && msg.contains("not a repository"))
}

/// 解析 `git status --porcelain=v1 --branch -z` 输出
pub fn parse_porcelain_status(bytes: &[u8]) -> RepositoryStatus {
    let mut status = RepositoryStatus::default();
    let mut records = bytes.split(|b| *b == 0).filter(|r| !r.is_empty());

    while let Some(record) = records.next() {
        if let Some(summary) = record.strip_prefix(b"## ") {
            apply_branch_summary(&String::from_utf8_lossy(summary), &mut status);
            continue;
        }
        if record.len() < 4 {
            continue;
        }

        let (x, y) = (record[0] as char, record[1] as char);
        let path = String::from_utf8_lossy(&record[3..]).to_string();

        if (x, y) == ('?', '?') {
            status.untracked_files.push(FileChange {
                path,
                status: FileChangeStatus::Untracked,
                old_path: None,
            });
            continue;
        }

        if x == 'U' || y == 'U' || matches!((x, y), ('D', 'D') | ('A', 'A')) {
            status.conflicted_files.push(FileChange {
                path,
                status: FileChangeStatus::Conflicted,
                old_path: None,
            });
            continue;
        }

        // 重命名/复制记录后紧跟原路径
        let old_path = if matches!(x, 'R' | 'C') || matches!(y, 'R' | 'C') {
            records
                .next()
                .map(|r| String::from_utf8_lossy(r).to_string())
        } else {
            None
        };

        if let Some(kind) = map_status_char(x) {
            status.staged_files.push(FileChange {
                path: path.clone(),
                status: kind,
                old_path: old_path.clone(),
            });
        }
        if let Some(kind) = map_status_char(y) {
            status.modified_files.push(FileChange {
                path,
                status: kind,
                old_path,
            });
        }
    }

    status
}

fn map_status_char(ch: char) -> Option<FileChangeStatus> {
    match ch {
        'A' => Some(FileChangeStatus::Added),
        'M' | 'T' => Some(FileChangeStatus::Modified),
        'D' => Some(FileChangeStatus::Deleted),
        'R' => Some(FileChangeStatus::Renamed),
        'C' => Some(FileChangeStatus::Copied),
        _ => None,
    }
}

/// 解析分支摘要行，例如 `main...origin/main [ahead 3, behind 1]`
fn apply_branch_summary(summary: &str, status: &mut RepositoryStatus) {
    let summary = summary.trim();
    if summary == "HEAD (no branch)" {
        status.is_detached = true;
        return;
    }
    for prefix in ["No commits yet on ", "Initial commit on "] {
        if let Some(branch) = summary.strip_prefix(prefix) {
            status.is_empty = true;
            status.current_branch = Some(branch.trim().to_string());
            return;
        }
    }

    let (head, tracking) = match summary.split_once(" [") {
        Some((head, rest)) => (head, Some(rest.trim_end_matches(']'))),
        None => (summary, None),
    };
    let branch = head.split_once("...").map_or(head, |(branch, _)| branch).trim();
    if !branch.is_empty() {
        status.current_branch = Some(branch.to_string());
    }

    for part in tracking.into_iter().flat_map(|t| t.split(',')) {
        let part = part.trim();
        if let Some(n) = part.strip_prefix("ahead ") {
            status.ahead = n.parse().ok();
        } else if let Some(n) = part.strip_prefix("behind ") {
            status.behind = n.parse().ok();
        }
    }
}

fn parse_log_records(bytes: &[u8]) -> Vec<CommitInfo> {
    bytes
        .split(|b| *b == 0)
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let text = String::from_utf8_lossy(record);
            let fields: Vec<&str> = text.split('\x1f').collect();
            if fields.len() < 6 {
                return None;
            }
            Some(CommitInfo {
                hash: fields[0].trim_start_matches('\n').to_string(),
                short_hash: fields[1].to_string(),
                author_name: fields[2].to_string(),
                date: fields[3].to_string(),
                refs: fields[4]
                    .split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect(),
                message: fields[5].to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_branch_and_changes() {
        let raw = b"## main...origin/main [ahead 1, behind 2]\0 M src/lib.rs\0A  new.rs\0?? scratch.txt\0";
        let status = parse_porcelain_status(raw);
        assert_eq!(status.current_branch.as_deref(), Some("main"));
        assert_eq!(status.ahead, Some(1));
        assert_eq!(status.behind, Some(2));
        assert_eq!(status.modified_files[0].path, "src/lib.rs");
        assert_eq!(status.staged_files[0].status, FileChangeStatus::Added);
        assert_eq!(status.untracked_files[0].path, "scratch.txt");
        assert!(status.is_dirty());
    }

    #[test]
    fn rename_consumes_original_path_record() {
        let raw = b"## dev\0R  new_name.rs\0old_name.rs\0 M other.rs\0";
        let status = parse_porcelain_status(raw);
        assert_eq!(status.staged_files.len(), 1);
        assert_eq!(status.staged_files[0].path, "new_name.rs");
        assert_eq!(status.staged_files[0].old_path.as_deref(), Some("old_name.rs"));
        assert_eq!(status.modified_files[0].path, "other.rs");
    }

    #[test]
    fn detached_and_empty_heads() {
        let detached = parse_porcelain_status(b"## HEAD (no branch)\0");
        assert!(detached.is_detached);
        assert!(detached.current_branch.is_none());

        let empty = parse_porcelain_status(b"## No commits yet on main\0");
        assert!(empty.is_empty);
        assert_eq!(empty.current_branch.as_deref(), Some("main"));
        assert!(!empty.is_dirty());
    }

    #[test]
    fn conflicts_are_separated() {
        let status = parse_porcelain_status(b"UU merge.rs\0AA both.rs\0");
        assert_eq!(status.conflicted_files.len(), 2);
        assert!(status.staged_files.is_empty());
    }

    #[test]
    fn parses_log_records() {
        let raw = b"abc123\x1fabc\x1fAda\x1f2024-01-01T00:00:00+00:00\x1fHEAD -> main, tag: v1\x1fInitial\0def456\x1fdef\x1fBob\x1f2024-01-02T00:00:00+00:00\x1f\x1fSecond\0";
        let commits = parse_log_records(raw);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].refs, vec!["HEAD -> main", "tag: v1"]);
        assert_eq!(commits[1].message, "Second");
        assert!(commits[1].refs.is_empty());
    }
}
