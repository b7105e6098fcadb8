//! Content fetcher backed by the `git` binary.
//!
//! Resolves the latest revision with `git ls-remote` and materializes the
//! repository with a shallow `git clone --depth 1`. Needs `git` on `PATH`
//! but no API quota, which makes it the better choice for large
//! repositories.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use tokio::process::Command;
use tracing::debug;
use walkdir::WalkDir;

use reposearch_core::chunk::SKIPPED_DIRS;
use reposearch_core::error::IndexError;
use reposearch_core::fetch::ContentFetcher;
use reposearch_core::models::{FetchSummary, RepositoryId, RepositoryInfo};

use crate::config::GitHubConfig;

pub struct GitCliFetcher {
    clone_base: String,
    token: Option<String>,
}

impl GitCliFetcher {
    pub fn new(config: &GitHubConfig) -> Self {
        Self {
            clone_base: config.clone_base.trim_end_matches('/').to_string(),
            token: config.token(),
        }
    }

    fn clone_url(&self, repo: &RepositoryId) -> String {
        format!("{}/{}/{}.git", self.clone_base, repo.owner(), repo.name())
    }

    /// A `git` invocation that never prompts and, with a token, sends it
    /// as HTTP basic auth.
    ///
    /// The header goes through `GIT_CONFIG_*` variables rather than `-c`,
    /// which would put the token on the command line for `ps` to show.
    fn git(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(token) = &self.token {
            if self.clone_base.starts_with("https://") {
                let credentials = base64::engine::general_purpose::STANDARD
                    .encode(format!("x-access-token:{}", token));
                cmd.env("GIT_CONFIG_COUNT", "1")
                    .env("GIT_CONFIG_KEY_0", "http.extraHeader")
                    .env(
                        "GIT_CONFIG_VALUE_0",
                        format!("Authorization: Basic {}", credentials),
                    );
            }
        }
        cmd
    }

    async fn ls_remote_head(&self, url: &str) -> Result<Option<String>> {
        let output = self
            .git()
            .args(["ls-remote", url, "HEAD"])
            .output()
            .await
            .with_context(|| "Failed to execute 'git ls-remote'. Is git installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{}", stderr.trim());
        }

        // `<sha>\tHEAD`; empty for a repository without commits.
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .find_map(|line| line.split_whitespace().next())
            .map(str::to_string))
    }
}

#[async_trait]
impl ContentFetcher for GitCliFetcher {
    async fn get_info(&self, repo: &RepositoryId) -> Result<RepositoryInfo, IndexError> {
        let url = self.clone_url(repo);
        let revision_id = self
            .ls_remote_head(&url)
            .await
            .map_err(|e| IndexError::RepositoryAccess {
                repository: repo.full_name(),
                reason: e.to_string(),
            })?;

        Ok(RepositoryInfo {
            owner: repo.owner().to_string(),
            name: repo.name().to_string(),
            url: repo.github_url(),
            revision_id,
        })
    }

    async fn fetch_into(&self, repo: &RepositoryId, dir: &Path) -> Result<FetchSummary> {
        let url = self.clone_url(repo);
        debug!(repository = %repo, dest = %dir.display(), "cloning");

        let output = self
            .git()
            .args(["clone", "--depth", "1", "--quiet"])
            .arg(&url)
            .arg(dir)
            .output()
            .await
            .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git clone failed: {}", stderr.trim());
        }

        let revision_id = head_sha(dir).await.ok();
        Ok(FetchSummary {
            file_count: count_files(dir),
            revision_id,
        })
    }
}

async fn head_sha(repo_dir: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .await
        .with_context(|| "Failed to get HEAD SHA")?;

    if !output.status.success() {
        bail!("git rev-parse HEAD failed");
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Regular files in the checkout, not counting git metadata.
fn count_files(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e
                    .file_name()
                    .to_str()
                    .map(|name| SKIPPED_DIRS.contains(&name))
                    .unwrap_or(false)
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn git_available() -> bool {
        StdCommand::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn run_git(dir: &Path, args: &[&str]) {
        let status = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    /// A local repository laid out as `<base>/acme/widgets.git`.
    fn local_remote() -> (TempDir, GitCliFetcher) {
        let base = TempDir::new().unwrap();
        let repo_dir = base.path().join("acme").join("widgets.git");
        fs::create_dir_all(repo_dir.join("src")).unwrap();
        fs::write(repo_dir.join("README.md"), "# Widgets\n").unwrap();
        fs::write(repo_dir.join("src/lib.rs"), "pub fn widget() {}\n").unwrap();
        run_git(&repo_dir, &["init", "--quiet"]);
        run_git(&repo_dir, &["add", "."]);
        run_git(&repo_dir, &["commit", "--quiet", "-m", "initial"]);

        let fetcher = GitCliFetcher {
            clone_base: base.path().display().to_string(),
            token: None,
        };
        (base, fetcher)
    }

    #[tokio::test]
    async fn test_info_and_clone_from_local_remote() {
        if !git_available() {
            return;
        }
        let (_base, fetcher) = local_remote();
        let repo = RepositoryId::new("acme", "widgets").unwrap();

        let info = fetcher.get_info(&repo).await.unwrap();
        let revision = info.revision_id.clone().unwrap();
        assert_eq!(revision.len(), 40);
        assert_eq!(info.url, "https://github.com/acme/widgets");

        let dest = TempDir::new().unwrap();
        let summary = fetcher.fetch_into(&repo, dest.path()).await.unwrap();
        assert_eq!(summary.file_count, 2);
        assert_eq!(summary.revision_id.as_deref(), Some(revision.as_str()));
        assert!(dest.path().join("src/lib.rs").exists());
    }

    #[tokio::test]
    async fn test_missing_remote_is_access_error() {
        if !git_available() {
            return;
        }
        let base = TempDir::new().unwrap();
        let fetcher = GitCliFetcher {
            clone_base: base.path().display().to_string(),
            token: None,
        };
        let repo = RepositoryId::new("nobody", "nothing").unwrap();
        let err = fetcher.get_info(&repo).await.unwrap_err();
        assert!(matches!(err, IndexError::RepositoryAccess { .. }));
    }

    #[test]
    fn test_token_is_passed_through_environment() {
        let fetcher = GitCliFetcher {
            clone_base: "https://github.com".to_string(),
            token: Some("s3cret".to_string()),
        };
        let cmd = fetcher.git();
        let std_cmd = cmd.as_std();

        assert!(std_cmd
            .get_args()
            .all(|arg| !arg.to_string_lossy().contains("Authorization")));

        let env: Vec<(String, String)> = std_cmd
            .get_envs()
            .filter_map(|(k, v)| Some((k.to_str()?.to_string(), v?.to_str()?.to_string())))
            .collect();
        let value = |key: &str| {
            env.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(value("GIT_CONFIG_COUNT"), "1");
        assert_eq!(value("GIT_CONFIG_KEY_0"), "http.extraHeader");
        let expected = base64::engine::general_purpose::STANDARD.encode("x-access-token:s3cret");
        assert_eq!(
            value("GIT_CONFIG_VALUE_0"),
            format!("Authorization: Basic {}", expected)
        );
    }

    #[test]
    fn test_no_auth_header_for_local_remotes() {
        let fetcher = GitCliFetcher {
            clone_base: "/srv/git".to_string(),
            token: Some("s3cret".to_string()),
        };
        let cmd = fetcher.git();
        assert!(cmd
            .as_std()
            .get_envs()
            .all(|(k, _)| k != "GIT_CONFIG_COUNT"));
    }

    #[test]
    fn test_count_files_skips_git_dir() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        assert_eq!(count_files(dir.path()), 1);
    }
}
