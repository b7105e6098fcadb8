//! Content fetcher backed by the GitHub REST API.
//!
//! Needs no `git` binary. Revision lookups are two small JSON requests and
//! a fetch is a single zipball download, so even anonymous use stays well
//! inside the API rate limit.
//!
//! # Requests
//!
//! | Purpose | Endpoint |
//! |---------|----------|
//! | URL and default branch | `GET /repos/{owner}/{name}` |
//! | Latest revision | `GET /repos/{owner}/{name}/commits/{branch}` |
//! | Content | `GET /repos/{owner}/{name}/zipball/{sha}` |

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use reposearch_core::chunk::is_ignored_path;
use reposearch_core::error::IndexError;
use reposearch_core::fetch::ContentFetcher;
use reposearch_core::models::{FetchSummary, RepositoryId, RepositoryInfo};

use crate::config::GitHubConfig;

#[derive(Debug, Deserialize)]
struct RepoMeta {
    html_url: String,
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

pub struct GitHubFetcher {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl GitHubFetcher {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token(),
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .get(format!("{}{}", self.api_url, path))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "reposearch");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn repo_meta(&self, repo: &RepositoryId) -> Result<RepoMeta, IndexError> {
        let access = |reason: String| IndexError::RepositoryAccess {
            repository: repo.full_name(),
            reason,
        };

        let response = self
            .request(&format!("/repos/{}/{}", repo.owner(), repo.name()))
            .send()
            .await
            .map_err(|e| access(format!("GitHub API request failed: {}", e)))?;

        match response.status() {
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| access(format!("invalid GitHub API response: {}", e))),
            StatusCode::NOT_FOUND => Err(access("repository not found".to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(access(format!(
                "access denied ({}); set GITHUB_TOKEN for private repositories",
                response.status()
            ))),
            status => Err(access(format!("GitHub API returned {}", status))),
        }
    }

    /// SHA at the tip of `branch`. `None` for a repository without commits.
    async fn latest_commit(&self, repo: &RepositoryId, branch: &str) -> Result<Option<String>> {
        let response = self
            .request(&format!(
                "/repos/{}/{}/commits/{}",
                repo.owner(),
                repo.name(),
                branch
            ))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(Some(response.json::<CommitRef>().await?.sha)),
            StatusCode::CONFLICT => Ok(None),
            status => {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("GitHub API error {}: {}", status, body)
            }
        }
    }

    async fn resolve(&self, repo: &RepositoryId) -> Result<(RepoMeta, Option<String>), IndexError> {
        let meta = self.repo_meta(repo).await?;
        let branch = meta.default_branch.as_deref().unwrap_or("HEAD");
        let revision = self
            .latest_commit(repo, branch)
            .await
            .map_err(|e| IndexError::RepositoryAccess {
                repository: repo.full_name(),
                reason: format!("{:#}", e),
            })?;
        Ok((meta, revision))
    }

    /// Stream the zipball for `reference` into an anonymous temp file.
    async fn download_archive(&self, repo: &RepositoryId, reference: &str) -> Result<File> {
        let mut response = self
            .request(&format!(
                "/repos/{}/{}/zipball/{}",
                repo.owner(),
                repo.name(),
                reference
            ))
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("Failed to download archive for {}", repo))?;

        let mut file = tokio::fs::File::from_std(tempfile::tempfile()?);
        let mut bytes = 0u64;
        while let Some(chunk) = response.chunk().await? {
            bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        debug!(repository = %repo, bytes, "archive downloaded");

        let mut file = file.into_std().await;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }
}

#[async_trait]
impl ContentFetcher for GitHubFetcher {
    async fn get_info(&self, repo: &RepositoryId) -> Result<RepositoryInfo, IndexError> {
        let (meta, revision_id) = self.resolve(repo).await?;
        Ok(RepositoryInfo {
            owner: repo.owner().to_string(),
            name: repo.name().to_string(),
            url: meta.html_url,
            revision_id,
        })
    }

    async fn fetch_into(&self, repo: &RepositoryId, dir: &Path) -> Result<FetchSummary> {
        let (meta, revision_id) = self.resolve(repo).await?;
        let Some(reference) = revision_id
            .clone()
            .or_else(|| meta.default_branch.clone())
        else {
            // Nothing has ever been pushed.
            return Ok(FetchSummary::default());
        };

        let archive = self.download_archive(repo, &reference).await?;
        let dest = dir.to_path_buf();
        let file_count = tokio::task::spawn_blocking(move || extract_archive(archive, &dest))
            .await??;

        Ok(FetchSummary {
            file_count,
            revision_id,
        })
    }
}

/// Unpack a GitHub zipball into `dest` and return the number of files
/// written.
///
/// GitHub wraps the tree in a single `<owner>-<name>-<sha>/` directory,
/// which is stripped. Entries that would escape `dest` or that the chunker
/// ignores anyway are skipped.
fn extract_archive<R: Read + Seek>(reader: R, dest: &Path) -> Result<u64> {
    let mut archive = zip::ZipArchive::new(reader).context("Invalid repository archive")?;
    let mut written = 0u64;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(enclosed) = entry.enclosed_name() else {
            warn!(entry = entry.name(), "skipping archive entry with unsafe path");
            continue;
        };
        let relative: PathBuf = enclosed.components().skip(1).collect();
        if relative.as_os_str().is_empty() || is_ignored_path(&relative) {
            continue;
        }

        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)
            .with_context(|| format!("Failed to create {}", target.display()))?;
        match std::io::copy(&mut entry, &mut out) {
            Ok(_) => written += 1,
            Err(e) => {
                warn!(path = %relative.display(), error = %e, "skipping unreadable archive entry");
                drop(out);
                let _ = fs::remove_file(&target);
            }
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn zipball(entries: &[(&str, &str)]) -> Cursor<Vec<u8>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            if name.ends_with('/') {
                writer
                    .add_directory(*name, SimpleFileOptions::default())
                    .unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
        }
        let mut cursor = writer.finish().unwrap();
        cursor.set_position(0);
        cursor
    }

    #[test]
    fn test_extract_strips_top_level_dir() {
        let dest = TempDir::new().unwrap();
        let archive = zipball(&[
            ("acme-widgets-abc123/", ""),
            ("acme-widgets-abc123/README.md", "# Widgets\n"),
            ("acme-widgets-abc123/src/", ""),
            ("acme-widgets-abc123/src/lib.rs", "pub fn widget() {}\n"),
        ]);

        let written = extract_archive(archive, dest.path()).unwrap();
        assert_eq!(written, 2);
        assert_eq!(
            fs::read_to_string(dest.path().join("src/lib.rs")).unwrap(),
            "pub fn widget() {}\n"
        );
        assert!(!dest.path().join("acme-widgets-abc123").exists());
    }

    #[test]
    fn test_extract_skips_ignored_paths() {
        let dest = TempDir::new().unwrap();
        let archive = zipball(&[
            ("acme-widgets-abc123/node_modules/dep/index.js", "x"),
            ("acme-widgets-abc123/logo.png", "not really a png"),
            ("acme-widgets-abc123/main.py", "print('hi')\n"),
        ]);

        let written = extract_archive(archive, dest.path()).unwrap();
        assert_eq!(written, 1);
        assert!(dest.path().join("main.py").exists());
        assert!(!dest.path().join("node_modules").exists());
    }

    #[test]
    fn test_extract_rejects_escaping_entries() {
        let dest = TempDir::new().unwrap();
        let archive = zipball(&[
            ("acme-widgets-abc123/../../evil.txt", "nope"),
            ("acme-widgets-abc123/ok.txt", "fine"),
        ]);

        let written = extract_archive(archive, dest.path()).unwrap();
        assert_eq!(written, 1);
        assert!(dest.path().join("ok.txt").exists());
    }

    #[test]
    fn test_extract_invalid_archive() {
        let dest = TempDir::new().unwrap();
        assert!(extract_archive(Cursor::new(b"not a zip".to_vec()), dest.path()).is_err());
    }
}
