//! Publish datasets into yearly git repositories

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{CountsFile, DatasetCounts, DatasetPublisher, PublishOutcome};
use crate::config::CrawlConfig;
use crate::error::PublishError;

const BOT_NAME: &str = "statground-bot";
const BOT_EMAIL: &str = "statground-bot@users.noreply.github.com";

/// Clones each dataset repository shallowly, copies the new files in,
/// refreshes the counts file, and pushes a single commit.
///
/// Repositories must already exist. The token travels as a per-command
/// `http.extraHeader`, so it is never written into a clone's `.git/config`.
pub struct GitPublisher {
    /// Remote prefix; the dataset name and `.git` are appended
    remote_base: String,
    token: Option<String>,
    /// `http.extraHeader` value derived from the token
    auth_header: Option<String>,
    branch: String,
    work_dir: PathBuf,
    counts_file_name: String,
}

impl GitPublisher {
    pub fn new(
        remote_base: impl Into<String>,
        branch: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        counts_file_name: impl Into<String>,
    ) -> Self {
        Self {
            remote_base: remote_base.into(),
            token: None,
            auth_header: None,
            branch: branch.into(),
            work_dir: work_dir.into(),
            counts_file_name: counts_file_name.into(),
        }
    }

    /// Authenticate clone and push with a GitHub token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        let basic = STANDARD.encode(format!("x-access-token:{}", token));
        self.auth_header = Some(format!("AUTHORIZATION: basic {}", basic));
        self.token = Some(token);
        self
    }

    /// Publisher pushing to `https://github.com/<org>/<dataset>.git`
    pub fn from_config(config: &CrawlConfig) -> Result<Self, PublishError> {
        let token = config
            .github
            .token
            .clone()
            .ok_or(PublishError::MissingCredential {
                publisher: "git",
                hint: "set GH_TOKEN or GH_PAT",
            })?;

        Ok(Self::new(
            format!("https://github.com/{}", config.github.org),
            config.github.branch.clone(),
            config.fanout.work_dir.clone(),
            config.fanout.counts_file_name.clone(),
        )
        .with_token(token))
    }

    fn remote_url(&self, dataset: &str) -> String {
        format!("{}/{}.git", self.remote_base.trim_end_matches('/'), dataset)
    }

    /// Scrub the token and the header derived from it
    fn redact(&self, text: &str) -> String {
        let mut text = text.to_string();
        for secret in [&self.auth_header, &self.token].into_iter().flatten() {
            if !secret.is_empty() {
                text = text.replace(secret.as_str(), "***");
            }
        }
        text
    }

    async fn git(&self, args: &[&str], cwd: Option<&Path>) -> Result<String, PublishError> {
        self.run(args.iter().map(|a| a.to_string()).collect(), cwd).await
    }

    /// Run a git command that talks to the remote
    async fn git_remote(&self, args: &[&str], cwd: Option<&Path>) -> Result<String, PublishError> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(header) = &self.auth_header {
            full.push("-c".to_string());
            full.push(format!("http.extraHeader={}", header));
        }
        full.extend(args.iter().map(|a| a.to_string()));
        self.run(full, cwd).await
    }

    async fn run(&self, args: Vec<String>, cwd: Option<&Path>) -> Result<String, PublishError> {
        let mut command = Command::new("git");
        command.args(&args);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let rendered = self.redact(&format!("git {}", args.join(" ")));
        debug!(command = %rendered, "Running");

        let output = command
            .output()
            .await
            .map_err(|e| PublishError::Command {
                command: rendered.clone(),
                output: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PublishError::Command {
                command: rendered,
                output: self.redact(stderr.trim()),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Files git would track after `git add -A`
    async fn tracked_counts(&self, repo: &Path) -> Result<DatasetCounts, PublishError> {
        let listing = self
            .git(
                &["ls-files", "--cached", "--others", "--exclude-standard"],
                Some(repo),
            )
            .await?;
        Ok(DatasetCounts::from_paths(
            listing.lines().map(str::trim).filter(|l| !l.is_empty()),
        ))
    }

    /// Clone, update and push one dataset inside `dest`
    async fn publish_in(
        &self,
        dataset: &str,
        dest: &Path,
        source_root: &Path,
        files: &[String],
    ) -> Result<PublishOutcome, PublishError> {
        let dest_str = dest.to_string_lossy().into_owned();
        info!(dataset, "Cloning dataset repository");
        self.git_remote(
            &["clone", "--depth=1", &self.remote_url(dataset), &dest_str],
            None,
        )
        .await?;

        copy_files(source_root, dest, files).await?;

        let counts = self.tracked_counts(dest).await?;
        let counts_path = dest.join(&self.counts_file_name);
        tokio::fs::write(&counts_path, CountsFile::new(dataset, counts).to_bytes()?)
            .await
            .map_err(|e| PublishError::io(counts_path.display().to_string(), e))?;

        self.git(&["add", "-A"], Some(dest)).await?;
        let status = self.git(&["status", "--porcelain"], Some(dest)).await?;

        // the counts file timestamp alone does not make a change worth pushing
        let changed = status
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .any(|line| !line.ends_with(self.counts_file_name.as_str()));

        if changed {
            self.git(&["config", "user.name", BOT_NAME], Some(dest)).await?;
            self.git(&["config", "user.email", BOT_EMAIL], Some(dest)).await?;
            let message = format!(
                "Polymarket daily update ({})",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
            );
            self.git(&["commit", "-m", &message], Some(dest)).await?;
            self.git_remote(&["push", "origin", &format!("HEAD:{}", self.branch)], Some(dest))
                .await?;
        } else {
            info!(dataset, "No changes to push");
        }

        Ok(PublishOutcome {
            dataset: dataset.to_string(),
            files: files.len(),
            counts,
            changed,
        })
    }
}

async fn remove_clone(dest: &Path) -> Result<(), PublishError> {
    if tokio::fs::try_exists(dest).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(dest)
            .await
            .map_err(|e| PublishError::io(dest.display().to_string(), e))?;
    }
    Ok(())
}

async fn copy_files(source_root: &Path, dest: &Path, files: &[String]) -> Result<(), PublishError> {
    for file in files {
        let from = source_root.join(file);
        let to = dest.join(file);
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PublishError::io(parent.display().to_string(), e))?;
        }
        tokio::fs::copy(&from, &to)
            .await
            .map_err(|e| PublishError::io(from.display().to_string(), e))?;
    }
    Ok(())
}

#[async_trait]
impl DatasetPublisher for GitPublisher {
    fn name(&self) -> &str {
        "git"
    }

    async fn publish(
        &self,
        dataset: &str,
        source_root: &Path,
        files: &[String],
    ) -> Result<PublishOutcome, PublishError> {
        let dest = self.work_dir.join(dataset);
        remove_clone(&dest).await?;
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| PublishError::io(self.work_dir.display().to_string(), e))?;

        let result = self.publish_in(dataset, &dest, source_root, files).await;

        // the clone is scratch space whatever the outcome
        let cleanup = remove_clone(&dest).await;
        if let (Err(e), Err(_)) = (&cleanup, &result) {
            warn!(dataset, error = %e, "Failed to remove dataset clone");
        }
        let outcome = result?;
        cleanup?;
        Ok(outcome)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_token() {
        let config = CrawlConfig::default();
        assert!(matches!(
            GitPublisher::from_config(&config),
            Err(PublishError::MissingCredential { .. })
        ));
    }

    #[test]
    fn test_token_stays_out_of_remote_url() {
        let mut config = CrawlConfig::default();
        config.github.token = Some("ghp_secret".to_string());
        let publisher = GitPublisher::from_config(&config).unwrap();

        let url = publisher.remote_url("Statground_Data_Polymarket_2025");
        assert_eq!(
            url,
            "https://github.com/statground/Statground_Data_Polymarket_2025.git"
        );

        let header = publisher.auth_header.clone().unwrap();
        assert!(!header.contains("ghp_secret"));
        let line = format!("git -c http.extraHeader={} push; token ghp_secret", header);
        let redacted = publisher.redact(&line);
        assert!(!redacted.contains("ghp_secret"));
        assert!(!redacted.contains(&header));
    }

    fn sh(args: &[&str], cwd: &Path) {
        let status = std::process::Command::new("git")
            .args(args)
            .current_dir(cwd)
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_push_removes_clone() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let remotes = tmp.path().join("remotes");
        let bare = remotes.join("Data_2025.git");
        std::fs::create_dir_all(&bare).unwrap();
        sh(&["init", "--bare", "--quiet"], &bare);
        let hook = bare.join("hooks/pre-receive");
        std::fs::create_dir_all(hook.parent().unwrap()).unwrap();
        std::fs::write(&hook, "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();

        let source = tmp.path().join("archive");
        std::fs::create_dir_all(source.join("markets/2025/01")).unwrap();
        std::fs::write(source.join("markets/2025/01/market_1.json"), "{}").unwrap();

        let work = tmp.path().join("work");
        let publisher = GitPublisher::new(remotes.to_string_lossy(), "main", &work, "COUNTS.json")
            .with_token("ghp_secret");
        let files = vec!["markets/2025/01/market_1.json".to_string()];

        let err = publisher.publish("Data_2025", &source, &files).await.unwrap_err();
        assert!(matches!(err, PublishError::Command { .. }));
        assert!(!err.to_string().contains("ghp_secret"));
        assert!(!work.join("Data_2025").exists());
    }
}
