use std::path::PathBuf;

use content_loader::{SourceContent, SourceError};
use tempfile::TempDir;

use crate::repo_url::RepoUrl;
use crate::tarball::TarballClient;

/// Ref used when none is given: the repository's default branch.
pub const DEFAULT_REF: &str = "HEAD";

/// Content taken from a snapshot of a GitHub repository.
///
/// `prepare` unpacks the tarball at the requested ref into a fresh temporary
/// directory; `cleanup` (or drop) removes it.
pub struct GitHubSourceContent {
    repo: RepoUrl,
    git_ref: String,
    label: String,
    client: TarballClient,
    workdir: Option<TempDir>,
}

impl GitHubSourceContent {
    pub fn new(repository_url: &str) -> Result<Self, SourceError> {
        let repo = RepoUrl::parse(repository_url)?;
        Ok(Self {
            label: format!("{repo}@{DEFAULT_REF}"),
            repo,
            git_ref: DEFAULT_REF.to_owned(),
            client: TarballClient::new(None, None),
            workdir: None,
        })
    }

    /// Commit SHA, branch, or tag to check out. Empty keeps the default.
    pub fn with_ref(mut self, git_ref: impl Into<String>) -> Self {
        let git_ref = git_ref.into();
        if !git_ref.is_empty() {
            self.label = format!("{}@{git_ref}", self.repo);
            self.git_ref = git_ref;
        }
        self
    }

    /// Token and API base for the tarball download. `None` for either keeps
    /// anonymous access to `api.github.com`.
    pub fn with_client(mut self, token: Option<String>, api_base_url: Option<String>) -> Self {
        let token = token.filter(|t| !t.is_empty());
        self.client = TarballClient::new(token, api_base_url);
        self
    }

    pub fn repo(&self) -> &RepoUrl {
        &self.repo
    }

    pub fn git_ref(&self) -> &str {
        &self.git_ref
    }
}

#[async_trait::async_trait]
impl SourceContent for GitHubSourceContent {
    fn label(&self) -> &str {
        &self.label
    }

    async fn prepare(&mut self) -> Result<PathBuf, SourceError> {
        self.cleanup();

        let workdir = tempfile::Builder::new()
            .prefix("data-loader-")
            .tempdir()?;

        let files = self
            .client
            .fetch_into(&self.repo.owner, &self.repo.repo, &self.git_ref, workdir.path())
            .await?;

        tracing::info!(
            source = %self.label,
            files,
            dir = %workdir.path().display(),
            "prepared repository content"
        );

        let path = workdir.path().to_path_buf();
        self.workdir = Some(workdir);
        Ok(path)
    }

    fn cleanup(&mut self) {
        if let Some(workdir) = self.workdir.take() {
            let path = workdir.path().to_path_buf();
            if let Err(e) = workdir.close() {
                tracing::warn!(dir = %path.display(), error = %e, "failed to remove content directory");
            }
        }
    }
}
