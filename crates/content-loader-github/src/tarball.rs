use std::path::{Component, Path, PathBuf};

use content_loader::SourceError;
use flate2::read::GzDecoder;

const DEFAULT_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "salus-data-loader";

/// HTTP client for downloading GitHub repository tarballs.
pub struct TarballClient {
    client: reqwest::Client,
    token: Option<String>,
    api_base_url: Option<String>,
}

impl TarballClient {
    pub fn new(token: Option<String>, api_base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            api_base_url,
        }
    }

    fn api_base(&self) -> &str {
        self.api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
    }

    fn tarball_url(&self, owner: &str, repo: &str, git_ref: &str) -> String {
        format!(
            "{}/repos/{}/{}/tarball/{}",
            self.api_base(),
            owner,
            repo,
            git_ref,
        )
    }

    /// Download the tarball of `owner/repo` at `git_ref` and unpack it into `dest`.
    ///
    /// Returns the number of files written.
    pub async fn fetch_into(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        dest: &Path,
    ) -> Result<usize, SourceError> {
        let url = self.tarball_url(owner, repo, git_ref);
        tracing::debug!(%url, "downloading repository tarball");

        let mut req = self.client.get(&url).header("User-Agent", USER_AGENT);

        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }

        let response = req
            .send()
            .await
            .map_err(|e| SourceError::Network(format!("tarball download failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SourceError::Network(format!(
                "tarball download returned HTTP {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::Network(format!("failed to read tarball body: {e}")))?;

        unpack(&bytes, dest)
    }
}

/// Unpack a gzipped GitHub tarball into `dest`, dropping the
/// `owner-repo-sha/` directory GitHub wraps every entry in.
///
/// Only regular files and directories are written. Entries whose path
/// would land outside `dest` fail the whole unpack.
pub fn unpack(tarball: &[u8], dest: &Path) -> Result<usize, SourceError> {
    let mut archive = tar::Archive::new(GzDecoder::new(tarball));

    let entries = archive
        .entries()
        .map_err(|e| SourceError::Extraction(format!("failed to read tar entries: {e}")))?;

    let mut written = 0;
    for entry_result in entries {
        let mut entry = entry_result
            .map_err(|e| SourceError::Extraction(format!("failed to read tar entry: {e}")))?;

        let entry_type = entry.header().entry_type();
        if !entry_type.is_file() && !entry_type.is_dir() {
            continue;
        }

        let entry_path = entry
            .path()
            .map_err(|e| SourceError::Extraction(format!("invalid path in tar: {e}")))?
            .into_owned();

        let Some(relative) = strip_root(&entry_path)? else {
            continue;
        };
        let target = dest.join(relative);

        if entry_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&target).map_err(|e| {
            SourceError::Extraction(format!("failed to unpack {}: {e}", entry_path.display()))
        })?;
        written += 1;
    }

    tracing::debug!(files = written, dest = %dest.display(), "unpacked tarball");
    Ok(written)
}

/// The entry path below its first component, or `None` for the root itself.
fn strip_root(path: &Path) -> Result<Option<PathBuf>, SourceError> {
    let mut components = path.components();
    components.next();

    let mut relative = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => {
                return Err(SourceError::Extraction(format!(
                    "entry escapes the archive root: {}",
                    path.display()
                )));
            }
        }
    }

    if relative.as_os_str().is_empty() {
        Ok(None)
    } else {
        Ok(Some(relative))
    }
}
