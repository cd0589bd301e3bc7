use std::fmt;
use std::str::FromStr;

use content_loader::SourceError;

/// Only repositories on this host can be fetched as tarballs.
pub const GITHUB_HOST: &str = "github.com";

/// A GitHub repository named by its clone URL.
///
/// Accepts `https://github.com/<owner>/<repo>[.git]` and
/// `git@github.com:<owner>/<repo>[.git]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoUrl {
    pub owner: String,
    pub repo: String,
}

impl RepoUrl {
    pub fn parse(url: &str) -> Result<Self, SourceError> {
        let invalid = || SourceError::InvalidLocation(format!("not a repository URL: {url}"));

        let (host, path) = if let Some(rest) = url.strip_prefix("git@") {
            rest.split_once(':').ok_or_else(invalid)?
        } else {
            let rest = url
                .strip_prefix("https://")
                .or_else(|| url.strip_prefix("http://"))
                .ok_or_else(invalid)?;
            rest.split_once('/').ok_or_else(invalid)?
        };

        if !host.eq_ignore_ascii_case(GITHUB_HOST) {
            return Err(SourceError::InvalidLocation(format!(
                "unsupported repository host `{host}` in {url}, only {GITHUB_HOST} is supported"
            )));
        }

        let path = path.trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let (owner, repo) = path.split_once('/').ok_or_else(invalid)?;

        let valid = |part: &str| !part.is_empty() && !part.contains('/');
        if !valid(owner) || !valid(repo) {
            return Err(invalid());
        }

        Ok(Self {
            owner: owner.to_owned(),
            repo: repo.to_owned(),
        })
    }
}

impl FromStr for RepoUrl {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RepoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}
