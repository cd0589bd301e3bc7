pub mod repo_url;
pub mod source;
pub mod tarball;

pub use repo_url::RepoUrl;
pub use source::GitHubSourceContent;
pub use tarball::TarballClient;
