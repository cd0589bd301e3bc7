use std::path::{Path, PathBuf};

/// Errors that can occur while making source content available on disk.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("content directory not found: {0}")]
    NotFound(PathBuf),

    #[error("network error: {0}")]
    Network(String),

    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid source location: {0}")]
    InvalidLocation(String),
}

/// Content that can be made available as a directory tree on local disk.
///
/// The loader only reads from the returned path. Callers pair every
/// successful `prepare` with a `cleanup`.
#[async_trait::async_trait]
pub trait SourceContent: Send {
    /// Human-readable label identifying this source.
    fn label(&self) -> &str;

    /// Materialise the content and return its root directory.
    async fn prepare(&mut self) -> Result<PathBuf, SourceError>;

    /// Release anything `prepare` acquired.
    fn cleanup(&mut self);
}

/// Content that already lives in a local directory.
pub struct DirSourceContent {
    dir: PathBuf,
    label: String,
}

impl DirSourceContent {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let label = dir.display().to_string();
        Self { dir, label }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait::async_trait]
impl SourceContent for DirSourceContent {
    fn label(&self) -> &str {
        &self.label
    }

    async fn prepare(&mut self) -> Result<PathBuf, SourceError> {
        if !self.dir.is_dir() {
            return Err(SourceError::NotFound(self.dir.clone()));
        }
        tracing::info!(dir = %self.dir.display(), "using source content from local directory");
        Ok(self.dir.clone())
    }

    fn cleanup(&mut self) {}
}
