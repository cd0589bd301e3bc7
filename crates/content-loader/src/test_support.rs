use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use reqwest::{Request, Response};

use crate::rest::{FailedResponse, Interceptor, Next, RestError};
use crate::source::{SourceContent, SourceError};

/// Interceptor that records `METHOD /path?query` for every request it sees,
/// then passes it on unchanged.
#[derive(Default)]
pub struct RecordingInterceptor {
    seen: Mutex<Vec<String>>,
}

impl RecordingInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Interceptor for RecordingInterceptor {
    async fn intercept(&self, request: Request, next: Next<'_>) -> Result<Response, RestError> {
        let url = request.url();
        let line = match url.query() {
            Some(query) => format!("{} {}?{}", request.method(), url.path(), query),
            None => format!("{} {}", request.method(), url.path()),
        };
        self.seen.lock().unwrap().push(line);
        next.run(request).await
    }
}

/// Interceptor that never reaches the network: every request fails with the
/// given status.
pub struct RejectingInterceptor {
    status_code: u16,
}

impl RejectingInterceptor {
    pub fn new(status_code: u16) -> Self {
        Self { status_code }
    }
}

#[async_trait::async_trait]
impl Interceptor for RejectingInterceptor {
    async fn intercept(&self, _request: Request, _next: Next<'_>) -> Result<Response, RestError> {
        Err(RestError::FailedResponse(FailedResponse {
            status_code: self.status_code,
            status: self.status_code.to_string(),
            content_type: None,
            body: Vec::new(),
        }))
    }
}

/// Write `(relative path, contents)` pairs under `root`, creating directories.
pub fn write_content_tree(root: &Path, files: &[(&str, &str)]) {
    for (relative, contents) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
    }
}

/// A temporary content tree populated with `files`.
pub fn content_tree(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_content_tree(dir.path(), files);
    dir
}

/// Source content backed by a fixed directory that counts its cleanups.
///
/// Preparing fails with [`SourceError::NotFound`] once the directory is gone.
pub struct StaticSourceContent {
    dir: PathBuf,
    cleanups: Arc<AtomicUsize>,
}

impl StaticSourceContent {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cleanups: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter, still readable after the source has been moved away.
    pub fn cleanup_counter(&self) -> Arc<AtomicUsize> {
        self.cleanups.clone()
    }
}

#[async_trait::async_trait]
impl SourceContent for StaticSourceContent {
    fn label(&self) -> &str {
        "static"
    }

    async fn prepare(&mut self) -> Result<PathBuf, SourceError> {
        if !self.dir.is_dir() {
            return Err(SourceError::NotFound(self.dir.clone()));
        }
        Ok(self.dir.clone())
    }

    fn cleanup(&mut self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}
