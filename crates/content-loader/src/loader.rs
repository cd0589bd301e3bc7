use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use crate::definition::{ContentTypeDefinition, default_definitions};
use crate::extract::{ExtractError, FieldExtractor};
use crate::rest::{RestClient, RestError};
use crate::tracker::UniquenessTracker;

/// Safety stop for list endpoints that never report their last page.
pub const DEFAULT_MAX_PAGES: usize = 1000;

/// Counters accumulated over a load run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadStatistics {
    pub created: u64,
    pub skipped_existing: u64,
    pub failed_to_create: u64,
}

impl AddAssign for LoadStatistics {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.skipped_existing += other.skipped_existing;
        self.failed_to_create += other.failed_to_create;
    }
}

/// Why a whole definition could not be processed.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("definition `{0}` declares no unique field paths")]
    NoUniqueFields(String),

    #[error("bad unique field path: {0}")]
    InvalidFieldPath(#[source] ExtractError),

    #[error("failed to fetch page {page} of existing content: {source}")]
    FetchPage {
        page: usize,
        #[source]
        source: RestError,
    },

    #[error("no last page after {0} pages")]
    PageLimitExceeded(usize),

    #[error("failed to fingerprint existing entity {index}: {source}")]
    ExistingFingerprint {
        index: usize,
        #[source]
        source: ExtractError,
    },

    #[error("failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A definition that failed outright.
#[derive(Debug)]
pub struct DefinitionFailure {
    pub definition: String,
    pub error: LoadError,
}

/// Outcome of [`Loader::load_all`]: statistics across every definition,
/// plus the definitions that failed.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub stats: LoadStatistics,
    pub failures: Vec<DefinitionFailure>,
}

impl LoadReport {
    /// True when no definition failed. Per-file create failures don't count.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn last_error(&self) -> Option<&DefinitionFailure> {
        self.failures.last()
    }
}

/// One page of a list endpoint.
#[derive(Debug, Deserialize)]
struct PageEnvelope {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default)]
    last: bool,
}

/// Fingerprint every existing entity with the definition's unique fields.
///
/// Fails before touching `entities` when the definition has no unique fields,
/// since every entity would otherwise collapse into the same fingerprint.
pub fn build_index(
    definition: &ContentTypeDefinition,
    entities: &[Value],
) -> Result<UniquenessTracker, LoadError> {
    let extractor = extractor_for(definition)?;
    let mut index = UniquenessTracker::new();
    for (i, entity) in entities.iter().enumerate() {
        let fingerprint = extractor
            .extract(entity)
            .map_err(|source| LoadError::ExistingFingerprint { index: i, source })?;
        index.add(&fingerprint);
    }
    Ok(index)
}

fn extractor_for(definition: &ContentTypeDefinition) -> Result<FieldExtractor, LoadError> {
    if definition.unique_field_paths.is_empty() {
        return Err(LoadError::NoUniqueFields(definition.name.clone()));
    }
    FieldExtractor::new(&definition.unique_field_paths).map_err(LoadError::InvalidFieldPath)
}

/// Creates remote entities for local JSON files that don't exist remotely yet.
///
/// Additive only: nothing is ever updated or deleted. Running it twice over
/// the same content creates nothing the second time.
pub struct Loader {
    client: RestClient,
    definitions: Vec<ContentTypeDefinition>,
    max_pages: usize,
}

impl Loader {
    /// `client` should already carry the admin base URL and any auth interceptor.
    pub fn new(client: RestClient) -> Self {
        Self {
            client,
            definitions: default_definitions(),
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_definitions(mut self, definitions: Vec<ContentTypeDefinition>) -> Self {
        self.definitions = definitions;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn definitions(&self) -> &[ContentTypeDefinition] {
        &self.definitions
    }

    /// Process every definition in order against content under `source_root`.
    ///
    /// A failing definition is recorded and the rest still run.
    pub async fn load_all(&self, source_root: &Path) -> LoadReport {
        let mut report = LoadReport::default();

        for definition in &self.definitions {
            let span = tracing::info_span!("load", definition = %definition.name);
            let mut stats = LoadStatistics::default();

            let result = self
                .load(definition, source_root, &mut stats)
                .instrument(span)
                .await;

            report.stats += stats;
            if let Err(error) = result {
                tracing::error!(
                    definition = %definition.name,
                    error = %error,
                    "failed to process definition"
                );
                report.failures.push(DefinitionFailure {
                    definition: definition.name.clone(),
                    error,
                });
            }
        }

        tracing::info!(
            created = report.stats.created,
            skipped_existing = report.stats.skipped_existing,
            failed_to_create = report.stats.failed_to_create,
            failed_definitions = report.failures.len(),
            "finished loading"
        );
        report
    }

    async fn load(
        &self,
        definition: &ContentTypeDefinition,
        source_root: &Path,
        stats: &mut LoadStatistics,
    ) -> Result<(), LoadError> {
        let extractor = extractor_for(definition)?;

        let content_dir = source_root.join(&definition.name);
        if !content_dir.is_dir() {
            tracing::debug!(dir = %content_dir.display(), "no content directory, skipping");
            return Ok(());
        }

        let existing = self.fetch_existing(definition).await?;
        let index = build_index(definition, &existing)?;
        tracing::info!(
            existing = existing.len(),
            unique = index.len(),
            "loaded existing content"
        );

        let files = json_files(&content_dir)?;
        for file in files {
            self.load_file(definition, &extractor, &index, &file, stats)
                .await;
        }

        Ok(())
    }

    async fn load_file(
        &self,
        definition: &ContentTypeDefinition,
        extractor: &FieldExtractor,
        index: &UniquenessTracker,
        file: &Path,
        stats: &mut LoadStatistics,
    ) {
        let content = match read_json(file) {
            Ok(content) => content,
            Err(reason) => {
                tracing::warn!(file = %file.display(), %reason, "unable to read content file");
                stats.failed_to_create += 1;
                return;
            }
        };

        let fingerprint = match extractor.extract(&content) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "unable to fingerprint content file");
                stats.failed_to_create += 1;
                return;
            }
        };

        if index.contains(&fingerprint) {
            tracing::debug!(file = %file.display(), "content already exists");
            stats.skipped_existing += 1;
            return;
        }

        match self.client.post_json(&definition.api_path, &content).await {
            Ok(()) => {
                tracing::info!(file = %file.display(), "created content");
                stats.created += 1;
            }
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "failed to create content");
                stats.failed_to_create += 1;
            }
        }
    }

    async fn fetch_existing(
        &self,
        definition: &ContentTypeDefinition,
    ) -> Result<Vec<Value>, LoadError> {
        let mut content = Vec::new();

        for page in 0..self.max_pages {
            let envelope: PageEnvelope = self
                .client
                .get_json(&definition.api_path, &[("page", page.to_string())])
                .await
                .map_err(|source| LoadError::FetchPage { page, source })?;

            tracing::debug!(page, count = envelope.content.len(), "fetched page");
            content.extend(envelope.content);

            if envelope.last {
                return Ok(content);
            }
        }

        Err(LoadError::PageLimitExceeded(self.max_pages))
    }
}

fn read_json(file: &Path) -> Result<Value, String> {
    let bytes = std::fs::read(file).map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

/// Every `*.json` file under `dir`, recursively, in lexical path order.
///
/// Symlinked files are read through; symlinked directories are not entered.
fn json_files(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let mut files = Vec::new();
    collect_json_files(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_json_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), LoadError> {
    let walk_err = |source| LoadError::Walk {
        path: dir.to_path_buf(),
        source,
    };

    for entry in std::fs::read_dir(dir).map_err(walk_err)? {
        let entry = entry.map_err(walk_err)?;
        let file_type = entry.file_type().map_err(walk_err)?;
        let path = entry.path();
        if file_type.is_dir() {
            collect_json_files(&path, files)?;
        } else if file_type.is_symlink() && path.is_dir() {
            tracing::debug!(path = %path.display(), "not following directory symlink");
        } else if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    Ok(())
}
