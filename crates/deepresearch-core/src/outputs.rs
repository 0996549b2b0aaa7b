//! Collection and upload of files produced by a research session.
//!
//! The agent writes intermediate source documents into
//! `research_documents_{topic}/` directories and final artifacts at the top of
//! the working directory. After each invocation those files are copied into
//! object storage under a session-scoped prefix:
//!
//! ```text
//! {session_id}/intermediate/{topic}/{filename}
//! {session_id}/final/{filename}
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::DeepResearchError;
use crate::metrics;

pub const RESEARCH_DOCUMENTS_PREFIX: &str = "research_documents_";
pub const FINDINGS_PREFIX: &str = "research_findings_";
pub const REPORT_MARKER: &str = "_report";

const TEXT_EXTENSIONS: [&str; 2] = ["md", "txt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Intermediate,
    Final,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Intermediate => "intermediate",
            OutputKind::Final => "final",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputKind {
    type Err = DeepResearchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "intermediate" => Ok(OutputKind::Intermediate),
            "final" => Ok(OutputKind::Final),
            other => Err(DeepResearchError::InvalidConfiguration(format!(
                "unknown output type '{other}' (expected final or intermediate)"
            ))),
        }
    }
}

/// Files found in a working directory, split by category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedOutputs {
    pub intermediate: Vec<PathBuf>,
    pub finals: Vec<PathBuf>,
}

impl CollectedOutputs {
    pub fn len(&self) -> usize {
        self.intermediate.len() + self.finals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn has_text_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext))
}

/// Whether a top-level directory name holds intermediate documents.
pub fn is_research_documents_dir(name: &str) -> bool {
    name.starts_with(RESEARCH_DOCUMENTS_PREFIX)
}

/// Whether a top-level file is a final artifact.
pub fn is_final_artifact(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    name.starts_with(FINDINGS_PREFIX) || (name.contains(REPORT_MARKER) && has_text_extension(path))
}

/// Topic of an intermediate document, taken from its parent directory name.
pub fn topic_of(path: &Path) -> Option<&str> {
    path.parent()
        .and_then(|dir| dir.file_name())
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix(RESEARCH_DOCUMENTS_PREFIX))
}

fn immediate_entries(dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
}

/// Scan `working_dir` for output files. A missing directory yields nothing.
pub fn collect_output_files(working_dir: &Path) -> CollectedOutputs {
    let mut collected = CollectedOutputs::default();

    for entry in immediate_entries(working_dir) {
        let path = entry.path();
        if entry.file_type().is_dir() {
            let is_documents_dir = entry
                .file_name()
                .to_str()
                .is_some_and(is_research_documents_dir);
            if is_documents_dir {
                collected.intermediate.extend(
                    immediate_entries(path)
                        .filter(|doc| doc.file_type().is_file() && has_text_extension(doc.path()))
                        .map(walkdir::DirEntry::into_path),
                );
            }
        } else if entry.file_type().is_file() && is_final_artifact(path) {
            collected.finals.push(path.to_path_buf());
        }
    }

    collected.intermediate.sort();
    collected.finals.sort();
    collected
}

/// Destination key for one output file.
pub fn object_key(session_id: &str, kind: OutputKind, topic: Option<&str>, filename: &str) -> String {
    match topic {
        Some(topic) => format!("{session_id}/{kind}/{topic}/{filename}"),
        None => format!("{session_id}/{kind}/{filename}"),
    }
}

pub fn object_uri(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{key}")
}

pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("md") => "text/markdown",
        _ => "text/plain",
    }
}

/// Destination storage for output files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), DeepResearchError>;
}

pub type DynObjectStore = Arc<dyn ObjectStore>;

/// Mirrors object storage on the local filesystem as `{root}/{bucket}/{key}`.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        _content_type: &str,
    ) -> Result<(), DeepResearchError> {
        let destination = self.root.join(bucket).join(key);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| DeepResearchError::io(parent, err))?;
        }
        tokio::fs::copy(path, &destination)
            .await
            .map_err(|err| DeepResearchError::io(path, err))?;
        Ok(())
    }
}

#[cfg(feature = "aws")]
pub use s3_store::S3ObjectStore;

#[cfg(feature = "aws")]
mod s3_store {
    use super::*;
    use aws_sdk_s3::Client;
    use aws_sdk_s3::error::DisplayErrorContext;
    use aws_sdk_s3::primitives::ByteStream;

    pub struct S3ObjectStore {
        client: Client,
    }

    impl S3ObjectStore {
        pub async fn new(region: Option<String>) -> Self {
            let config = crate::aws::sdk_config(region).await;
            Self {
                client: Client::new(&config),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for S3ObjectStore {
        async fn put_file(
            &self,
            bucket: &str,
            key: &str,
            path: &Path,
            content_type: &str,
        ) -> Result<(), DeepResearchError> {
            let body = ByteStream::from_path(path)
                .await
                .map_err(|err| DeepResearchError::upload(key, err))?;
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .content_type(content_type)
                .body(body)
                .send()
                .await
                .map_err(|err| DeepResearchError::upload(key, DisplayErrorContext(err)))?;
            Ok(())
        }
    }
}

/// Which object store backs output uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputStoreChoice {
    #[cfg(feature = "aws")]
    S3,
    Filesystem { root: PathBuf },
}

pub async fn build_object_store(choice: &OutputStoreChoice, region: Option<String>) -> DynObjectStore {
    match choice {
        #[cfg(feature = "aws")]
        OutputStoreChoice::S3 => Arc::new(S3ObjectStore::new(region).await),
        OutputStoreChoice::Filesystem { root } => {
            let _ = region;
            Arc::new(FilesystemObjectStore::new(root.clone()))
        }
    }
}

/// Result of uploading one session's outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    /// `s3://bucket/key` URIs of the stored objects.
    pub uploaded: Vec<String>,
    /// Local paths of files that could not be stored.
    pub failed: Vec<String>,
}

/// Uploads session outputs into a single bucket.
#[derive(Clone)]
pub struct OutputUploader {
    store: DynObjectStore,
    bucket: Option<String>,
}

impl fmt::Debug for OutputUploader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputUploader")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl OutputUploader {
    pub fn new(store: DynObjectStore, bucket: Option<String>) -> Self {
        Self {
            store,
            bucket: bucket.filter(|name| !name.trim().is_empty()),
        }
    }

    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// Upload every collected output of `working_dir` under `session_id`.
    ///
    /// Each file is attempted independently; failures are reported, never raised.
    pub async fn upload_session_outputs(&self, session_id: &str, working_dir: &Path) -> UploadReport {
        let mut report = UploadReport::default();
        let Some(bucket) = self.bucket.as_deref() else {
            warn!("OUTPUTS_BUCKET_NAME not set; skipping output upload");
            return report;
        };

        let collected = collect_output_files(working_dir);
        if collected.is_empty() {
            info!(session_id, dir = %working_dir.display(), "no output files to upload");
            return report;
        }

        let intermediate = collected
            .intermediate
            .iter()
            .map(|path| (path, OutputKind::Intermediate, topic_of(path)));
        let finals = collected
            .finals
            .iter()
            .map(|path| (path, OutputKind::Final, None));

        for (path, kind, topic) in intermediate.chain(finals) {
            let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
                report.failed.push(path.display().to_string());
                continue;
            };
            let key = object_key(session_id, kind, topic, filename);
            match self.put(bucket, &key, path, kind).await {
                Some(uri) => report.uploaded.push(uri),
                None => report.failed.push(path.display().to_string()),
            }
        }

        info!(
            session_id,
            bucket,
            uploaded = report.uploaded.len(),
            failed = report.failed.len(),
            "output upload finished"
        );
        report
    }

    /// Upload one file to `{session}/{kind}/{filename}`.
    pub async fn upload_single_file(
        &self,
        session_id: &str,
        path: &Path,
        kind: OutputKind,
    ) -> Option<String> {
        let Some(bucket) = self.bucket.as_deref() else {
            warn!("OUTPUTS_BUCKET_NAME not set; skipping upload");
            return None;
        };
        if !path.is_file() {
            error!(path = %path.display(), "file not found; nothing to upload");
            return None;
        }
        let filename = path.file_name()?.to_str()?;
        let key = object_key(session_id, kind, None, filename);
        self.put(bucket, &key, path, kind).await
    }

    async fn put(&self, bucket: &str, key: &str, path: &Path, kind: OutputKind) -> Option<String> {
        let content_type = content_type_for(path);
        match self.store.put_file(bucket, key, path, content_type).await {
            Ok(()) => {
                metrics::record_upload(kind.as_str(), true);
                let uri = object_uri(bucket, key);
                info!(%uri, kind = kind.as_str(), "uploaded output file");
                Some(uri)
            }
            Err(err) => {
                metrics::record_upload(kind.as_str(), false);
                error!(error = %err, bucket, key, "failed to upload output file");
                None
            }
        }
    }
}
