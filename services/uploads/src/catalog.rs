use crate::config::S3Config;
use crate::error::UploadResult;
use crate::keys::{derive_artifact_keys, DerivedArtifactKeys};
use crate::metadata_store::FileRecord;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Read side of the metadata store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileCatalog: Send + Sync {
    /// Every recorded file, unfiltered and unpaginated
    async fn list_files(&self) -> UploadResult<Vec<FileRecord>>;

    /// Cheap connectivity check
    async fn ping(&self) -> UploadResult<()>;
}

/// Links to the processed artifacts of one upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactLinks {
    pub file_name: String,
    #[serde(flatten)]
    pub keys: DerivedArtifactKeys,
    pub metadata_url: String,
    pub content_url: String,
}

/// Catalog reader over any [`FileCatalog`]
#[derive(Clone)]
pub struct Catalog {
    files: Arc<dyn FileCatalog>,
    s3: S3Config,
}

impl Catalog {
    pub fn new(files: Arc<dyn FileCatalog>, s3: S3Config) -> Self {
        Self { files, s3 }
    }

    /// All recorded files; a straight pass-through
    pub async fn list(&self) -> UploadResult<Vec<FileRecord>> {
        self.files.list_files().await
    }

    pub async fn ping(&self) -> UploadResult<()> {
        self.files.ping().await
    }

    /// Artifact links for a recorded file
    pub fn artifacts_for(&self, record: &FileRecord) -> ArtifactLinks {
        self.artifacts_for_name(&record.file_name)
    }

    /// Artifact links by stored file name. Existence is not checked.
    pub fn artifacts_for_name(&self, file_name: &str) -> ArtifactLinks {
        let keys = derive_artifact_keys(file_name);

        ArtifactLinks {
            file_name: file_name.to_string(),
            metadata_url: self.s3.object_url(&self.s3.output_bucket, &keys.metadata_key),
            content_url: self.s3.object_url(&self.s3.output_bucket, &keys.content_key),
            keys,
        }
    }
}
