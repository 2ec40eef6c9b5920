//! Upload coordination.
//!
//! Each file in a batch moves through
//!
//! ```text
//! Pending ──▶ CredentialIssued ──▶ Transferred ──▶ Recorded
//!    │               │                  │
//!    └───────────────┴──────────────────┴──────▶ Failed
//! ```
//!
//! Files are processed one after another. A failed file never stops its
//! siblings and never rolls back files already recorded. A metadata failure
//! after a successful transfer leaves the object in storage without a record;
//! no compensating delete is attempted.

use crate::credentials::{CredentialIssuer, CredentialRequest};
use crate::error::{UploadError, UploadResult};
use crate::keys::make_storage_key;
use crate::metadata_store::{FileRecord, MetadataRecorder, NewFileRecord};
use crate::transfer::{FileUpload, TransferExecutor};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Per-file upload state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Pending,
    CredentialIssued,
    Transferred,
    Recorded,
    Failed,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileState::Pending => "pending",
            FileState::CredentialIssued => "credential_issued",
            FileState::Transferred => "transferred",
            FileState::Recorded => "recorded",
            FileState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of one file's trip through the coordinator
#[derive(Debug, Clone)]
pub struct FileOutcome {
    /// Client-side name
    pub original_name: String,
    pub storage_key: String,
    pub state: FileState,
    /// State the file was in when its step failed
    pub failed_at: Option<FileState>,
    pub record: Option<FileRecord>,
    pub error: Option<UploadError>,
}

impl FileOutcome {
    fn pending(original_name: &str, storage_key: String) -> Self {
        Self {
            original_name: original_name.to_string(),
            storage_key,
            state: FileState::Pending,
            failed_at: None,
            record: None,
            error: None,
        }
    }

    fn advance(&mut self, state: FileState) {
        self.state = state;
    }

    fn fail(mut self, error: UploadError) -> Self {
        warn!(
            file = %self.original_name,
            storage_key = %self.storage_key,
            failed_at = %self.state,
            error = %error,
            "File upload failed"
        );
        metrics::counter!("uploads.files.failed").increment(1);

        self.failed_at = Some(self.state);
        self.state = FileState::Failed;
        self.error = Some(error);
        self
    }

    fn recorded(mut self, record: FileRecord) -> Self {
        metrics::counter!("uploads.files.recorded").increment(1);

        self.state = FileState::Recorded;
        self.record = Some(record);
        self
    }

    pub fn is_recorded(&self) -> bool {
        self.state == FileState::Recorded
    }
}

/// Caller-owned batch state: files waiting to upload and files uploaded so far
#[derive(Debug, Clone, Default)]
pub struct UploadBatch {
    pending: Vec<FileUpload>,
    uploaded: Vec<FileRecord>,
}

impl UploadBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a file for the next run
    pub fn add(&mut self, file: FileUpload) {
        self.pending.push(file);
    }

    pub fn extend(&mut self, files: impl IntoIterator<Item = FileUpload>) {
        self.pending.extend(files);
    }

    pub fn pending(&self) -> &[FileUpload] {
        &self.pending
    }

    /// Records created across every run of this batch, in completion order
    pub fn uploaded(&self) -> &[FileRecord] {
        &self.uploaded
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Outcome of one coordinator run
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// One entry per file, in submission order
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn recorded(&self) -> impl Iterator<Item = &FileRecord> {
        self.outcomes.iter().filter_map(|o| o.record.as_ref())
    }

    pub fn recorded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_recorded()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.recorded_count()
    }

    /// Aggregate failure indicator
    pub fn has_failures(&self) -> bool {
        self.failed_count() > 0
    }
}

/// Identity recorded with every file
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub user_id: String,
    /// Bucket the issuer signs for
    pub bucket: String,
}

/// Drives credential → transfer → record for each file of a batch
pub struct UploadCoordinator {
    issuer: Arc<dyn CredentialIssuer>,
    executor: Arc<dyn TransferExecutor>,
    recorder: Arc<dyn MetadataRecorder>,
    config: CoordinatorConfig,
}

impl UploadCoordinator {
    pub fn new(
        issuer: Arc<dyn CredentialIssuer>,
        executor: Arc<dyn TransferExecutor>,
        recorder: Arc<dyn MetadataRecorder>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            issuer,
            executor,
            recorder,
            config,
        }
    }

    /// Upload every pending file of `batch`, in order.
    ///
    /// `on_recorded` fires as soon as each file reaches `Recorded`. Pending
    /// files are drained whether they succeed or fail.
    #[instrument(skip_all, fields(files = batch.pending.len(), user_id = %self.config.user_id))]
    pub async fn run<F>(&self, batch: &mut UploadBatch, mut on_recorded: F) -> BatchReport
    where
        F: FnMut(&FileRecord) + Send,
    {
        let files = std::mem::take(&mut batch.pending);
        let mut report = BatchReport {
            outcomes: Vec::with_capacity(files.len()),
        };

        for file in &files {
            let outcome = self.upload_file(file).await;

            if let Some(ref record) = outcome.record {
                on_recorded(record);
                batch.uploaded.push(record.clone());
            }

            report.outcomes.push(outcome);
        }

        if report.has_failures() {
            warn!(
                recorded = report.recorded_count(),
                failed = report.failed_count(),
                "Upload batch finished with failures"
            );
        } else {
            info!(recorded = report.recorded_count(), "Upload batch finished");
        }

        report
    }

    /// Run one file to `Recorded` or `Failed`
    pub async fn upload_file(&self, file: &FileUpload) -> FileOutcome {
        let storage_key = make_storage_key(&file.name);
        let mut outcome = FileOutcome::pending(&file.name, storage_key.clone());

        let request = CredentialRequest::write(&storage_key, &file.content_type);
        if let Err(e) = validate_upload(file).and_then(|_| request.validate()) {
            return outcome.fail(e);
        }

        let credential = match self.issuer.issue(&request).await {
            Ok(credential) => credential,
            Err(e) => return outcome.fail(e),
        };
        outcome.advance(FileState::CredentialIssued);

        if let Err(e) = self.executor.put(&credential, file).await {
            return outcome.fail(e);
        }
        outcome.advance(FileState::Transferred);

        let new_record = NewFileRecord {
            user_id: self.config.user_id.clone(),
            file_name: storage_key.clone(),
            s3_bucket: self.config.bucket.clone(),
            s3_key: storage_key,
            s3_url: credential.canonical_url().to_string(),
            content_type: file.content_type.clone(),
        };

        match self.recorder.record(&new_record).await {
            Ok(record) => {
                info!(
                    id = record.id,
                    file = %file.name,
                    storage_key = %record.s3_key,
                    "File recorded"
                );
                outcome.recorded(record)
            }
            Err(e) => outcome.fail(e),
        }
    }
}

fn validate_upload(file: &FileUpload) -> UploadResult<()> {
    if file.name.trim().is_empty() {
        return Err(UploadError::missing("filename"));
    }
    Ok(())
}
