//! Storage key naming.
//!
//! Every upload is stored under `{stem}-{epoch_millis}.xlsx`, whatever its
//! source extension. The processing pipeline later writes its output under
//! the `processed/` prefix, named after the stored key with its extension
//! removed:
//!
//! ```text
//! report.csv ──▶ report-1700000000000.xlsx ──▶ processed/report-1700000000000.csv
//!                                          └─▶ processed/report-1700000000000_metadata.json
//! ```
//!
//! Two uploads of the same name within the same millisecond produce the same
//! key. That collision is not detected here.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Extension every stored upload is normalized to
pub const CANONICAL_EXTENSION: &str = "xlsx";

/// Namespace the processing pipeline writes derived artifacts under
pub const PROCESSED_PREFIX: &str = "processed";

/// Keys of the artifacts derived from one stored upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedArtifactKeys {
    /// Inferred column types, as JSON
    pub metadata_key: String,
    /// Cleaned content, as CSV
    pub content_key: String,
}

/// Build a unique storage key for a client-side file name using the current clock
pub fn make_storage_key(original_name: &str) -> String {
    make_storage_key_at(original_name, Utc::now().timestamp_millis())
}

/// Build a storage key for `original_name` with an explicit millisecond timestamp
pub fn make_storage_key_at(original_name: &str, epoch_millis: i64) -> String {
    format!(
        "{stem}-{millis}.{ext}",
        stem = strip_extension(original_name),
        millis = epoch_millis,
        ext = CANONICAL_EXTENSION
    )
}

/// Derive the processed artifact keys for a stored file name. Pure, no I/O;
/// the artifacts may not exist yet.
pub fn derive_artifact_keys(stored_file_name: &str) -> DerivedArtifactKeys {
    let base = strip_extension(stored_file_name);

    DerivedArtifactKeys {
        metadata_key: format!("{}/{}_metadata.json", PROCESSED_PREFIX, base),
        content_key: format!("{}/{}.csv", PROCESSED_PREFIX, base),
    }
}

/// Drop the query string (signature, expiry) from a signed URL
pub fn strip_query(url: &str) -> &str {
    match url.find('?') {
        Some(idx) => &url[..idx],
        None => url,
    }
}

/// Everything before the last `.`; names without one are returned whole
fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) => &name[..idx],
        None => name,
    }
}
