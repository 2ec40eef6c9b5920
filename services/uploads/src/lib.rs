//! Upload Service
//!
//! Coordinates direct-to-S3 spreadsheet uploads through short-lived presigned
//! URLs and records each completed upload in PostgreSQL. Processed artifacts
//! produced out-of-band are located by naming convention from the stored file
//! name.
//!
//! ## Upload protocol
//!
//! For every file, strictly in this order:
//!
//! 1. **Credential**: a write URL scoped to one freshly named key, valid 60s
//! 2. **Transfer**: the bytes are PUT straight to storage with that URL
//! 3. **Record**: one `files` row is inserted, carrying the unsigned URL
//!
//! A failure at any step marks that file failed and moves on to the next.
//!
//! ## Architecture
//!
//! ```text
//!  Client / CLI                     Upload API                    PostgreSQL
//! ┌──────────────┐  credential   ┌──────────────┐              ┌──────────────┐
//! │ Upload       │──────────────▶│ Credential   │              │ files        │
//! │ Coordinator  │               │ Issuer       │              └──────────────┘
//! └──────────────┘               └──────────────┘                     ▲
//!        │  PUT bytes                                                 │
//!        ▼                                                            │
//! ┌──────────────┐    record     ┌──────────────┐                     │
//! │ S3 bucket    │  ┌───────────▶│ Metadata     │─────────────────────┘
//! └──────────────┘  │            │ Store        │
//!                   │            └──────────────┘
//!        Coordinator┘                   │
//!                                       ▼
//!                                ┌──────────────┐
//!                                │ Catalog      │──▶ processed/{base}.csv
//!                                │ Reader       │──▶ processed/{base}_metadata.json
//!                                └──────────────┘
//! ```

pub mod api;
pub mod catalog;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod keys;
pub mod metadata_store;
pub mod transfer;

pub use api::{AppState, CredentialResponse};
pub use catalog::{ArtifactLinks, Catalog, FileCatalog};
pub use client::ApiClient;
pub use config::{ClientConfig, Config};
pub use coordinator::{
    BatchReport, CoordinatorConfig, FileOutcome, FileState, UploadBatch, UploadCoordinator,
};
pub use credentials::{
    CredentialIssuer, CredentialRequest, Operation, S3CredentialIssuer, SignedUrl,
};
pub use error::{UploadError, UploadResult};
pub use keys::{derive_artifact_keys, make_storage_key, DerivedArtifactKeys};
pub use metadata_store::{FileRecord, MetadataRecorder, MetadataStore, NewFileRecord};
pub use transfer::{FileUpload, HttpTransferExecutor, TransferExecutor};
