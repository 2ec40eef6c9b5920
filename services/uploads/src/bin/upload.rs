//! Upload spreadsheets through a running upload service
//!
//! Each file gets a write credential from the service, is PUT straight to
//! storage, and is then recorded. Exits non-zero if any file failed.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use upload_service::{
    derive_artifact_keys, ApiClient, ClientConfig, CoordinatorConfig, FileUpload,
    HttpTransferExecutor, UploadBatch, UploadCoordinator,
};

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const CSV_CONTENT_TYPE: &str = "text/csv";

#[derive(Parser, Debug)]
#[command(name = "upload")]
#[command(about = "Upload .xlsx and .csv files through the upload service")]
struct Args {
    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Upload service base URL [default: client.api_base_url]
    #[arg(long)]
    api_url: Option<String>,

    /// User to record the uploads under [default: client.user_id]
    #[arg(long)]
    user_id: Option<String>,

    /// Bucket recorded with each file [default: client.bucket]
    #[arg(long)]
    bucket: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Args::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Upload aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    let mut config = ClientConfig::load().context("Failed to load configuration")?;
    if let Some(api_url) = args.api_url {
        config.api_base_url = api_url;
    }
    if let Some(user_id) = args.user_id {
        config.user_id = user_id;
    }
    if let Some(bucket) = args.bucket {
        config.bucket = bucket;
    }

    if config.bucket.trim().is_empty() {
        bail!("No bucket configured; pass --bucket or set UPLOADS__CLIENT__BUCKET");
    }

    let mut batch = UploadBatch::new();
    for path in &args.files {
        batch.add(read_upload(path).await?);
    }

    let client = Arc::new(ApiClient::new(&config.api_base_url, config.request_timeout())?);
    let executor = Arc::new(HttpTransferExecutor::new(config.request_timeout())?);

    let coordinator = UploadCoordinator::new(
        client.clone(),
        executor,
        client,
        CoordinatorConfig {
            user_id: config.user_id.clone(),
            bucket: config.bucket.clone(),
        },
    );

    let report = coordinator
        .run(&mut batch, |record| {
            let artifacts = derive_artifact_keys(&record.file_name);
            println!(
                "{}\t{}\t{}\t{}",
                record.id, record.file_name, artifacts.content_key, artifacts.metadata_key
            );
        })
        .await;

    if report.has_failures() {
        error!(
            recorded = report.recorded_count(),
            failed = report.failed_count(),
            "Upload finished with failures"
        );
        return Ok(false);
    }

    info!(recorded = report.recorded_count(), "Upload successful");
    Ok(true)
}

async fn read_upload(path: &Path) -> Result<FileUpload> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid file name: {}", path.display()))?;

    let content_type = match content_type_for(name) {
        Some(ct) => ct,
        None => bail!("Only .xlsx and .csv files are allowed: {}", path.display()),
    };

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    Ok(FileUpload::new(name, content_type, bytes))
}

fn content_type_for(name: &str) -> Option<&'static str> {
    let extension = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "xlsx" => Some(XLSX_CONTENT_TYPE),
        "csv" => Some(CSV_CONTENT_TYPE),
        _ => None,
    }
}
