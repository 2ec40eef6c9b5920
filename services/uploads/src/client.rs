//! HTTP client for the upload API.
//!
//! Lets the coordinator run away from the server, the way a browser drives
//! the same three calls: ask for a write credential, PUT the bytes straight
//! to storage, then post the metadata.

use crate::api::{CredentialResponse, ErrorResponse};
use crate::catalog::FileCatalog;
use crate::credentials::{CredentialIssuer, CredentialRequest, Operation, SignedUrl};
use crate::error::{UploadError, UploadResult};
use crate::metadata_store::{FileRecord, MetadataRecorder, NewFileRecord};
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};

/// Client of `POST /files/credential`, `GET /files/credential`, `POST /files`
/// and `GET /files`
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> UploadResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploadError::CredentialIssuance(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Pull the server's error message out of a failed response
async fn error_message(response: Response) -> String {
    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(body) => format!("{} ({})", body.error, status),
        Err(_) => status.to_string(),
    }
}

#[async_trait]
impl CredentialIssuer for ApiClient {
    #[instrument(skip(self), fields(operation = %request.operation, key = %request.key))]
    async fn issue(&self, request: &CredentialRequest) -> UploadResult<SignedUrl> {
        request.validate()?;

        let pending = match request.operation {
            Operation::Write => self.http.post(self.url("/files/credential")).json(&json!({
                "filename": request.key,
                "contentType": request.content_type,
            })),
            Operation::Read => self
                .http
                .get(self.url("/files/credential"))
                .query(&[("key", request.key.as_str()), ("op", "read")]),
        };

        let response = pending
            .send()
            .await
            .map_err(|e| UploadError::CredentialIssuance(e.to_string()))?;

        if !response.status().is_success() {
            return Err(UploadError::CredentialIssuance(error_message(response).await));
        }

        let body: CredentialResponse = response
            .json()
            .await
            .map_err(|e| UploadError::CredentialIssuance(e.to_string()))?;

        debug!(expires_at = %body.expires_at, "Credential received");

        Ok(SignedUrl {
            url: body.url,
            operation: request.operation,
            key: request.key.clone(),
            expires_at: body.expires_at,
        })
    }
}

#[async_trait]
impl MetadataRecorder for ApiClient {
    #[instrument(skip(self, file), fields(file_name = %file.file_name))]
    async fn record(&self, file: &NewFileRecord) -> UploadResult<FileRecord> {
        let response = self
            .http
            .post(self.url("/files"))
            .json(&file.canonicalized())
            .send()
            .await
            .map_err(|e| UploadError::Persistence(e.to_string()))?;

        if response.status() != StatusCode::CREATED {
            return Err(UploadError::Persistence(error_message(response).await));
        }

        response
            .json()
            .await
            .map_err(|e| UploadError::Persistence(e.to_string()))
    }
}

#[async_trait]
impl FileCatalog for ApiClient {
    async fn list_files(&self) -> UploadResult<Vec<FileRecord>> {
        let response = self
            .http
            .get(self.url("/files"))
            .send()
            .await
            .map_err(|e| UploadError::Catalog(e.to_string()))?;

        if !response.status().is_success() {
            return Err(UploadError::Catalog(error_message(response).await));
        }

        response
            .json()
            .await
            .map_err(|e| UploadError::Catalog(e.to_string()))
    }

    async fn ping(&self) -> UploadResult<()> {
        let response = self
            .http
            .get(self.url("/ready"))
            .send()
            .await
            .map_err(|e| UploadError::Catalog(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(UploadError::Catalog(error_message(response).await))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let client = ApiClient::new("http://localhost:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.url("/files"), "http://localhost:8080/files");
    }

    #[tokio::test]
    async fn test_invalid_request_not_sent() {
        let client = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let result = client
            .issue(&CredentialRequest::write("deal-1.xlsx", ""))
            .await;
        assert_eq!(result, Err(UploadError::missing("contentType")));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_credential_failure() {
        let client = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let result = client
            .issue(&CredentialRequest::write("deal-1.xlsx", "text/csv"))
            .await;
        assert!(matches!(result, Err(UploadError::CredentialIssuance(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_persistence_failure() {
        let client = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let file = NewFileRecord {
            user_id: "123".to_string(),
            file_name: "deal-1.xlsx".to_string(),
            s3_bucket: "chatbook-2023".to_string(),
            s3_key: "deal-1.xlsx".to_string(),
            s3_url: "https://chatbook-2023.s3.amazonaws.com/deal-1.xlsx".to_string(),
            content_type: "text/csv".to_string(),
        };
        let result = client.record(&file).await;
        assert!(matches!(result, Err(UploadError::Persistence(_))));
    }
}
