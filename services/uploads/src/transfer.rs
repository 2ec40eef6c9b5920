use crate::credentials::{Operation, SignedUrl};
use crate::error::{UploadError, UploadResult};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, instrument};

/// A file selected for upload, as the client sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Client-side file name
    pub name: String,
    /// MIME type reported by the client
    pub content_type: String,
    pub bytes: Bytes,
}

impl FileUpload {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Performs the byte transfer authorized by a write credential
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Upload `file` to the object named by `credential`. No retries.
    async fn put(&self, credential: &SignedUrl, file: &FileUpload) -> UploadResult<()>;
}

/// Uploads with an HTTP PUT to the signed URL
pub struct HttpTransferExecutor {
    http: reqwest::Client,
}

impl HttpTransferExecutor {
    /// `timeout` should not outlive the credential window
    pub fn new(timeout: Duration) -> UploadResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploadError::Transfer(e.to_string()))?;

        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TransferExecutor for HttpTransferExecutor {
    #[instrument(skip(self, credential, file), fields(key = %credential.key, size_bytes = file.size()))]
    async fn put(&self, credential: &SignedUrl, file: &FileUpload) -> UploadResult<()> {
        ensure_writable(credential)?;

        let response = self
            .http
            .put(&credential.url)
            .header(CONTENT_TYPE, &file.content_type)
            .body(file.bytes.clone())
            .send()
            .await
            .map_err(|e| UploadError::Transfer(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Transfer(format!(
                "storage responded {}: {}",
                status,
                body.trim()
            )));
        }

        debug!(status = %status, "Transfer completed");
        Ok(())
    }
}

/// A transfer needs an unexpired write credential
pub fn ensure_writable(credential: &SignedUrl) -> UploadResult<()> {
    if credential.operation != Operation::Write {
        return Err(UploadError::Transfer(format!(
            "credential for {} authorizes {}, not write",
            credential.key, credential.operation
        )));
    }

    if credential.is_expired() {
        return Err(UploadError::Transfer(format!(
            "credential for {} expired at {}",
            credential.key, credential.expires_at
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn credential(operation: Operation, expires_in_secs: i64) -> SignedUrl {
        SignedUrl {
            url: "http://127.0.0.1:9/bucket/deal-1.xlsx?X-Amz-Signature=aa".to_string(),
            operation,
            key: "deal-1.xlsx".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
        }
    }

    #[test]
    fn test_read_credential_cannot_write() {
        let err = ensure_writable(&credential(Operation::Read, 60)).unwrap_err();
        assert!(matches!(err, UploadError::Transfer(_)));
    }

    #[test]
    fn test_expired_credential_rejected() {
        let err = ensure_writable(&credential(Operation::Write, -1)).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_file_upload_size() {
        let file = FileUpload::new("deal.csv", "text/csv", b"a,b\n1,2\n".to_vec());
        assert_eq!(file.size(), 8);
    }

    #[tokio::test]
    async fn test_unreachable_storage_is_transfer_error() {
        let executor = HttpTransferExecutor::new(Duration::from_secs(2)).unwrap();
        let file = FileUpload::new("deal.csv", "text/csv", b"a,b\n".to_vec());

        let result = executor.put(&credential(Operation::Write, 60), &file).await;
        assert!(matches!(result, Err(UploadError::Transfer(_))));
    }

    #[tokio::test]
    async fn test_put_sends_bytes_and_content_type() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
                if n == 0 || received.ends_with(b"a,b\n") {
                    break;
                }
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&received).to_string()
        });

        let mut signed = credential(Operation::Write, 60);
        signed.url = format!("http://{}/bucket/deal-1.xlsx?X-Amz-Signature=aa", addr);

        let executor = HttpTransferExecutor::new(Duration::from_secs(5)).unwrap();
        let file = FileUpload::new("deal.csv", "text/csv", b"a,b\n".to_vec());
        executor.put(&signed, &file).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("PUT /bucket/deal-1.xlsx?X-Amz-Signature=aa"));
        assert!(request.to_lowercase().contains("content-type: text/csv"));
    }
}
