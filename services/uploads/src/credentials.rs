use crate::config::S3Config;
use crate::error::{UploadError, UploadResult};
use crate::keys::{strip_query, PROCESSED_PREFIX};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Operation a signed URL authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// `GetObject`
    Read,
    /// `PutObject`
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => f.write_str("read"),
            Operation::Write => f.write_str("write"),
        }
    }
}

/// A request for a single-operation, single-key credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRequest {
    pub operation: Operation,
    pub key: String,
    /// Required for writes; bound into the signature
    pub content_type: Option<String>,
}

impl CredentialRequest {
    pub fn write(key: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            operation: Operation::Write,
            key: key.into(),
            content_type: Some(content_type.into()),
        }
    }

    pub fn read(key: impl Into<String>) -> Self {
        Self {
            operation: Operation::Read,
            key: key.into(),
            content_type: None,
        }
    }

    /// Reject empty keys, and writes without a content type
    pub fn validate(&self) -> UploadResult<()> {
        if self.key.trim().is_empty() {
            return Err(UploadError::missing("key"));
        }

        if self.operation == Operation::Write
            && self
                .content_type
                .as_deref()
                .map_or(true, |ct| ct.trim().is_empty())
        {
            return Err(UploadError::missing("contentType"));
        }

        Ok(())
    }
}

/// A time-boxed authorization for one operation on one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub url: String,
    pub operation: Operation,
    pub key: String,
    pub expires_at: DateTime<Utc>,
}

impl SignedUrl {
    /// The object location without signature parameters
    pub fn canonical_url(&self) -> &str {
        strip_query(&self.url)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Issues signed URLs against the storage backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self, request: &CredentialRequest) -> UploadResult<SignedUrl>;
}

/// Issues presigned S3 URLs
///
/// Writes always land in the upload bucket. Reads of `processed/` keys are
/// signed against the output bucket, where derived artifacts are deposited.
pub struct S3CredentialIssuer {
    client: S3Client,
    bucket: String,
    output_bucket: String,
    expiry: Duration,
}

impl S3CredentialIssuer {
    /// Create a new issuer; fails if no bucket is configured
    pub async fn new(config: &S3Config) -> UploadResult<Self> {
        ensure_bucket(config)?;

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        Self::with_client(S3Client::from_conf(s3_config_builder.build()), config)
    }

    /// Create an issuer around an already configured client
    pub fn with_client(client: S3Client, config: &S3Config) -> UploadResult<Self> {
        ensure_bucket(config)?;

        info!(
            bucket = %config.bucket,
            output_bucket = %config.output_bucket,
            region = %config.region,
            expiry_secs = config.presigned_url_expiry_secs,
            "S3 credential issuer initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            output_bucket: config.output_bucket.clone(),
            expiry: config.presigned_url_expiry(),
        })
    }

    /// Get the upload bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Bucket a request is signed against
    pub fn bucket_for(&self, request: &CredentialRequest) -> &str {
        if request.operation == Operation::Read && is_derived_artifact(&request.key) {
            &self.output_bucket
        } else {
            &self.bucket
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }
}

#[async_trait]
impl CredentialIssuer for S3CredentialIssuer {
    #[instrument(skip(self), fields(operation = %request.operation, key = %request.key))]
    async fn issue(&self, request: &CredentialRequest) -> UploadResult<SignedUrl> {
        request.validate()?;

        let presigning_config = PresigningConfig::expires_in(self.expiry)
            .map_err(|e| UploadError::CredentialIssuance(e.to_string()))?;

        let bucket = self.bucket_for(request);

        let presigned = match request.operation {
            Operation::Write => {
                let mut put = self
                    .client
                    .put_object()
                    .bucket(bucket)
                    .key(&request.key);
                if let Some(ref content_type) = request.content_type {
                    put = put.content_type(content_type);
                }
                put.presigned(presigning_config)
                    .await
                    .map_err(|e| UploadError::CredentialIssuance(e.to_string()))?
            }
            Operation::Read => self
                .client
                .get_object()
                .bucket(bucket)
                .key(&request.key)
                .presigned(presigning_config)
                .await
                .map_err(|e| UploadError::CredentialIssuance(e.to_string()))?,
        };

        let expires_at = Utc::now() + chrono::Duration::seconds(self.expiry.as_secs() as i64);

        debug!(bucket = %bucket, expires_at = %expires_at, "Presigned URL issued");
        metrics::counter!("uploads.credentials.issued").increment(1);

        Ok(SignedUrl {
            url: presigned.uri().to_string(),
            operation: request.operation,
            key: request.key.clone(),
            expires_at,
        })
    }
}

fn ensure_bucket(config: &S3Config) -> UploadResult<()> {
    if config.bucket.trim().is_empty() {
        return Err(UploadError::CredentialIssuance(
            "S3 bucket name is not configured".to_string(),
        ));
    }
    Ok(())
}

fn is_derived_artifact(key: &str) -> bool {
    key.strip_prefix(PROCESSED_PREFIX)
        .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::derive_artifact_keys;
    use aws_sdk_s3::config::{Credentials, Region};

    fn s3_config(bucket: &str) -> S3Config {
        S3Config {
            bucket: bucket.to_string(),
            output_bucket: "keye-output-files".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            presigned_url_expiry_secs: 60,
        }
    }

    #[test]
    fn test_write_request_requires_content_type() {
        let request = CredentialRequest {
            operation: Operation::Write,
            key: "deal-1.xlsx".to_string(),
            content_type: None,
        };
        assert_eq!(request.validate(), Err(UploadError::missing("contentType")));

        let request = CredentialRequest::write("deal-1.xlsx", "  ");
        assert_eq!(request.validate(), Err(UploadError::missing("contentType")));
    }

    #[test]
    fn test_request_requires_key() {
        assert_eq!(
            CredentialRequest::read("").validate(),
            Err(UploadError::missing("key"))
        );
        assert_eq!(
            CredentialRequest::write("", "text/csv").validate(),
            Err(UploadError::missing("key"))
        );
    }

    #[test]
    fn test_read_request_needs_no_content_type() {
        assert!(CredentialRequest::read("processed/deal-1.csv")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_operation_serde() {
        assert_eq!(serde_json::to_string(&Operation::Read).unwrap(), "\"read\"");
        let op: Operation = serde_json::from_str("\"write\"").unwrap();
        assert_eq!(op, Operation::Write);
    }

    #[test]
    fn test_signed_url_canonical() {
        let signed = SignedUrl {
            url: "https://b.s3.amazonaws.com/deal-1.xlsx?X-Amz-Signature=ff".to_string(),
            operation: Operation::Write,
            key: "deal-1.xlsx".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(60),
        };
        assert_eq!(signed.canonical_url(), "https://b.s3.amazonaws.com/deal-1.xlsx");
        assert!(!signed.is_expired());
    }

    #[tokio::test]
    async fn test_missing_bucket_is_credential_failure() {
        let result = S3CredentialIssuer::new(&s3_config("")).await;
        assert!(matches!(result, Err(UploadError::CredentialIssuance(_))));
    }

    fn static_issuer() -> S3CredentialIssuer {
        let credentials = Credentials::new(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            None,
            None,
            "static",
        );
        let client = S3Client::from_conf(
            S3ConfigBuilder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(Region::new("us-east-1"))
                .credentials_provider(credentials)
                .build(),
        );
        S3CredentialIssuer::with_client(client, &s3_config("chatbook-2023")).unwrap()
    }

    #[test]
    fn test_with_client_rejects_missing_bucket() {
        let client = S3Client::from_conf(
            S3ConfigBuilder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(Region::new("us-east-1"))
                .build(),
        );
        let result = S3CredentialIssuer::with_client(client, &s3_config(" "));
        assert!(matches!(result, Err(UploadError::CredentialIssuance(_))));
    }

    #[tokio::test]
    async fn test_presigned_write_is_scoped_to_key() {
        let issuer = static_issuer();
        let signed = issuer
            .issue(&CredentialRequest::write("deal-1700000000000.xlsx", "text/csv"))
            .await
            .unwrap();

        assert_eq!(signed.operation, Operation::Write);
        assert_eq!(signed.key, "deal-1700000000000.xlsx");
        assert!(signed.url.contains("chatbook-2023"));
        assert!(signed.url.contains("deal-1700000000000.xlsx"));
        assert!(signed.url.contains("X-Amz-Expires=60"));
        assert!(!signed.canonical_url().contains('?'));
    }

    #[tokio::test]
    async fn test_artifact_read_is_signed_against_output_bucket() {
        let issuer = static_issuer();
        let artifacts = derive_artifact_keys("deal-1700000000000.xlsx");

        let signed = issuer
            .issue(&CredentialRequest::read(artifacts.content_key.clone()))
            .await
            .unwrap();

        assert_eq!(signed.operation, Operation::Read);
        assert!(signed.url.contains("keye-output-files"));
        assert!(!signed.url.contains("chatbook-2023"));
        assert!(signed
            .canonical_url()
            .ends_with("processed/deal-1700000000000.csv"));
    }

    #[test]
    fn test_bucket_for() {
        let issuer = static_issuer();

        let artifact = CredentialRequest::read("processed/deal-1_metadata.json");
        assert_eq!(issuer.bucket_for(&artifact), "keye-output-files");

        let upload = CredentialRequest::read("deal-1.xlsx");
        assert_eq!(issuer.bucket_for(&upload), "chatbook-2023");

        let write = CredentialRequest::write("processed/deal-1.csv", "text/csv");
        assert_eq!(issuer.bucket_for(&write), "chatbook-2023");

        let lookalike = CredentialRequest::read("processed-deal-1.csv");
        assert_eq!(issuer.bucket_for(&lookalike), "chatbook-2023");
    }
}
