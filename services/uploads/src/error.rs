use axum::http::StatusCode;
use thiserror::Error;

/// Errors produced by the upload flow and its HTTP surface
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// A required input was missing or empty
    #[error("Missing required field: {field}")]
    Validation { field: &'static str },

    /// The signing backend was unreachable or misconfigured
    #[error("Credential issuance failed: {0}")]
    CredentialIssuance(String),

    /// Byte transfer to storage failed
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// Metadata insert failed
    #[error("Failed to persist file metadata: {0}")]
    Persistence(String),

    /// Metadata read failed
    #[error("Failed to read file catalog: {0}")]
    Catalog(String),
}

impl UploadError {
    pub fn missing(field: &'static str) -> Self {
        UploadError::Validation { field }
    }

    /// HTTP status the API answers with for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            UploadError::Validation { .. } => StatusCode::BAD_REQUEST,
            UploadError::Transfer(_) => StatusCode::BAD_GATEWAY,
            UploadError::CredentialIssuance(_)
            | UploadError::Persistence(_)
            | UploadError::Catalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::Validation { .. } => "VALIDATION_ERROR",
            UploadError::CredentialIssuance(_) => "CREDENTIAL_ERROR",
            UploadError::Transfer(_) => "TRANSFER_ERROR",
            UploadError::Persistence(_) => "PERSISTENCE_ERROR",
            UploadError::Catalog(_) => "QUERY_ERROR",
        }
    }
}

pub type UploadResult<T> = std::result::Result<T, UploadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            UploadError::missing("filename").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            UploadError::CredentialIssuance("no bucket".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            UploadError::Persistence("db down".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_validation_message_names_field() {
        let err = UploadError::missing("contentType");
        assert_eq!(err.to_string(), "Missing required field: contentType");
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
