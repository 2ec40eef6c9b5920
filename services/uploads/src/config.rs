use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the upload service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket uploads are written to
    #[serde(default)]
    pub bucket: String,
    /// Bucket the processing pipeline writes derived artifacts to
    #[serde(default = "default_output_bucket")]
    pub output_bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Configuration for the `upload` command-line client
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of a running upload service
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// User the uploads are recorded under
    #[serde(default = "default_user_id")]
    pub user_id: String,
    /// Bucket recorded alongside each file
    #[serde(default)]
    pub bucket: String,
    /// Timeout for each HTTP request, including the byte transfer
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub request_timeout_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "upload-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_output_bucket() -> String {
    "keye-output-files".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    60
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_api_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_user_id() -> String {
    "123".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = base_builder()?.build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        self.s3.presigned_url_expiry()
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl S3Config {
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.presigned_url_expiry_secs)
    }

    /// Public (unsigned) URL of an object in `bucket`
    pub fn object_url(&self, bucket: &str, key: &str) -> String {
        match self.endpoint_url {
            Some(ref endpoint) => {
                format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key)
            }
            None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, self.region, key),
        }
    }
}

impl ClientConfig {
    /// Load the client section only; the server sections are not required
    pub fn load() -> anyhow::Result<Self> {
        let config = base_builder()?.build()?;

        match config.get::<ClientConfig>("client") {
            Ok(client) => Ok(client),
            Err(config::ConfigError::NotFound(_)) => Ok(ClientConfig::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn base_builder() -> anyhow::Result<config::ConfigBuilder<config::builder::DefaultState>> {
    let builder = config::Config::builder()
        // Start with default values
        .set_default("service.name", "upload-service")?
        .set_default("service.log_level", "info")?
        .set_default("service.metrics_port", 9090)?
        // Add config file if present
        .add_source(config::File::with_name("config/uploads").required(false))
        .add_source(config::File::with_name("/etc/uploads/uploads").required(false))
        // Override with environment variables
        // UPLOADS__S3__BUCKET -> s3.bucket
        .add_source(
            config::Environment::with_prefix("UPLOADS")
                .separator("__")
                .try_parsing(true),
        );

    Ok(builder)
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            user_id: default_user_id(),
            bucket: String::new(),
            request_timeout_secs: default_presigned_url_expiry_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3_config(endpoint_url: Option<&str>) -> S3Config {
        S3Config {
            bucket: "chatbook-2023".to_string(),
            output_bucket: default_output_bucket(),
            region: "us-east-1".to_string(),
            endpoint_url: endpoint_url.map(String::from),
            force_path_style: false,
            presigned_url_expiry_secs: default_presigned_url_expiry_secs(),
        }
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_presigned_url_expiry_secs(), 60);
        assert_eq!(default_output_bucket(), "keye-output-files");
        assert_eq!(ApiConfig::default().port, 8080);
    }

    #[test]
    fn test_object_url_virtual_hosted() {
        let config = s3_config(None);
        assert_eq!(
            config.object_url("keye-output-files", "processed/deal-1.csv"),
            "https://keye-output-files.s3.us-east-1.amazonaws.com/processed/deal-1.csv"
        );
    }

    #[test]
    fn test_object_url_custom_endpoint() {
        let config = s3_config(Some("http://localhost:9000/"));
        assert_eq!(
            config.object_url("uploads", "deal-1.xlsx"),
            "http://localhost:9000/uploads/deal-1.xlsx"
        );
    }

    #[test]
    fn test_presigned_url_expiry() {
        assert_eq!(s3_config(None).presigned_url_expiry(), Duration::from_secs(60));
    }
}
