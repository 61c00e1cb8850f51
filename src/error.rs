#[derive(Debug, thiserror::Error)]
pub enum LoadTestError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] std::io::Error),
    #[error("HTTP client error: {0}")]
    HttpClientError(String),
    #[error("Report error: {0}")]
    ReportError(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
