use thiserror::Error;

pub const ERRORS_WHILE_COMPUTING_FLAGS: &str = "errors_while_computing_flags";
pub const FLAG_MISSING: &str = "flag_missing";
pub const QUOTA_LIMITED: &str = "quota_limited";
pub const TIMEOUT: &str = "timeout";
pub const CONNECTION_ERROR: &str = "connection_error";
pub const UNKNOWN_ERROR: &str = "unknown_error";

/// Hard failures: anything that is not a statement about the flag data itself.
///
/// None of these ever reach the caller of a flag check; the coordinator logs them,
/// records the reason code on the cache entry and falls back to the caller default.
#[derive(Error, Debug)]
pub enum FlagError {
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("request to {0} timed out")]
    TimeoutError(String),
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("request failed with status {0}")]
    ApiError(u16),
    #[error("failed to parse response: {0}")]
    ResponseParsingError(#[from] serde_json::Error),
    #[error("feature flags are quota limited")]
    QuotaLimited,
    #[error("no personal API key configured, local evaluation is unavailable")]
    MissingPersonalApiKey,
    #[error("flag definitions have not been loaded")]
    DefinitionsNotLoaded,
}

impl FlagError {
    /// The remote service's reason vocabulary for this failure.
    pub fn reason_code(&self) -> String {
        match self {
            FlagError::TimeoutError(_) => TIMEOUT.to_string(),
            FlagError::ConnectionError(_) => CONNECTION_ERROR.to_string(),
            FlagError::ApiError(status) => api_error(*status),
            FlagError::QuotaLimited => QUOTA_LIMITED.to_string(),
            FlagError::Internal(_)
            | FlagError::ResponseParsingError(_)
            | FlagError::MissingPersonalApiKey
            | FlagError::DefinitionsNotLoaded => UNKNOWN_ERROR.to_string(),
        }
    }
}

pub fn api_error(status: u16) -> String {
    format!("api_error_{status}")
}

impl From<reqwest::Error> for FlagError {
    fn from(e: reqwest::Error) -> Self {
        let target = e
            .url()
            .map(|url| url.to_string())
            .unwrap_or_else(|| "unknown url".to_string());
        if e.is_timeout() {
            FlagError::TimeoutError(target)
        } else if let Some(status) = e.status() {
            FlagError::ApiError(status.as_u16())
        } else if e.is_connect() || e.is_request() {
            FlagError::ConnectionError(e.to_string())
        } else if e.is_decode() {
            FlagError::Internal(format!("failed to decode response from {target}: {e}"))
        } else {
            FlagError::ConnectionError(e.to_string())
        }
    }
}
