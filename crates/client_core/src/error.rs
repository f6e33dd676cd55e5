use shared::domain::Step;
use thiserror::Error;

use crate::workflow::WorkflowAction;

/// Fatal setup failures. Raised while building clients, never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("API base URL is not configured; set API_URL or pass --api-url")]
    MissingApiUrl,
    #[error("API base URL '{value}' is invalid: {source}")]
    InvalidApiUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("API base URL '{value}' must be an absolute http(s) URL")]
    UnsupportedScheme { value: String },
    #[error("failed to read settings file '{path}': {source}")]
    SettingsFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file '{path}': {source}")]
    SettingsFormat {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Failure of a single remote call. All variants are recoverable.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error calling {endpoint}: {source}")]
    Network {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{endpoint} rejected the request ({status}): {detail}")]
    Service {
        endpoint: String,
        status: u16,
        detail: String,
    },
}

impl ApiError {
    pub fn service_detail(&self) -> Option<&str> {
        match self {
            ApiError::Service { detail, .. } => Some(detail),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{action} is not available in the {step} step")]
    InvalidStep { action: WorkflowAction, step: Step },
    #[error("a postal code and an email address must be selected first")]
    MissingSelection,
    #[error("no subscription token is held")]
    MissingToken,
    #[error("postal code {0} is not in the directory")]
    UnknownPostalCode(String),
    #[error("{0} is still in flight")]
    Busy(WorkflowAction),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl WorkflowError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::Api(_) | WorkflowError::Busy(_))
    }
}
