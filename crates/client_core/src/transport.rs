use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use shared::error::ServiceErrorBody;
use tracing::debug;

use crate::error::{ApiError, ConfigError};

/// Builds the HTTP client shared by the directory and subscription clients.
/// No request timeout is configured: a stalled call stays pending.
pub(crate) fn http_client() -> Result<Client, ConfigError> {
    Client::builder().build().map_err(ConfigError::HttpClient)
}

/// Sends `request` and decodes a JSON success body.
///
/// Non-2xx statuses become [`ApiError::Service`] carrying the service's
/// `detail`, or the status reason when the body is not a service envelope.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    request: RequestBuilder,
    endpoint: &str,
) -> Result<T, ApiError> {
    debug!(endpoint, "sending request");
    let response = request.send().await.map_err(|source| ApiError::Network {
        endpoint: endpoint.to_string(),
        source,
    })?;
    let status = response.status();
    let body = response.bytes().await.map_err(|source| ApiError::Network {
        endpoint: endpoint.to_string(),
        source,
    })?;

    if !status.is_success() {
        let detail = match serde_json::from_slice::<ServiceErrorBody>(&body) {
            Ok(envelope) => envelope.message(),
            Err(_) => status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string(),
        };
        return Err(ApiError::Service {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            detail,
        });
    }

    serde_json::from_slice(&body).map_err(|source| ApiError::Decode {
        endpoint: endpoint.to_string(),
        source,
    })
}

pub(crate) fn decode_error(endpoint: &str, message: &str) -> ApiError {
    ApiError::Decode {
        endpoint: endpoint.to_string(),
        source: <serde_json::Error as serde::de::Error>::custom(message),
    }
}
