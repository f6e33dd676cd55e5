use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::SubscriptionToken,
    protocol::{DetailResponse, QueueSubscriptionRequest, QueueSubscriptionResponse, TokenQuery},
};
use url::Url;

use crate::{
    config::ApiBase,
    error::{ApiError, ConfigError},
    transport::{decode_error, fetch_json, http_client},
};

pub const QUEUE_PATH: &str = "/subscription/queue";
pub const VALIDATE_PATH: &str = "/subscription/validate";
pub const REMOVE_PATH: &str = "/subscription/remove";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueReceipt {
    pub token: SubscriptionToken,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReceipt {
    pub detail: String,
}

/// Remote subscription operations. Every call hits the network; nothing is cached.
#[async_trait]
pub trait SubscriptionApi: Send + Sync {
    /// Places `(postal_code, email)` in the validation queue.
    async fn queue(&self, postal_code: &str, email: &str) -> Result<QueueReceipt, ApiError>;
    /// Activates the queued subscription identified by `token`.
    async fn validate(&self, token: &SubscriptionToken) -> Result<ServiceReceipt, ApiError>;
    /// Deactivates the subscription identified by `token`.
    async fn remove(&self, token: &SubscriptionToken) -> Result<ServiceReceipt, ApiError>;
}

pub struct HttpSubscriptionClient {
    http: Client,
    queue_url: Url,
    validate_url: Url,
    remove_url: Url,
}

impl HttpSubscriptionClient {
    pub fn new(base: &ApiBase) -> Result<Self, ConfigError> {
        Ok(Self::with_client(http_client()?, base))
    }

    pub fn with_client(http: Client, base: &ApiBase) -> Self {
        Self {
            http,
            queue_url: base.endpoint(QUEUE_PATH),
            validate_url: base.endpoint(VALIDATE_PATH),
            remove_url: base.endpoint(REMOVE_PATH),
        }
    }

    async fn token_call(
        &self,
        url: &Url,
        path: &str,
        token: &SubscriptionToken,
    ) -> Result<ServiceReceipt, ApiError> {
        let request = self.http.get(url.clone()).query(&TokenQuery {
            token: token.expose().to_string(),
        });
        let response: DetailResponse = fetch_json(request, path).await?;
        Ok(ServiceReceipt {
            detail: response.detail,
        })
    }
}

#[async_trait]
impl SubscriptionApi for HttpSubscriptionClient {
    async fn queue(&self, postal_code: &str, email: &str) -> Result<QueueReceipt, ApiError> {
        let request = self
            .http
            .post(self.queue_url.clone())
            .json(&QueueSubscriptionRequest {
                postal_code: postal_code.to_string(),
                user_email: email.to_string(),
            });
        let response: QueueSubscriptionResponse = fetch_json(request, QUEUE_PATH).await?;
        if response.validation_token.is_empty() {
            return Err(decode_error(QUEUE_PATH, "empty validation_token"));
        }
        Ok(QueueReceipt {
            token: SubscriptionToken::new(response.validation_token),
            detail: response.detail,
        })
    }

    async fn validate(&self, token: &SubscriptionToken) -> Result<ServiceReceipt, ApiError> {
        self.token_call(&self.validate_url, VALIDATE_PATH, token).await
    }

    async fn remove(&self, token: &SubscriptionToken) -> Result<ServiceReceipt, ApiError> {
        self.token_call(&self.remove_url, REMOVE_PATH, token).await
    }
}
