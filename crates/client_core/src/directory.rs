use async_trait::async_trait;
use reqwest::Client;
use shared::domain::PostalCode;
use url::Url;

use crate::{
    config::ApiBase,
    error::{ApiError, ConfigError},
    transport::{fetch_json, http_client},
};

pub const POSTAL_PATH: &str = "/postal";

/// Source of the postal codes a subscription can target.
#[async_trait]
pub trait PostalDirectory: Send + Sync {
    async fn list(&self) -> Result<Vec<PostalCode>, ApiError>;
}

pub struct HttpPostalDirectory {
    http: Client,
    endpoint: Url,
}

impl HttpPostalDirectory {
    pub fn new(base: &ApiBase) -> Result<Self, ConfigError> {
        Ok(Self::with_client(http_client()?, base))
    }

    pub fn with_client(http: Client, base: &ApiBase) -> Self {
        Self {
            http,
            endpoint: base.endpoint(POSTAL_PATH),
        }
    }
}

#[async_trait]
impl PostalDirectory for HttpPostalDirectory {
    async fn list(&self) -> Result<Vec<PostalCode>, ApiError> {
        fetch_json(self.http.get(self.endpoint.clone()), POSTAL_PATH).await
    }
}
