//! HTTP remote client.

use async_trait::async_trait;
use provisioner_config::RemoteSettings;
use provisioner_core::{ConfigStore, Error, RemoteClient, RemoteError, Result};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Client for management APIs laid out as `{endpoint}/{kind}/{name}`.
pub struct HttpRemoteClient {
    client: reqwest::Client,
    endpoint: Url,
    api_version: String,
    token: Option<String>,
}

impl HttpRemoteClient {
    pub fn new(endpoint: &str, api_version: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint.trim_end_matches('/')).map_err(|e| {
            Error::InvalidDefinition(format!("invalid remote endpoint '{}': {}", endpoint, e))
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidDefinition(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_version: api_version.into(),
            token: None,
        })
    }

    /// Build a client from the endpoint and API version held in the config store.
    pub fn from_store(store: &ConfigStore, settings: &RemoteSettings) -> Result<Self> {
        let endpoint = store.require_str(&settings.endpoint_key)?;
        let api_version = match &settings.default_api_version {
            Some(default) => store
                .get_or(&settings.api_version_key, default.as_str().into())
                .render(),
            None => store.require_str(&settings.api_version_key)?,
        };
        Self::new(&endpoint, api_version, settings.request_timeout)
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn resource_url(&self, kind: &str, name: &str) -> String {
        format!(
            "{}/{}/{}?api-version={}",
            self.endpoint.as_str().trim_end_matches('/'),
            urlencoding::encode(kind),
            urlencoding::encode(name),
            urlencoding::encode(&self.api_version)
        )
    }

    async fn send(
        &self,
        method: Method,
        kind: &str,
        name: &str,
        body: Option<&Value>,
    ) -> std::result::Result<Value, RemoteError> {
        let url = self.resource_url(kind, name);
        debug!(method = %method, url = %url, "Remote request");

        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::transport(format!("{} {}/{}: {}", method, kind, name, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::transport(format!("{} {}/{}: {}", method, kind, name, e)))?;

        if !status.is_success() {
            return Err(classify(status, &format!("{} {}/{}: {}", method, kind, name, text)));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

fn classify(status: StatusCode, message: &str) -> RemoteError {
    RemoteError::from_status(status.as_u16(), message)
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn get(&self, kind: &str, name: &str) -> std::result::Result<Value, RemoteError> {
        self.send(Method::GET, kind, name, None).await
    }

    async fn create_or_update(
        &self,
        kind: &str,
        name: &str,
        body: &Value,
    ) -> std::result::Result<Value, RemoteError> {
        self.send(Method::PUT, kind, name, Some(body)).await
    }

    async fn delete(&self, kind: &str, name: &str) -> std::result::Result<(), RemoteError> {
        self.send(Method::DELETE, kind, name, None).await.map(|_| ())
    }
}
