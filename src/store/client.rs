/// Remote document store client
///
/// Stateless wrapper over the store's REST contract:
/// `GET|PUT|DELETE {base}/{collection}[/{segments}]{suffix}[?auth=...]`.
/// Bodies are JSON; a missing node reads back as the literal `null`.
use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::StoreConfig;
use crate::error::{ReplicaError, Result};

#[derive(Clone)]
pub struct RemoteStoreClient {
    config: Arc<StoreConfig>,
    client: Client,
}

impl std::fmt::Debug for RemoteStoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStoreClient")
            .field("base_url", &self.config.base_url)
            .field("authenticated", &self.config.auth_token.is_some())
            .finish()
    }
}

impl RemoteStoreClient {
    /// Create a client. No overall timeout is set on the connection pool so
    /// the event stream can stay open; request/response calls get
    /// `request_timeout_secs` each.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// URL of `collection/segments...`, with the path suffix and credential applied
    pub fn resource_url(&self, collection: &str, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| ReplicaError::Config(format!("invalid base_url: {e}")))?;

        let mut parts: Vec<String> = collection
            .split('/')
            .chain(segments.iter().copied())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if let Some(last) = parts.last_mut() {
            last.push_str(&self.config.path_suffix);
        }

        url.path_segments_mut()
            .map_err(|_| ReplicaError::Config("base_url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(parts.iter().map(String::as_str));

        if let Some(token) = &self.config.auth_token {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url)
    }

    /// URL of the collection's event stream
    pub fn stream_url(&self, collection: &str) -> Result<Url> {
        let mut url = self.resource_url(collection, &[])?;
        url.query_pairs_mut().append_pair("stream", "true");
        Ok(url)
    }

    /// Read a node; `Value::Null` when it does not exist
    pub async fn get(&self, collection: &str, segments: &[&str]) -> Result<Value> {
        let url = self.resource_url(collection, segments)?;
        debug!(collection, path = %url.path(), "GET");

        let response = self
            .client
            .get(url.clone())
            .timeout(self.config.request_timeout())
            .send()
            .await?;
        let response = ensure_success(response, &url).await?;

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ReplicaError::malformed(collection, segments.join("/"), e))
    }

    /// Upsert a node
    pub async fn put<B: Serialize + ?Sized>(
        &self,
        collection: &str,
        segments: &[&str],
        body: &B,
    ) -> Result<()> {
        let url = self.resource_url(collection, segments)?;
        debug!(collection, path = %url.path(), "PUT");

        let response = self
            .client
            .put(url.clone())
            .timeout(self.config.request_timeout())
            .json(body)
            .send()
            .await?;
        ensure_success(response, &url).await?;
        Ok(())
    }

    /// Remove a node
    pub async fn delete(&self, collection: &str, segments: &[&str]) -> Result<()> {
        let url = self.resource_url(collection, segments)?;
        debug!(collection, path = %url.path(), "DELETE");

        let response = self
            .client
            .delete(url.clone())
            .timeout(self.config.request_timeout())
            .send()
            .await?;
        ensure_success(response, &url).await?;
        Ok(())
    }

    /// Open the event stream; the caller reads the body incrementally
    pub async fn open_stream(&self, collection: &str) -> Result<Response> {
        let url = self.stream_url(collection)?;
        let response = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        ensure_success(response, &url).await
    }
}

async fn ensure_success(response: Response, url: &Url) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let mut shown = url.clone();
    shown.set_query(None);
    Err(ReplicaError::Status {
        status,
        url: shown.to_string(),
        body,
    })
}
