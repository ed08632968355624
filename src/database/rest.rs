//! Realtime Database REST backend
//!
//! Every node is addressable as `{database_url}/{path}.json`. Reads and
//! writes map onto GET/PUT/PATCH/DELETE; continuous reads use the same URL
//! with `Accept: text/event-stream` and receive `put`/`patch` events.

use super::backend::{DatabaseBackend, SnapshotStream};
use super::path::DatabasePath;
use super::query::QuerySpec;
use super::snapshot::DataSnapshot;
use super::sse::{ServerEvent, SseDecoder, StreamCache};
use crate::error::{ConfigError, FirebaseError};
use async_stream::stream;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Url;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// HTTP settings for the REST backends
#[derive(Debug, Clone)]
pub struct RestSettings {
    /// Timeout for one-shot requests
    ///
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Timeout for establishing a connection, streaming reads included
    ///
    /// Default: 10 seconds
    pub connect_timeout: Duration,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Backend speaking the Realtime Database REST protocol
#[derive(Clone)]
pub struct RestBackend {
    inner: Arc<RestInner>,
}

struct RestInner {
    base_url: Url,
    http_client: reqwest::Client,
    stream_client: reqwest::Client,
    auth_token: RwLock<Option<String>>,
}

impl RestBackend {
    /// Backend for `database_url`, e.g. `https://my-app-default-rtdb.firebaseio.com`
    pub fn new(
        database_url: impl AsRef<str>,
        settings: RestSettings,
    ) -> Result<Self, FirebaseError> {
        let database_url = database_url.as_ref();
        let base_url = Url::parse(database_url)
            .map_err(|e| ConfigError::InvalidDatabaseUrl(format!("{database_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidDatabaseUrl(database_url.to_string()).into());
        }

        let http_client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| FirebaseError::internal(format!("Failed to create HTTP client: {}", e)))?;

        // Streams stay open indefinitely, so no overall timeout here
        let stream_client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| FirebaseError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(RestInner {
                base_url,
                http_client,
                stream_client,
                auth_token: RwLock::new(None),
            }),
        })
    }

    /// Base URL of the database
    pub fn database_url(&self) -> &str {
        self.inner.base_url.as_str()
    }

    /// REST URL of the node at `path`
    pub fn url_for(&self, path: &DatabasePath) -> Result<Url, FirebaseError> {
        let mut url = self.inner.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ConfigError::InvalidDatabaseUrl(self.inner.base_url.to_string()))?;
            segments.pop_if_empty();
            match path.segments().split_last() {
                None => {
                    segments.push(".json");
                }
                Some((last, parents)) => {
                    segments.extend(parents);
                    segments.push(&format!("{last}.json"));
                }
            }
        }
        Ok(url)
    }

    async fn params(
        &self,
        query: &QuerySpec,
    ) -> Result<Vec<(&'static str, String)>, FirebaseError> {
        let mut params = query_params(query)?;
        if let Some(token) = self.inner.auth_token.read().await.as_ref() {
            params.push(("auth", token.clone()));
        }
        Ok(params)
    }
}

/// Query-string parameters for `query`, values JSON-encoded
pub fn query_params(query: &QuerySpec) -> Result<Vec<(&'static str, String)>, FirebaseError> {
    let mut params = Vec::new();
    if query.is_default() {
        return Ok(params);
    }

    let order_by = query.order_by.as_deref().unwrap_or("$key");
    params.push(("orderBy", serde_json::to_string(order_by)?));
    if let Some(start) = &query.start_at {
        params.push(("startAt", serde_json::to_string(start)?));
    }
    if let Some(end) = &query.end_at {
        params.push(("endAt", serde_json::to_string(end)?));
    }
    if let Some(equal) = &query.equal_to {
        params.push(("equalTo", serde_json::to_string(equal)?));
    }
    Ok(params)
}

/// Turn an error response into `FirebaseError::Backend` with the server's message
async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, FirebaseError> {
    // Handle error responses first
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| value["error"].as_str().map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {}: {}", status, body));

    tracing::error!(%status, %message, "Database request failed");
    Err(FirebaseError::Backend(message))
}

impl DatabaseBackend for RestBackend {
    async fn get(
        &self,
        path: &DatabasePath,
        query: &QuerySpec,
    ) -> Result<DataSnapshot, FirebaseError> {
        let url = self.url_for(path)?;
        tracing::debug!(endpoint = %path, "GET");

        let response = self
            .inner
            .http_client
            .get(url)
            .query(&self.params(query).await?)
            .send()
            .await?;
        let value: Value = check_response(response).await?.json().await?;

        Ok(DataSnapshot::with_query(path.key().map(str::to_string), value, query))
    }

    async fn set(&self, path: &DatabasePath, value: Value) -> Result<(), FirebaseError> {
        let url = self.url_for(path)?;
        tracing::debug!(endpoint = %path, "PUT");

        let mut params = self.params(&QuerySpec::default()).await?;
        params.push(("print", "silent".to_string()));

        let response = self
            .inner
            .http_client
            .put(url)
            .query(&params)
            .json(&value)
            .send()
            .await?;
        check_response(response).await?;
        Ok(())
    }

    async fn update(
        &self,
        path: &DatabasePath,
        changes: Map<String, Value>,
    ) -> Result<(), FirebaseError> {
        let url = self.url_for(path)?;
        tracing::debug!(endpoint = %path, fields = changes.len(), "PATCH");

        let mut params = self.params(&QuerySpec::default()).await?;
        params.push(("print", "silent".to_string()));

        let response = self
            .inner
            .http_client
            .patch(url)
            .query(&params)
            .json(&changes)
            .send()
            .await?;
        check_response(response).await?;
        Ok(())
    }

    async fn remove(&self, path: &DatabasePath) -> Result<(), FirebaseError> {
        let url = self.url_for(path)?;
        tracing::debug!(endpoint = %path, "DELETE");

        let response = self
            .inner
            .http_client
            .delete(url)
            .query(&self.params(&QuerySpec::default()).await?)
            .send()
            .await?;
        check_response(response).await?;
        Ok(())
    }

    async fn listen(
        &self,
        path: &DatabasePath,
        query: &QuerySpec,
    ) -> Result<SnapshotStream, FirebaseError> {
        let url = self.url_for(path)?;
        tracing::debug!(endpoint = %path, "LISTEN");

        let response = self
            .inner
            .stream_client
            .get(url)
            .query(&self.params(query).await?)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = check_response(response).await?;

        let key = path.key().map(str::to_string);
        let query = query.clone();

        Ok(Box::pin(stream! {
            let mut body = response.bytes_stream();
            let mut decoder = SseDecoder::new();
            let mut cache = StreamCache::new();
            let mut delivered = false;

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Err(e) => {
                        yield Err(FirebaseError::from(e));
                        return;
                    }
                    Ok(chunk) => chunk,
                };

                let messages = match decoder.feed(&chunk) {
                    Err(e) => {
                        tracing::error!(error = %e, "Event stream rejected");
                        yield Err(e);
                        return;
                    }
                    Ok(messages) => messages,
                };

                for message in messages {
                    let event = match ServerEvent::parse(&message) {
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                        Ok(None) => continue,
                        Ok(Some(event)) => event,
                    };

                    match event {
                        ServerEvent::Cancel(reason) | ServerEvent::AuthRevoked(reason) => {
                            tracing::error!(%reason, "Stream closed by server");
                            yield Err(FirebaseError::Backend(reason));
                            return;
                        }
                        ServerEvent::KeepAlive => {}
                        event => {
                            // The first put is the initial state, even when empty
                            if cache.apply(&event) || !delivered {
                                delivered = true;
                                yield Ok(DataSnapshot::with_query(
                                    key.clone(),
                                    cache.value().clone(),
                                    &query,
                                ));
                            }
                        }
                    }
                }
            }
        }))
    }

    async fn set_auth_token(&self, token: Option<String>) {
        *self.inner.auth_token.write().await = token;
    }
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("database_url", &self.inner.base_url.as_str())
            .field("auth_token", &"<redacted>")
            .finish()
    }
}
