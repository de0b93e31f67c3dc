//! Remote adapter calling the replica HTTP API.

use super::{LocalSessionStore, SessionStore};
use crate::models::{ChatMessage, Session, SessionId};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::instrument;

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Base delay for exponential retry backoff.
const BACKOFF_BASE_MS: u64 = 100;

/// Thin HTTP client for the replica API.
///
/// Transport errors and 5xx responses are retried with exponential backoff
/// up to the configured ceiling; 4xx responses are never retried. A 404 is
/// passed through to the caller as a semantic result, not a failure.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
    max_retries: u32,
}

impl ApiClient {
    /// Creates a client against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        max_retries: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::OperationFailed {
                operation: "build_http_client".to_string(),
                cause: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.map(SecretString::from),
            max_retries,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn backoff_delay(attempt: u32) -> Duration {
        Duration::from_millis(BACKOFF_BASE_MS << attempt.min(6))
    }

    /// Sends a request, retrying transport errors and 5xx responses.
    async fn send(
        &self,
        operation: &str,
        build: impl Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let mut attempt: u32 = 0;

        loop {
            let mut request = build(&self.client);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token.expose_secret());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() || status == StatusCode::NOT_FOUND {
                        metrics::counter!("remote_requests_total", "status" => "success")
                            .increment(1);
                        return Ok(response);
                    }

                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        metrics::counter!("remote_requests_total", "status" => "unauthorized")
                            .increment(1);
                        return Err(Error::Unauthorized(format!(
                            "replica rejected '{operation}' with {status}"
                        )));
                    }

                    // Other 4xx responses are the caller's fault, never retried
                    if status.is_client_error() {
                        metrics::counter!("remote_requests_total", "status" => "client_error")
                            .increment(1);
                        return Err(Error::OperationFailed {
                            operation: operation.to_string(),
                            cause: format!("replica answered {status}"),
                        });
                    }

                    if attempt >= self.max_retries {
                        metrics::counter!("remote_requests_total", "status" => "exhausted")
                            .increment(1);
                        return Err(Error::RemoteUnavailable(format!(
                            "'{operation}' still failing with {status} after {attempt} retries"
                        )));
                    }

                    tracing::warn!(%status, attempt, "Replica error, retrying");
                },
                Err(e) => {
                    if attempt >= self.max_retries {
                        metrics::counter!("remote_requests_total", "status" => "exhausted")
                            .increment(1);
                        return Err(Error::RemoteUnavailable(format!(
                            "'{operation}' transport failure after {attempt} retries: {e}"
                        )));
                    }

                    tracing::warn!(error = %e, attempt, "Transport failure, retrying");
                },
            }

            tokio::time::sleep(Self::backoff_delay(attempt)).await;
            attempt += 1;
        }
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(
        operation: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        response.json().await.map_err(|e| Error::OperationFailed {
            operation: operation.to_string(),
            cause: format!("malformed replica response: {e}"),
        })
    }

    /// Probes the replica's health endpoint with a single attempt.
    ///
    /// # Errors
    ///
    /// Returns `RemoteUnavailable` if the probe does not answer 2xx.
    pub async fn health(&self) -> Result<()> {
        let url = self.endpoint("health");
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(Error::RemoteUnavailable(format!(
                "health probe answered {}",
                response.status()
            ))),
            Err(e) => Err(Error::RemoteUnavailable(format!("health probe failed: {e}"))),
        }
    }
}

/// Body for the bulk `POST /sync` endpoint.
#[derive(Serialize)]
struct SyncPushBody<'a> {
    sessions: &'a [Session],
}

/// Session store where every operation is a replica API call.
///
/// The user identity is held client-side and attached to requests as the
/// `X-User-Id` header. When a local cache is attached, `sync_to_cloud`
/// republishes its session blob in one batch request and `sync_from_cloud`
/// warms it with the authoritative list.
pub struct RemoteSessionStore {
    api: ApiClient,
    user: Mutex<Option<String>>,
    cache: Option<LocalSessionStore>,
}

impl RemoteSessionStore {
    /// Creates a remote store over an API client.
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self {
            api,
            user: Mutex::new(None),
            cache: None,
        }
    }

    /// Attaches a local blob used by the bulk sync operations.
    #[must_use]
    pub fn with_local_cache(mut self, cache: LocalSessionStore) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Returns the underlying API client.
    #[must_use]
    pub const fn api(&self) -> &ApiClient {
        &self.api
    }

    fn current_user(&self) -> Option<String> {
        self.user.lock().map(|u| u.clone()).unwrap_or(None)
    }

    fn with_user(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.current_user() {
            Some(user) => request.header("X-User-Id", user),
            None => request,
        }
    }
}

#[async_trait]
impl SessionStore for RemoteSessionStore {
    #[instrument(skip(self, session), fields(operation = "save_session", backend = "remote", session.id = %session.id))]
    async fn save_session(&self, session: &Session) -> Result<()> {
        if session.id.is_empty() {
            return Err(Error::InvalidInput("session is missing an id".to_string()));
        }

        let url = self.api.endpoint("sessions");
        self.api
            .send("save_session", |client| {
                self.with_user(client.post(&url).json(session))
            })
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(operation = "load_sessions", backend = "remote"))]
    async fn load_sessions(&self) -> Result<Vec<Session>> {
        let url = self.api.endpoint("sessions");
        let response = self
            .api
            .send("load_sessions", |client| self.with_user(client.get(&url)))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        ApiClient::parse_json("load_sessions", response).await
    }

    #[instrument(skip(self), fields(operation = "delete_session", backend = "remote", session.id = %id))]
    async fn delete_session(&self, id: &SessionId) -> Result<bool> {
        let url = self.api.endpoint(&format!("sessions/{id}"));
        let response = self
            .api
            .send("delete_session", |client| self.with_user(client.delete(&url)))
            .await?;

        Ok(response.status() != StatusCode::NOT_FOUND)
    }

    #[instrument(skip(self, message), fields(operation = "save_message", backend = "remote", session.id = %session_id))]
    async fn save_message(&self, session_id: &SessionId, message: &ChatMessage) -> Result<()> {
        if session_id.is_empty() {
            return Err(Error::InvalidInput("session id is empty".to_string()));
        }

        let url = self.api.endpoint(&format!("sessions/{session_id}/messages"));
        self.api
            .send("save_message", |client| {
                self.with_user(client.post(&url).json(message))
            })
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(operation = "load_messages", backend = "remote", session.id = %session_id))]
    async fn load_messages(&self, session_id: &SessionId) -> Result<Vec<ChatMessage>> {
        let url = self.api.endpoint(&format!("sessions/{session_id}/messages"));
        let response = self
            .api
            .send("load_messages", |client| self.with_user(client.get(&url)))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        ApiClient::parse_json("load_messages", response).await
    }

    /// Bulk replace on the replica, one request for the whole batch.
    #[instrument(skip(self, sessions), fields(operation = "push_sessions", backend = "remote", count = sessions.len()))]
    async fn push_sessions(&self, sessions: &[Session]) -> Result<usize> {
        if sessions.is_empty() {
            return Ok(0);
        }

        let url = self.api.endpoint("sync");
        let body = SyncPushBody { sessions };
        self.api
            .send("push_sessions", |client| {
                self.with_user(client.post(&url).json(&body))
            })
            .await?;

        Ok(sessions.len())
    }

    /// Republishes the cached local session blob in one batch request.
    #[instrument(skip(self), fields(operation = "sync_to_cloud", backend = "remote"))]
    async fn sync_to_cloud(&self) -> Result<usize> {
        let Some(cache) = &self.cache else {
            return Ok(0);
        };

        let sessions = cache.read_sessions()?;
        self.push_sessions(&sessions).await
    }

    #[instrument(skip(self), fields(operation = "sync_from_cloud", backend = "remote"))]
    async fn sync_from_cloud(&self) -> Result<Vec<Session>> {
        let sessions = self.load_sessions().await?;

        // Warm the local blob so the next local read needs no network
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.write_sessions(&sessions) {
                tracing::warn!(error = %e, "Failed to warm the local session blob");
            }
        }

        Ok(sessions)
    }

    async fn set_user_id(&self, user_id: &str) -> Result<()> {
        if let Ok(mut user) = self.user.lock() {
            *user = Some(user_id.to_string());
        }
        Ok(())
    }

    async fn user_id(&self) -> Result<Option<String>> {
        Ok(self.current_user())
    }

    fn backend_name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(base, Some("secret-token".to_string()), 2).unwrap()
    }

    #[test]
    fn test_endpoint_joins_cleanly() {
        let api = client("https://api.example.com/");
        assert_eq!(api.endpoint("sessions"), "https://api.example.com/sessions");
        assert_eq!(api.endpoint("/sessions"), "https://api.example.com/sessions");
        assert_eq!(
            api.endpoint("sessions/s1/messages"),
            "https://api.example.com/sessions/s1/messages"
        );
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(ApiClient::backoff_delay(0), Duration::from_millis(100));
        assert_eq!(ApiClient::backoff_delay(1), Duration::from_millis(200));
        assert_eq!(ApiClient::backoff_delay(3), Duration::from_millis(800));
        // Shift is clamped so the delay stops growing
        assert_eq!(ApiClient::backoff_delay(6), ApiClient::backoff_delay(60));
    }

    #[test]
    fn test_token_is_not_debug_printable() {
        let api = client("https://api.example.com");
        let token = api.token.as_ref().unwrap();
        assert!(!format!("{token:?}").contains("secret-token"));
    }

    #[tokio::test]
    async fn test_user_id_round_trip() {
        let store = RemoteSessionStore::new(client("https://api.example.com"));
        assert!(store.user_id().await.unwrap().is_none());

        store.set_user_id("user-7").await.unwrap();
        assert_eq!(store.user_id().await.unwrap().as_deref(), Some("user-7"));
    }

    fn local_cache() -> LocalSessionStore {
        let dir = tempfile::tempdir().unwrap();
        let kv = crate::storage::TieredKv::open(dir.path()).unwrap();
        std::mem::forget(dir);
        LocalSessionStore::new(kv)
    }

    #[tokio::test]
    async fn test_sync_to_cloud_without_cache_pushes_nothing() {
        let store = RemoteSessionStore::new(client("https://api.example.com"));
        assert_eq!(store.sync_to_cloud().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_push_sessions_empty_batch_sends_nothing() {
        // No request is issued for an empty batch, so the dead address is fine
        let api = ApiClient::new("http://192.0.2.1:9", None, 0).unwrap();
        let store = RemoteSessionStore::new(api);
        assert_eq!(store.push_sessions(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sync_to_cloud_skips_empty_blob() {
        // No request is issued for an empty blob, so the dead address is fine
        let api = ApiClient::new("http://192.0.2.1:9", None, 0).unwrap();
        let store = RemoteSessionStore::new(api).with_local_cache(local_cache());
        assert_eq!(store.sync_to_cloud().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sync_to_cloud_surfaces_unreachable_replica() {
        let api = ApiClient::new("http://192.0.2.1:9", None, 0).unwrap();
        let cache = local_cache();
        cache.write_sessions(&[Session::new()]).unwrap();

        let store = RemoteSessionStore::new(api).with_local_cache(cache);
        let err = store.sync_to_cloud().await.unwrap_err();
        assert!(matches!(err, Error::RemoteUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_replica_maps_to_remote_unavailable() {
        // Reserved TEST-NET-1 address, nothing listens there
        let api = ApiClient::new("http://192.0.2.1:9", None, 0).unwrap();
        let err = api.health().await.unwrap_err();
        assert!(matches!(err, Error::RemoteUnavailable(_)));
    }
}
