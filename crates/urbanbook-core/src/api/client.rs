//! API client for the Urban Services REST API.
//!
//! This module provides the `ApiClient` struct for the authentication and
//! user profile endpoints.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Method, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::{ProfileFetcher, SessionStore};
use crate::config::Config;
use crate::models::{
    AuthResponse, ChangePasswordRequest, LoginCredentials, PasswordResetConfirm,
    PasswordResetRequest, RegisterCustomerData, RegisterProfessionalData, UpdateProfileRequest,
    User,
};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Whether a request carries the session's bearer token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    Bearer,
    Anonymous,
}

/// API client for the booking backend.
/// Clone is cheap - reqwest::Client and SessionStore are both Arc inside.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: SessionStore,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, session: SessionStore) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn from_config(config: &Config, session: SessionStore) -> Result<Self> {
        Self::new(config.api_base_url(), config.request_timeout(), session)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Headers for a request, and whether a token was attached.
    fn auth_headers(&self, auth: Auth) -> Result<(header::HeaderMap, bool)> {
        let mut headers = header::HeaderMap::new();
        if auth == Auth::Anonymous {
            return Ok((headers, false));
        }
        match self.session.token() {
            Some(token) => {
                headers.insert(
                    header::AUTHORIZATION,
                    header::HeaderValue::from_str(&format!("Bearer {}", token))
                        .context("Persisted token is not a valid header value")?,
                );
                Ok((headers, true))
            }
            None => Ok((headers, false)),
        }
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    ///
    /// A 401 to a request that carried a token ends the session.
    async fn check_response_for_retry(
        &self,
        response: Response,
        authenticated: bool,
    ) -> Result<Option<Response>> {
        let status = response.status();
        if status.is_success() {
            return Ok(Some(response));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Ok(None);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED && authenticated {
            warn!(url = %response.url(), "Token rejected by server, expiring session");
            self.session.expire();
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status, &body).into())
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        auth: Auth,
        body: Option<&B>,
    ) -> Result<Response> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let (headers, authenticated) = self.auth_headers(auth)?;
            let mut request = self.client.request(method.clone(), &url).headers(headers);
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!(method = %method, url = %url, authenticated, "Sending request");
            let response = request
                .send()
                .await
                .map_err(ApiError::from)
                .with_context(|| format!("Failed to send {} request to {}", method, url))?;

            match self.check_response_for_retry(response, authenticated).await? {
                Some(response) => return Ok(response),
                None => {
                    // Rate limited
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        auth: Auth,
        body: Option<&B>,
    ) -> Result<T> {
        let response = self.send(method, path, auth, body).await?;
        let text = response
            .text()
            .await
            .map_err(ApiError::from)
            .with_context(|| format!("Failed to read response body from {}", path))?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
            .with_context(|| format!("Failed to parse JSON response from {}", path))
    }

    // ===== Authentication =====

    /// Exchange credentials for a token. Does not touch the session.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<AuthResponse> {
        self.send_json(Method::POST, "/auth/login", Auth::Anonymous, Some(credentials))
            .await
    }

    pub async fn register_customer(&self, data: &RegisterCustomerData) -> Result<AuthResponse> {
        self.send_json(Method::POST, "/auth/register/customer", Auth::Anonymous, Some(data))
            .await
    }

    pub async fn register_professional(&self, data: &RegisterProfessionalData) -> Result<AuthResponse> {
        self.send_json(Method::POST, "/auth/register/professional", Auth::Anonymous, Some(data))
            .await
    }

    pub async fn refresh_token(&self) -> Result<AuthResponse> {
        self.send_json::<_, ()>(Method::POST, "/auth/refresh-token", Auth::Bearer, None)
            .await
    }

    /// Tell the server the session is over, then end it locally.
    ///
    /// The local logout happens even when the server call fails.
    pub async fn logout(&self) {
        if self.session.token().is_some() {
            if let Err(e) = self
                .send::<()>(Method::POST, "/auth/logout", Auth::Bearer, None)
                .await
            {
                warn!(error = %e, "Server logout failed");
            }
        }
        self.session.logout();
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let body = PasswordResetRequest {
            email: email.to_string(),
        };
        self.send(Method::POST, "/auth/forgot-password", Auth::Anonymous, Some(&body))
            .await?;
        Ok(())
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<()> {
        let body = PasswordResetConfirm {
            token: token.to_string(),
            new_password: new_password.to_string(),
        };
        self.send(Method::POST, "/auth/reset-password", Auth::Anonymous, Some(&body))
            .await?;
        Ok(())
    }

    // ===== Profile =====

    pub async fn get_user_profile(&self) -> Result<User> {
        self.send_json::<_, ()>(Method::GET, "/users/me", Auth::Bearer, None)
            .await
            .context("Failed to fetch user profile")
    }

    /// Save profile edits and replace the session's user with the result.
    pub async fn update_profile(&self, update: &UpdateProfileRequest) -> Result<User> {
        let user: User = self
            .send_json(Method::PUT, "/users/me", Auth::Bearer, Some(update))
            .await
            .context("Failed to update user profile")?;
        self.session.update_user(user.clone());
        Ok(user)
    }

    pub async fn change_password(&self, current_password: &str, new_password: &str) -> Result<()> {
        let body = ChangePasswordRequest {
            current_password: current_password.to_string(),
            new_password: new_password.to_string(),
        };
        self.send(Method::PUT, "/users/me/password", Auth::Bearer, Some(&body))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileFetcher for ApiClient {
    async fn fetch_current_user(&self) -> Result<User> {
        self.get_user_profile().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::tests::test_store;
    use crate::auth::storage::{TokenStorage, TOKEN_KEY};

    fn client_with_store() -> (ApiClient, SessionStore, std::sync::Arc<crate::auth::MemoryStorage>) {
        let (store, storage, _) = test_store();
        let client = ApiClient::new("http://localhost:8080/api/", Duration::from_secs(10), store.clone())
            .expect("client should build");
        (client, store, storage)
    }

    #[test]
    fn test_url_joining() {
        let (client, _, _) = client_with_store();
        assert_eq!(client.base_url(), "http://localhost:8080/api");
        assert_eq!(client.url("/users/me"), "http://localhost:8080/api/users/me");
        assert_eq!(client.url("auth/login"), "http://localhost:8080/api/auth/login");
    }

    #[test]
    fn test_auth_headers_use_persisted_token() {
        let (client, _, storage) = client_with_store();

        let (headers, authenticated) = client.auth_headers(Auth::Bearer).unwrap();
        assert!(!authenticated);
        assert!(headers.get(header::AUTHORIZATION).is_none());

        storage.set(TOKEN_KEY, "tok-1").unwrap();
        let (headers, authenticated) = client.auth_headers(Auth::Bearer).unwrap();
        assert!(authenticated);
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer tok-1");
    }

    #[test]
    fn test_anonymous_requests_never_carry_token() {
        let (client, store, _) = client_with_store();
        store.login("tok-1", User::new("u1", "a@b.com", "A")).unwrap();

        let (headers, authenticated) = client.auth_headers(Auth::Anonymous).unwrap();
        assert!(!authenticated);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_invalid_token_is_rejected_as_header() {
        let (client, _, storage) = client_with_store();
        storage.set(TOKEN_KEY, "bad\ntoken").unwrap();
        assert!(client.auth_headers(Auth::Bearer).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_leaves_session_alone() {
        let (store, _, _) = test_store();
        store.login("tok-1", User::new("u1", "a@b.com", "A")).unwrap();
        // Port 9 (discard) on localhost is expected to refuse connections
        let client = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(2), store.clone()).unwrap();

        let err = client.get_user_profile().await.unwrap_err();
        assert!(!ApiError::is_unauthorized(&err));
        assert!(store.is_authenticated());
        assert_eq!(store.token(), Some("tok-1".to_string()));
    }

    // -------------------------------------------------------------------------
    // Local HTTP responder
    // -------------------------------------------------------------------------

    use crate::auth::{ResolverState, SessionResolver};
    use std::sync::atomic::Ordering;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    const PROFILE_JSON: &str = r#"{"id":"u1","email":"a@b.com","name":"A"}"#;

    /// Answer one connection per scripted `(status, body)` in order.
    /// Resolves to the request heads that were received.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/api", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let mut heads = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                heads.push(read_request(&mut socket).await);

                let reason = match status {
                    200 => "OK",
                    401 => "Unauthorized",
                    429 => "Too Many Requests",
                    _ => "Status",
                };
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
            heads
        });

        (base_url, handle)
    }

    /// Read a request head and its body, returning the lowercased head.
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending a request");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
        let content_length = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < head_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        head
    }

    fn client_for(base_url: &str, store: &SessionStore) -> ApiClient {
        ApiClient::new(base_url, Duration::from_secs(5), store.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_rejected_token_expires_session_during_resolution() {
        let (store, storage, cache) = test_store();
        storage.set(TOKEN_KEY, "persisted").unwrap();
        let (base_url, server) = serve(vec![(401, r#"{"message":"expired"}"#)]).await;

        let client = client_for(&base_url, &store);
        let mut resolver = SessionResolver::new(store.clone(), std::sync::Arc::new(client))
            .with_retry_delay(Duration::ZERO);
        assert_eq!(resolver.resolve().await, ResolverState::ResolvedUnauthenticated);

        let state = store.state();
        assert!(state.user.is_none());
        assert!(!state.is_loading);
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(cache.clears.load(Ordering::SeqCst), 1);

        let heads = server.await.unwrap();
        assert_eq!(heads.len(), 1);
        assert!(heads[0].starts_with("get /api/users/me "));
        assert!(heads[0].contains("authorization: bearer persisted"));
    }

    #[tokio::test]
    async fn test_failed_login_keeps_existing_session() {
        let (store, _, cache) = test_store();
        let user_a = User::new("a", "a@example.com", "A");
        store.login("tok-a", user_a.clone()).unwrap();
        let (base_url, server) = serve(vec![(401, r#"{"message":"bad credentials"}"#)]).await;

        let client = client_for(&base_url, &store);
        let err = client
            .login(&LoginCredentials::new("a@example.com", "wrong"))
            .await
            .unwrap_err();
        assert!(ApiError::is_unauthorized(&err));

        assert_eq!(store.user(), Some(user_a));
        assert_eq!(store.token(), Some("tok-a".to_string()));
        assert_eq!(cache.clears.load(Ordering::SeqCst), 0);

        let heads = server.await.unwrap();
        assert!(heads[0].starts_with("post /api/auth/login "));
        assert!(!heads[0].contains("authorization:"));
    }

    #[tokio::test]
    async fn test_rate_limited_request_is_retried() {
        let (store, storage, _) = test_store();
        storage.set(TOKEN_KEY, "persisted").unwrap();
        let (base_url, server) = serve(vec![(429, ""), (200, PROFILE_JSON)]).await;

        let client = client_for(&base_url, &store);
        let user = client.get_user_profile().await.unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_valid_token_resolves_to_served_profile() {
        let (store, storage, cache) = test_store();
        storage.set(TOKEN_KEY, "persisted").unwrap();
        let (base_url, server) = serve(vec![(200, PROFILE_JSON)]).await;

        let client = client_for(&base_url, &store);
        let mut resolver = SessionResolver::new(store.clone(), std::sync::Arc::new(client));
        assert_eq!(resolver.resolve().await, ResolverState::ResolvedAuthenticated);

        let state = store.state();
        assert_eq!(state.user, Some(User::new("u1", "a@b.com", "A")));
        assert!(!state.is_loading);
        assert_eq!(store.token(), Some("persisted".to_string()));
        assert_eq!(cache.clears.load(Ordering::SeqCst), 0);
        server.await.unwrap();
    }
}
