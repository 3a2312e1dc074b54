//! Lazy OAuth refresh-token flow.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::data_source::SourceError;
use crate::http_client::{HttpClient, HttpRequest};

/// Tokens are refreshed this long before the provider-reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl Debug for OAuthCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("refresh_token", &"***")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

/// Exchanges a refresh token for an access token on first use and caches it until
/// shortly before it expires.
pub struct OAuthTokenProvider {
    token_url: String,
    credentials: OAuthCredentials,
    http: Arc<dyn HttpClient>,
    cached: Mutex<Option<CachedToken>>,
}

impl OAuthTokenProvider {
    pub fn new(
        token_url: impl Into<String>,
        credentials: OAuthCredentials,
        http: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            credentials,
            http,
            cached: Mutex::new(None),
        }
    }

    /// Returns the cached token, refreshing it when absent or expired.
    ///
    /// # Errors
    ///
    /// Returns an authentication error when the token endpoint is unreachable,
    /// rejects the credentials, or answers without an access token.
    pub async fn access_token(&self) -> Result<String, SourceError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh(Instant::now())) {
            return Ok(token.value.clone());
        }

        let token = self.refresh().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Drops the cached token so the next call refreshes.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn refresh(&self) -> Result<CachedToken, SourceError> {
        debug!(token_url = %self.token_url, client_id = %self.credentials.client_id, "refreshing access token");

        let request = HttpRequest::post(&self.token_url).with_form([
            ("grant_type", "refresh_token"),
            ("refresh_token", self.credentials.refresh_token.as_str()),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
        ]);

        let response = self.http.execute(request).await.map_err(|error| {
            SourceError::authentication(format!("token endpoint unreachable: {error}"))
        })?;

        let body = serde_json::from_str::<TokenResponse>(&response.body).map_err(|error| {
            SourceError::authentication(format!(
                "token endpoint returned status {} with unreadable body: {error}",
                response.status
            ))
        })?;

        if let Some(error) = body.error {
            let detail = body.error_description.unwrap_or_default();
            return Err(SourceError::authentication(format!(
                "token refresh rejected: {error} {detail}"
            )
            .trim_end()
            .to_owned()));
        }

        if !response.is_success() {
            return Err(SourceError::authentication(format!(
                "token refresh failed with status {}",
                response.status
            )));
        }

        let value = body
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| SourceError::authentication("token response has no access_token"))?;

        let expires_at = body.expires_in.and_then(|seconds| {
            Instant::now().checked_add(Duration::from_secs(seconds).saturating_sub(EXPIRY_MARGIN))
        });

        Ok(CachedToken { value, expires_at })
    }
}

/// Where a source gets its bearer token from.
pub enum AccessTokenSource {
    Static(String),
    OAuth(OAuthTokenProvider),
}

impl AccessTokenSource {
    pub async fn token(&self) -> Result<String, SourceError> {
        match self {
            Self::Static(token) if token.is_empty() => {
                Err(SourceError::authentication("access token is not configured"))
            }
            Self::Static(token) => Ok(token.clone()),
            Self::OAuth(provider) => provider.access_token().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceErrorKind;
    use crate::http_client::{HttpError, HttpResponse};
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;

    struct TokenEndpoint {
        responses: std::sync::Mutex<VecDeque<HttpResponse>>,
        requests: std::sync::Mutex<Vec<HttpRequest>>,
    }

    impl TokenEndpoint {
        fn new(responses: Vec<HttpResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: std::sync::Mutex::new(responses.into()),
                requests: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().expect("request log should not be poisoned").len()
        }
    }

    impl HttpClient for TokenEndpoint {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.requests
                .lock()
                .expect("request log should not be poisoned")
                .push(request);
            let response = self
                .responses
                .lock()
                .expect("script should not be poisoned")
                .pop_front()
                .ok_or_else(|| HttpError::new("connection refused"));
            Box::pin(async move { response })
        }
    }

    fn credentials() -> OAuthCredentials {
        OAuthCredentials {
            client_id: String::from("client"),
            client_secret: String::from("secret"),
            refresh_token: String::from("refresh"),
        }
    }

    #[tokio::test]
    async fn token_is_requested_once_and_cached() {
        let endpoint = TokenEndpoint::new(vec![HttpResponse::ok_json(
            r#"{"access_token":"tok-1","expires_in":5184000}"#,
        )]);
        let provider = OAuthTokenProvider::new("https://auth.test/token", credentials(), endpoint.clone());

        assert_eq!(provider.access_token().await.expect("token"), "tok-1");
        assert_eq!(provider.access_token().await.expect("cached token"), "tok-1");
        assert_eq!(endpoint.calls(), 1);

        let body = endpoint.requests.lock().expect("log")[0].body.clone().unwrap_or_default();
        assert!(body.starts_with("grant_type=refresh_token&refresh_token=refresh"));
    }

    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let endpoint = TokenEndpoint::new(vec![
            HttpResponse::ok_json(r#"{"access_token":"tok-1"}"#),
            HttpResponse::ok_json(r#"{"access_token":"tok-2"}"#),
        ]);
        let provider = OAuthTokenProvider::new("https://auth.test/token", credentials(), endpoint.clone());

        assert_eq!(provider.access_token().await.expect("token"), "tok-1");
        provider.invalidate().await;
        assert_eq!(provider.access_token().await.expect("token"), "tok-2");
        assert_eq!(endpoint.calls(), 2);
    }

    #[tokio::test]
    async fn rejected_grant_is_an_authentication_error() {
        let endpoint = TokenEndpoint::new(vec![HttpResponse::new(
            400,
            r#"{"error":"invalid_grant","error_description":"refresh token expired"}"#,
        )]);
        let provider = OAuthTokenProvider::new("https://auth.test/token", credentials(), endpoint);

        let error = provider.access_token().await.expect_err("grant rejected");
        assert_eq!(error.kind(), SourceErrorKind::Authentication);
        assert!(error.message().contains("invalid_grant"));
        assert!(!error.message().contains("secret"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_authentication_error() {
        let provider = OAuthTokenProvider::new(
            "https://auth.test/token",
            credentials(),
            TokenEndpoint::new(Vec::new()),
        );

        let error = provider.access_token().await.expect_err("no response");
        assert_eq!(error.code(), "source.authentication");
    }

    #[tokio::test]
    async fn empty_static_token_is_rejected() {
        let error = AccessTokenSource::Static(String::new())
            .token()
            .await
            .expect_err("empty token");
        assert_eq!(error.kind(), SourceErrorKind::Authentication);
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let rendered = format!("{:?}", credentials());
        assert!(rendered.contains("client"));
        assert!(!rendered.contains("refresh\""));
        assert!(!rendered.contains("\"secret\""));
    }
}
