//! Authenticated JSON transport shared by the HTTP provider adapters.

use std::sync::Arc;

use reqwest::header::{HeaderMap, LINK};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::token::TokenManager;

/// A decoded JSON response with the headers the pagers need.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl ApiResponse {
    /// Integer value of a header such as `Total-Count` or `X-Total-Count`.
    pub fn header_u64(&self, name: &str) -> Option<u64> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }

    /// Target of the `Link: <...>; rel="next"` header, if any.
    pub fn next_link(&self) -> Option<String> {
        next_link(&self.headers)
    }
}

/// Bearer-authenticated JSON client shared by the HTTP adapters.
///
/// Holds the adapter's [`TokenManager`] once `initialize` has run. A 401 is
/// answered with exactly one forced refresh and one retry; a second 401 is an
/// authentication error. Every outbound request takes a token from the
/// shared [`RateLimiter`] first.
pub struct ApiClient {
    base_url: String,
    http: Client,
    auth: RwLock<Option<Arc<TokenManager>>>,
    limiter: Option<Arc<RateLimiter>>,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(base_url: &str, http: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            auth: RwLock::new(None),
            limiter: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Option<Arc<RateLimiter>>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub async fn set_token_manager(&self, manager: Arc<TokenManager>) {
        *self.auth.write().await = Some(manager);
    }

    pub async fn token_manager(&self) -> Option<Arc<TokenManager>> {
        self.auth.read().await.clone()
    }

    /// Resolve a path against the base URL; absolute URLs pass through.
    pub fn url(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else if path_or_url.starts_with('/') {
            format!("{}{path_or_url}", self.base_url)
        } else {
            format!("{}/{path_or_url}", self.base_url)
        }
    }

    /// Single logical GET with the 401 refresh-and-retry rule applied.
    pub async fn get(&self, path_or_url: &str, query: &[(String, String)]) -> Result<ApiResponse> {
        let url = self.url(path_or_url);
        let manager = self.token_manager().await;

        let token = match manager {
            Some(ref m) => Some(m.access_token().await?),
            None => None,
        };

        let response = self.send(&url, query, token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::decode(response, path_or_url).await;
        }

        let (Some(manager), Some(rejected)) = (manager, token) else {
            return Err(SyncError::Authentication(format!(
                "{path_or_url} requires authentication"
            )));
        };

        warn!(url = %url, "Request rejected with 401, forcing token refresh");
        let fresh = manager.force_refresh(&rejected).await?;
        let retried = self.send(&url, query, Some(&fresh)).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            return Err(SyncError::Authentication(format!(
                "{path_or_url} rejected the refreshed token"
            )));
        }
        Self::decode(retried, path_or_url).await
    }

    /// [`ApiClient::get`] wrapped in the client's retry policy.
    pub async fn get_with_retry(
        &self,
        path_or_url: &str,
        query: &[(String, String)],
    ) -> Result<ApiResponse> {
        self.retry
            .run(path_or_url, || self.get(path_or_url, query))
            .await
    }

    async fn send(
        &self,
        url: &str,
        query: &[(String, String)],
        token: Option<&str>,
    ) -> Result<reqwest::Response> {
        if let Some(ref limiter) = self.limiter {
            limiter.acquire().await;
        }
        debug!(url = %url, "GET");

        let mut request = self.http.get(url).query(query);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request
            .send()
            .await
            .map_err(|e| SyncError::from_transport(e, url))
    }

    async fn decode(response: reqwest::Response, context: &str) -> Result<ApiResponse> {
        let status = response.status();
        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|e| SyncError::from_transport(e, context))?;

        if !status.is_success() {
            return Err(SyncError::from_status(status, &headers, context, &text));
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| {
                SyncError::Serialization(format!("failed to parse response from {context}: {e}"))
            })?
        };

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

/// Parse the `rel="next"` target out of an RFC 8288 `Link` header.
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .find_map(|link| {
            let mut parts = link.split(';');
            let target = parts.next()?.trim();
            let is_next = parts.any(|p| {
                let p = p.trim().replace(' ', "");
                p == "rel=\"next\"" || p == "rel=next"
            });
            if is_next {
                Some(target.trim_start_matches('<').trim_end_matches('>').to_string())
            } else {
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{credential_key, SequenceTokenSource};
    use reqwest::header::HeaderValue;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager(source: Arc<SequenceTokenSource>) -> Arc<TokenManager> {
        Arc::new(
            TokenManager::new(credential_key(), source, chrono::Duration::minutes(5))
                .with_retry(RetryPolicy::immediate(1)),
        )
    }

    #[tokio::test]
    async fn get_sends_bearer_and_decodes_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orgs"))
            .and(query_param("limit", "1"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Total-Count", "42")
                    .set_body_json(serde_json::json!({"orgs": []})),
            )
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), Client::new());
        client
            .set_token_manager(manager(Arc::new(SequenceTokenSource::new())))
            .await;
        let response = client
            .get("/orgs", &[("limit".into(), "1".into())])
            .await
            .unwrap();
        assert_eq!(response.header_u64("x-total-count"), Some(42));
        assert!(response.body["orgs"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_401_triggers_one_refresh_and_one_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/students"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/students"))
            .and(header("authorization", "Bearer token-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let source = Arc::new(SequenceTokenSource::new());
        let client = ApiClient::new(&server.uri(), Client::new());
        client.set_token_manager(manager(source.clone())).await;

        let response = client.get("/students", &[]).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn second_401_is_authentication_error_without_further_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/students"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let source = Arc::new(SequenceTokenSource::new());
        let client = ApiClient::new(&server.uri(), Client::new());
        client.set_token_manager(manager(source.clone())).await;

        let err = client.get("/students", &[]).await.unwrap_err();
        assert!(matches!(err, SyncError::Authentication(_)));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn get_with_retry_recovers_from_5xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/schools"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/schools"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"schoolId": 1}])))
            .mount(&server)
            .await;

        let client =
            ApiClient::new(&server.uri(), Client::new()).with_retry(RetryPolicy::immediate(3));
        let response = client.get_with_retry("/schools", &[]).await.unwrap();
        assert_eq!(response.body[0]["schoolId"], 1);
    }

    #[tokio::test]
    async fn not_found_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/changeQueries/v1/availableChangeVersions"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), Client::new());
        let err = client
            .get("/changeQueries/v1/availableChangeVersions", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[test]
    fn url_resolution() {
        let client = ApiClient::new("https://sis.example.com/api/", Client::new());
        assert_eq!(client.url("/users"), "https://sis.example.com/api/users");
        assert_eq!(client.url("users"), "https://sis.example.com/api/users");
        assert_eq!(
            client.url("https://other.example.com/x?y=1"),
            "https://other.example.com/x?y=1"
        );
    }

    #[test]
    fn parses_next_link() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static(
                "<https://sis.example.com/users?offset=100&limit=100>; rel=\"next\", <https://sis.example.com/users?offset=900&limit=100>; rel=\"last\"",
            ),
        );
        assert_eq!(
            next_link(&headers).as_deref(),
            Some("https://sis.example.com/users?offset=100&limit=100")
        );
    }

    #[test]
    fn missing_next_link() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static("<https://sis.example.com/users?offset=0>; rel=\"first\""),
        );
        assert_eq!(next_link(&headers), None);
        assert_eq!(next_link(&HeaderMap::new()), None);
    }
}
