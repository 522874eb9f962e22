//! HTTP transport used by the client flows.
//!
//! The flows talk to the auth backend through [`AuthTransport`] so they can run
//! against a real HTTP client ([`ReqwestTransport`]) or a scripted fake in
//! tests. Requests mimic what a browser `fetch` with
//! `credentials: "same-origin"` and `cache: "no-store"` sends: cookies of the
//! backend origin are attached by the client's cookie store and caching is
//! disabled through `Cache-Control`.

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{BridgeError, BridgeResult};

/// Maximum response size (1MB). Auth responses are tiny JSON documents.
const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

/// Default request timeout (30 seconds)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Asks the backend to answer with `{ url }` instead of a 302.
pub const X_AUTH_RETURN_REDIRECT: &str = "x-auth-return-redirect";

pub const X_REQUESTED_WITH: &str = "x-requested-with";

/// A request issued by the client flows.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl FetchRequest {
    /// JSON GET with caching disabled, marked `X-Requested-With: XMLHttpRequest`
    /// so the engine answers as it would to a browser fetch.
    pub fn get(url: Url) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(
            HeaderName::from_static(X_REQUESTED_WITH),
            HeaderValue::from_static("XMLHttpRequest"),
        );

        Self {
            method: Method::GET,
            url,
            headers,
            body: None,
        }
    }

    /// Form-encoded POST that asks the backend for a JSON redirect answer.
    pub fn post_form(url: Url, fields: &[(String, String)]) -> BridgeResult<Self> {
        let body = serde_urlencoded::to_string(fields)
            .map_err(|e| BridgeError::Protocol(format!("cannot encode form body: {}", e)))?;

        let mut request = Self::get(url);
        request.method = Method::POST;
        request.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        request.headers.insert(
            HeaderName::from_static(X_AUTH_RETURN_REDIRECT),
            HeaderValue::from_static("1"),
        );
        request.body = Some(body);
        Ok(request)
    }

    /// Decoded form body, empty for requests without one.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        self.body
            .as_deref()
            .and_then(|body| serde_urlencoded::from_str(body).ok())
            .unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Response as seen by the client flows.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,

    /// Final URL after redirects were followed
    pub url: Url,

    /// Response headers
    pub headers: HeaderMap,

    /// Response body as string
    pub body: String,
}

impl FetchResponse {
    pub fn new(status: u16, url: Url, body: impl Into<String>) -> Self {
        Self {
            status,
            url,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Whether the request was successful (2xx status)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse JSON response body
    pub fn json<T: for<'de> serde::Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// Get response body as text
    pub fn text(&self) -> &str {
        &self.body
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthTransport: Send + Sync {
    /// Execute a request. Transport failures are `Network`/`Timeout` errors;
    /// any HTTP status is a successful fetch.
    async fn fetch(&self, request: FetchRequest) -> BridgeResult<FetchResponse>;
}

#[async_trait]
impl<T: AuthTransport + ?Sized> AuthTransport for Arc<T> {
    async fn fetch(&self, request: FetchRequest) -> BridgeResult<FetchResponse> {
        (**self).fetch(request).await
    }
}

/// [`AuthTransport`] backed by an async reqwest client with a cookie store.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    max_response_size: usize,
}

impl ReqwestTransport {
    /// Create a new transport with default settings
    pub fn new() -> BridgeResult<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| BridgeError::Network(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self::from_client(client))
    }

    /// Wrap an existing client; clones of a reqwest client share its cookie jar.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            client,
            max_response_size: MAX_RESPONSE_SIZE,
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) async fn read_response(
        response: reqwest::Response,
        max_response_size: usize,
    ) -> BridgeResult<FetchResponse> {
        let status = response.status().as_u16();
        let url = response.url().clone();
        let headers = response.headers().clone();

        if let Some(content_length) = response.content_length()
            && content_length > max_response_size as u64
        {
            return Err(BridgeError::Protocol(format!(
                "response too large: {} bytes",
                content_length
            )));
        }

        let bytes = response.bytes().await?;
        if bytes.len() > max_response_size {
            return Err(BridgeError::Protocol(format!(
                "response too large: {} bytes",
                bytes.len()
            )));
        }

        let body = String::from_utf8(bytes.to_vec())
            .map_err(|e| BridgeError::Protocol(format!("response is not UTF-8: {}", e)))?;

        Ok(FetchResponse {
            status,
            url,
            headers,
            body,
        })
    }
}

#[async_trait]
impl AuthTransport for ReqwestTransport {
    async fn fetch(&self, request: FetchRequest) -> BridgeResult<FetchResponse> {
        debug!("Fetching {} {}", request.method, request.url.path());

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        Self::read_response(response, self.max_response_size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_get_request_headers() {
        let request = FetchRequest::get(url("https://app.example.com/api/auth/csrf"));
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.header("accept"), Some("application/json"));
        assert_eq!(request.header("cache-control"), Some("no-store"));
        assert_eq!(request.header(X_REQUESTED_WITH), Some("XMLHttpRequest"));
        assert!(request.header(X_AUTH_RETURN_REDIRECT).is_none());
        assert!(request.body.is_none());
    }

    #[test]
    fn test_post_form_request() {
        let fields = vec![
            ("csrfToken".to_string(), "abc".to_string()),
            ("callbackUrl".to_string(), "/a b?x=1".to_string()),
        ];
        let request =
            FetchRequest::post_form(url("https://app.example.com/api/auth/signout"), &fields)
                .unwrap();

        assert_eq!(request.method, Method::POST);
        assert_eq!(
            request.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(request.header(X_AUTH_RETURN_REDIRECT), Some("1"));
        assert_eq!(
            request.body.as_deref(),
            Some("csrfToken=abc&callbackUrl=%2Fa+b%3Fx%3D1")
        );
        assert_eq!(request.form_fields(), fields);
    }

    #[test]
    fn test_response_helpers() {
        let response = FetchResponse::new(204, url("https://app.example.com/"), "");
        assert!(response.is_success());
        assert_eq!(response.text(), "");

        let response = FetchResponse::new(302, url("https://app.example.com/"), "{}");
        assert!(!response.is_success());
        let value: serde_json::Value = response.json().unwrap();
        assert!(value.as_object().unwrap().is_empty());
    }
}
