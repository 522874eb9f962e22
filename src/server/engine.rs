//! The auth engine seam.
//!
//! The bridge never implements authentication itself. Everything it needs
//! from the engine is one call: take a Fetch-style request plus the
//! configuration, produce a response. [`RemoteEngine`] satisfies it by
//! forwarding to an auth service running elsewhere.

use async_trait::async_trait;
use axum::{
    body::{Body, to_bytes},
    extract::Request,
    http::{HeaderMap, HeaderValue, header},
    response::Response,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::client::transport::DEFAULT_TIMEOUT;
use super::session::public_base;
use crate::config::AuthConfig;
use crate::error::{BridgeError, BridgeResult};

/// Largest request body forwarded to a remote engine (1MB).
const MAX_FORWARD_BODY: usize = 1024 * 1024;

const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthEngine: Send + Sync {
    /// Handle a request addressed to one of the engine's actions.
    async fn handle(&self, request: Request, config: &AuthConfig) -> BridgeResult<Response>;
}

#[async_trait]
impl<E: AuthEngine + ?Sized> AuthEngine for Arc<E> {
    async fn handle(&self, request: Request, config: &AuthConfig) -> BridgeResult<Response> {
        (**self).handle(request, config).await
    }
}

/// Engine living in another service, reached over HTTP.
///
/// Requests are forwarded with the same path and query, and with
/// `X-Forwarded-Host`/`X-Forwarded-Proto` naming the public origin. Responses,
/// including every `Set-Cookie` and any redirect, come back untouched.
pub struct RemoteEngine {
    client: reqwest::Client,
    upstream: Url,
}

impl RemoteEngine {
    pub fn new(upstream: Url) -> BridgeResult<Self> {
        Self::with_timeout(upstream, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(upstream: Url, timeout: Duration) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| BridgeError::Engine(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self { client, upstream })
    }

    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// Headers sent upstream. `origin` is the public origin of the request;
    /// the engine rebuilds its own URLs and cookie names from it.
    fn forward_headers(original: &HeaderMap, origin: Option<&Url>) -> HeaderMap {
        let mut headers = original.clone();
        for name in [
            header::HOST,
            header::CONNECTION,
            header::CONTENT_LENGTH,
            header::TRANSFER_ENCODING,
        ] {
            headers.remove(name);
        }

        // Untrusted forwarding headers never reach the engine unchecked
        headers.remove(X_FORWARDED_HOST);
        headers.remove(X_FORWARDED_PROTO);

        if let Some(origin) = origin
            && let Some(host) = origin.host_str()
        {
            let host = match origin.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&host) {
                headers.insert(X_FORWARDED_HOST, value);
            }
            if let Ok(value) = HeaderValue::from_str(origin.scheme()) {
                headers.insert(X_FORWARDED_PROTO, value);
            }
        }
        headers
    }
}

#[async_trait]
impl AuthEngine for RemoteEngine {
    async fn handle(&self, request: Request, config: &AuthConfig) -> BridgeResult<Response> {
        let (parts, body) = request.into_parts();

        let origin = match public_base(&parts.uri, &parts.headers, config) {
            Ok(origin) => Some(origin),
            Err(e) => {
                warn!("Forwarding without public origin: {}", e);
                None
            }
        };

        let mut url = self.upstream.clone();
        url.set_path(parts.uri.path());
        url.set_query(parts.uri.query());

        let body = to_bytes(body, MAX_FORWARD_BODY)
            .await
            .map_err(|e| BridgeError::Engine(format!("cannot read request body: {}", e)))?;

        debug!("Forwarding {} {} to auth engine", parts.method, url.path());

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(Self::forward_headers(&parts.headers, origin.as_ref()))
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        headers.remove(header::TRANSFER_ENCODING);
        headers.remove(header::CONNECTION);
        let bytes = upstream.bytes().await?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
