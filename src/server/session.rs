// Server Session Accessor
// Asks the auth engine "who is signed in" on behalf of a host-rendered page

use axum::{
    body::{Body, to_bytes},
    http::{HeaderMap, HeaderValue, Method, Request, Uri, header},
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::engine::AuthEngine;
use crate::config::AuthConfig;
use crate::error::{BridgeError, BridgeResult};

/// Largest session payload accepted from the engine (1MB).
const MAX_SESSION_BODY: usize = 1024 * 1024;

/// Session payload exactly as the engine produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Session(Value);

impl Session {
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn user(&self) -> Option<&Value> {
        self.get("user")
    }

    /// `expires` parsed as an RFC 3339 timestamp.
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.get("expires")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

fn first_header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn is_loopback(host: &str) -> bool {
    let name = host.rsplit_once(':').map_or(host, |(name, port)| {
        if port.chars().all(|c| c.is_ascii_digit()) {
            name
        } else {
            host
        }
    });
    matches!(name, "localhost" | "127.0.0.1" | "[::1]")
}

/// Public origin (and base path, when `url` is configured) of the application.
///
/// The configured `url` wins. Otherwise it is rebuilt from the request:
/// `X-Forwarded-Proto`/`X-Forwarded-Host` when the host is trusted, then the
/// `Host` header and the request URI.
pub fn public_base(uri: &Uri, headers: &HeaderMap, config: &AuthConfig) -> BridgeResult<Url> {
    if let Some(url) = config.url.as_deref() {
        return Ok(Url::parse(url)?);
    }

    let forwarded = |name: &str| {
        if config.trusts_host() {
            first_header_value(headers, name)
        } else {
            None
        }
    };

    let host = forwarded("x-forwarded-host")
        .or_else(|| first_header_value(headers, header::HOST.as_str()))
        .or_else(|| uri.authority().map(|a| a.as_str().to_string()))
        .ok_or_else(|| BridgeError::InvalidUrl("cannot determine the request host".to_string()))?;

    let protocol = forwarded("x-forwarded-proto")
        .or_else(|| uri.scheme_str().map(str::to_string))
        .unwrap_or_else(|| {
            if is_loopback(&host) {
                "http".to_string()
            } else {
                "https".to_string()
            }
        });

    Ok(Url::parse(&format!(
        "{}://{}",
        protocol.trim_end_matches(':'),
        host
    ))?)
}

/// Public URL of an engine action, e.g. `https://app.example.com/api/auth/session`.
pub fn action_url(
    action: &str,
    uri: &Uri,
    headers: &HeaderMap,
    config: &AuthConfig,
) -> BridgeResult<Url> {
    let base = public_base(uri, headers, config)?;

    let mut url = base.clone();
    url.set_path(&format!(
        "{}/{}/{}",
        base.path().trim_end_matches('/'),
        config.prefix.trim_matches('/'),
        action
    ));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Look up the session of the user behind `request`.
///
/// Only the `cookie` header is forwarded to the engine. `Set-Cookie` headers
/// of the engine's answer (a renewed session) are appended one by one to
/// `outbound`, when the caller has a response to put them on.
///
/// The request is only read before the returned future starts, so the future
/// stays `Send` whatever the request body type.
pub fn get_session<E, B>(
    engine: &E,
    request: &Request<B>,
    config: &AuthConfig,
    outbound: Option<&mut HeaderMap>,
) -> impl Future<Output = BridgeResult<Option<Session>>> + Send
where
    E: AuthEngine + ?Sized,
{
    let prepared = session_request(request, config);
    async move {
        let (engine_request, config) = prepared?;
        let response = engine.handle(engine_request, &config).await?;
        read_session(response, outbound).await
    }
}

/// Synthetic `GET {prefix}/session` carrying only the caller's cookies.
fn session_request<B>(
    request: &Request<B>,
    config: &AuthConfig,
) -> BridgeResult<(Request<Body>, AuthConfig)> {
    let config = config.with_env_defaults();
    let url = action_url("session", request.uri(), request.headers(), &config)?;

    let mut builder = Request::builder()
        .method(Method::GET)
        .uri(url.as_str())
        .header(header::ACCEPT, "application/json");

    // HTTP/2 may split cookies over several header lines
    let cookies: Vec<&str> = request
        .headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if !cookies.is_empty() {
        let cookie = HeaderValue::from_str(&cookies.join("; "))
            .map_err(|e| BridgeError::Protocol(format!("invalid cookie header: {}", e)))?;
        builder = builder.header(header::COOKIE, cookie);
    }

    let engine_request = builder
        .body(Body::empty())
        .map_err(|e| BridgeError::Engine(format!("cannot build session request: {}", e)))?;

    Ok((engine_request, config))
}

async fn read_session(
    response: Response,
    outbound: Option<&mut HeaderMap>,
) -> BridgeResult<Option<Session>> {
    let (parts, body) = response.into_parts();

    if let Some(outbound) = outbound {
        for value in parts.headers.get_all(header::SET_COOKIE) {
            outbound.append(header::SET_COOKIE, value.clone());
        }
    }

    let bytes = to_bytes(body, MAX_SESSION_BODY)
        .await
        .map_err(|e| BridgeError::Engine(format!("cannot read session response: {}", e)))?;
    let payload = String::from_utf8_lossy(&bytes).into_owned();

    debug!(status = parts.status.as_u16(), "Session lookup answered");

    if !parts.status.is_success() {
        return Err(BridgeError::backend(
            "session",
            parts.status.as_u16(),
            payload,
        ));
    }

    if payload.trim().is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(&payload).map_err(|e| {
        BridgeError::Protocol(format!("session response is not valid JSON: {}", e))
    })?;

    let absent = match &value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };

    Ok(if absent { None } else { Some(Session(value)) })
}
