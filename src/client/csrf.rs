//! CSRF token acquisition.

use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::client::endpoint;
use crate::client::transport::{AuthTransport, FetchRequest};
use crate::error::{BridgeError, BridgeResult};

/// Fetch a fresh anti-forgery token from `{prefix}/csrf`.
///
/// Never cache the result across flows: the backend binds the token to the
/// cookie state at the time of the call.
pub async fn fetch_csrf_token<T>(transport: &T, origin: &Url, prefix: &str) -> BridgeResult<String>
where
    T: AuthTransport + ?Sized,
{
    let url = endpoint(origin, prefix, "csrf")?;
    let response = transport.fetch(FetchRequest::get(url)).await?;

    if !response.is_success() {
        return Err(BridgeError::backend("csrf", response.status, response.body));
    }

    let body: Value = serde_json::from_str(&response.body).map_err(|e| {
        BridgeError::Protocol(format!("csrf response is not valid JSON: {}", e))
    })?;

    match body.get("csrfToken").and_then(Value::as_str) {
        Some(token) if !token.is_empty() => {
            debug!("Obtained CSRF token");
            Ok(token.to_string())
        }
        _ => Err(BridgeError::Protocol(
            "csrf response has no non-empty `csrfToken` string".to_string(),
        )),
    }
}
