// Client Module
// Drives the sign-in and sign-out flows of the auth backend from the page side

pub mod csrf;
pub mod navigation;
pub mod sign_in;
pub mod sign_out;
pub mod transport;
pub mod url_safety;

pub use csrf::fetch_csrf_token;
pub use navigation::{
    FormSubmission, HeadlessNavigator, NavigationEvent, Navigator, RecordingNavigator,
};
pub use sign_in::{AuthorizationParams, SignInOptions, SignInOutcome, SignInResponse, SignInResult};
pub use sign_out::SignOutOptions;
pub use transport::{AuthTransport, FetchRequest, FetchResponse, ReqwestTransport};
pub use url_safety::{normalize_to_same_origin_path, resolve_safe_redirect};

use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::DEFAULT_PREFIX;
use crate::error::{BridgeError, BridgeResult};

/// Where a flow finally sent the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub target: String,
    /// The target carried a fragment, so the page was reloaded after navigating.
    pub reloaded: bool,
}

/// Page-side entry point: sign in and sign out against the auth backend.
pub struct AuthClient<T, N> {
    transport: T,
    navigator: N,
    prefix: String,
}

impl<T, N> AuthClient<T, N>
where
    T: AuthTransport,
    N: Navigator,
{
    pub fn new(transport: T, navigator: N) -> Self {
        Self {
            transport,
            navigator,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    /// Default route prefix for flows that don't override it.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn navigator(&self) -> &N {
        &self.navigator
    }

    /// Fetch a fresh CSRF token, e.g. for a hand-built form.
    pub async fn csrf_token(&self, prefix: Option<&str>) -> BridgeResult<String> {
        let current = self.navigator.current_url();
        fetch_csrf_token(&self.transport, &current, prefix.unwrap_or(&self.prefix)).await
    }

    /// Navigate to the safe version of `candidate`, reloading when the target
    /// has a fragment since a hash-only change does not re-render the page.
    async fn land(
        &self,
        candidate: Option<&str>,
        fallback: &str,
        current: &Url,
    ) -> BridgeResult<Navigation> {
        let target = resolve_safe_redirect(candidate, fallback, current);
        self.navigator.navigate(&target).await?;

        let reloaded = target.contains('#');
        if reloaded {
            self.navigator.reload().await?;
        }

        debug!(reloaded, "Navigated to {}", target);
        Ok(Navigation { target, reloaded })
    }
}

/// `{prefix}/{path}` on the origin of `base`.
pub(crate) fn endpoint(base: &Url, prefix: &str, path: &str) -> BridgeResult<Url> {
    let url = base.join(&format!("{}/{}", prefix.trim_end_matches('/'), path))?;
    Ok(url)
}

/// The `url` member of a JSON redirect answer.
pub(crate) fn redirect_url(action: &str, response: &FetchResponse) -> BridgeResult<Option<String>> {
    let body: Value = serde_json::from_str(&response.body).map_err(|e| {
        BridgeError::Protocol(format!("{} response is not valid JSON: {}", action, e))
    })?;

    Ok(body
        .get("url")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string))
}
