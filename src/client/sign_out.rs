//! Sign-out flow.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::csrf::fetch_csrf_token;
use crate::client::navigation::Navigator;
use crate::client::transport::{AuthTransport, FetchRequest};
use crate::client::url_safety::normalize_to_same_origin_path;
use crate::client::{AuthClient, Navigation, endpoint, redirect_url};
use crate::error::BridgeResult;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOutOptions {
    /// Where to land after signing out; defaults to the current page.
    pub callback_url: Option<String>,

    /// Route prefix override.
    pub prefix: Option<String>,
}

impl SignOutOptions {
    pub fn callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

impl<T, N> AuthClient<T, N>
where
    T: AuthTransport,
    N: Navigator,
{
    /// Sign out and navigate to the backend's (same-origin) answer.
    pub async fn sign_out(&self, options: SignOutOptions) -> BridgeResult<Navigation> {
        let current = self.navigator.current_url();
        let callback_url = normalize_to_same_origin_path(
            options.callback_url.as_deref().unwrap_or(current.as_str()),
            &current,
        );
        let prefix = options.prefix.as_deref().unwrap_or(&self.prefix);

        debug!("Starting sign-out");

        let csrf_token = fetch_csrf_token(&self.transport, &current, prefix).await?;
        let fields = vec![
            ("csrfToken".to_string(), csrf_token),
            ("callbackUrl".to_string(), callback_url.clone()),
        ];

        let target = endpoint(&current, prefix, "signout")?;
        let response = self
            .transport
            .fetch(FetchRequest::post_form(target, &fields)?)
            .await?;
        let url = redirect_url("signout", &response)?;

        let navigation = self.land(url.as_deref(), &callback_url, &current).await?;
        info!("Signed out");
        Ok(navigation)
    }
}
