//! Sign-in flow.
//!
//! OAuth-like providers must be driven by a real form navigation: a fetch
//! would follow the redirect chain to the provider's authorization page
//! inside script context and the user would never see it. Credentials and
//! email providers instead answer with JSON (`{ url }`, where the url may
//! carry `?error=...`), which the flow inspects so a caller can handle a
//! failed sign-in without leaving the page.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::client::csrf::fetch_csrf_token;
use crate::client::navigation::{FormSubmission, Navigator};
use crate::client::transport::{AuthTransport, FetchRequest, FetchResponse};
use crate::client::url_safety::normalize_to_same_origin_path;
use crate::client::{AuthClient, Navigation, endpoint, redirect_url};
use crate::error::{BridgeError, BridgeResult};
use crate::provider::ProviderKind;

/// Query parameters appended to the provider's sign-in URL.
pub type AuthorizationParams = IndexMap<String, String>;

const CSRF_FIELD: &str = "csrfToken";
const CALLBACK_FIELD: &str = "callbackUrl";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInOptions {
    /// Where to land after signing in; defaults to the current page.
    pub callback_url: Option<String>,

    /// `Some(false)` returns failed credentials/email sign-ins to the caller
    /// instead of navigating.
    pub redirect: Option<bool>,

    /// Route prefix override.
    pub prefix: Option<String>,

    /// Extra form fields forwarded verbatim, e.g. `username`/`password`.
    #[serde(flatten)]
    pub fields: IndexMap<String, String>,
}

impl SignInOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn redirect(mut self, redirect: bool) -> Self {
        self.redirect = Some(redirect);
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// Outcome encoded by the backend in the `error` query parameter of its
/// redirect URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInResult {
    Ok,
    Error { code: String },
}

impl SignInResult {
    pub fn from_redirect_url(url: Option<&str>, base: &Url) -> Self {
        let code = url
            .and_then(|url| base.join(url).ok())
            .and_then(|url| {
                url.query_pairs()
                    .find(|(key, _)| key == "error")
                    .map(|(_, value)| value.into_owned())
            })
            .filter(|code| !code.is_empty());

        match code {
            Some(code) => SignInResult::Error { code },
            None => SignInResult::Ok,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, SignInResult::Ok)
    }

    pub fn error_code(&self) -> Option<&str> {
        match self {
            SignInResult::Ok => None,
            SignInResult::Error { code } => Some(code),
        }
    }
}

/// Backend answer handed back instead of navigating.
#[derive(Debug, Clone)]
pub struct SignInResponse {
    pub response: FetchResponse,
    pub url: Option<String>,
    pub result: SignInResult,
}

#[derive(Debug, Clone)]
pub enum SignInOutcome {
    /// A form navigation was dispatched; the page is leaving.
    FormSubmitted { action: Url },

    /// The page was sent to the post-sign-in target.
    Navigated(Navigation),

    /// `redirect: false` and the backend reported an error.
    Returned(SignInResponse),
}

impl<T, N> AuthClient<T, N>
where
    T: AuthTransport,
    N: Navigator,
{
    /// Sign in with `provider_id`.
    ///
    /// A CSRF token is fetched first; its failure aborts the flow before
    /// anything is submitted.
    pub async fn sign_in(
        &self,
        provider_id: &str,
        options: SignInOptions,
        authorization_params: &AuthorizationParams,
    ) -> BridgeResult<SignInOutcome> {
        if provider_id.is_empty() {
            return Err(BridgeError::MissingProvider);
        }

        let current = self.navigator.current_url();
        let callback_url = normalize_to_same_origin_path(
            options.callback_url.as_deref().unwrap_or(current.as_str()),
            &current,
        );
        let prefix = options.prefix.as_deref().unwrap_or(&self.prefix);
        let kind = ProviderKind::classify(provider_id);

        let mut target = endpoint(
            &current,
            prefix,
            &format!("{}/{}", kind.sign_in_action(), provider_id),
        )?;
        if !authorization_params.is_empty() {
            target
                .query_pairs_mut()
                .extend_pairs(authorization_params.iter());
        }

        debug!(provider = provider_id, ?kind, "Starting sign-in");

        let csrf_token = fetch_csrf_token(&self.transport, &current, prefix).await?;

        let mut fields = vec![
            (CSRF_FIELD.to_string(), csrf_token),
            (CALLBACK_FIELD.to_string(), callback_url.clone()),
        ];
        fields.extend(
            options
                .fields
                .iter()
                .filter(|(name, _)| name.as_str() != CSRF_FIELD && name.as_str() != CALLBACK_FIELD)
                .map(|(name, value)| (name.clone(), value.clone())),
        );

        if !kind.supports_return() {
            self.navigator
                .submit_form(FormSubmission {
                    action: target.clone(),
                    fields,
                })
                .await?;
            info!(provider = provider_id, "Sign-in form submitted");
            return Ok(SignInOutcome::FormSubmitted { action: target });
        }

        let response = self
            .transport
            .fetch(FetchRequest::post_form(target, &fields)?)
            .await?;
        let url = redirect_url(kind.sign_in_action(), &response)?;
        let result = SignInResult::from_redirect_url(url.as_deref(), &current);

        if options.redirect.unwrap_or(true) || result.is_ok() {
            let candidate = url.unwrap_or_else(|| response.url.to_string());
            let navigation = self
                .land(Some(&candidate), &callback_url, &current)
                .await?;
            info!(provider = provider_id, "Signed in");
            return Ok(SignInOutcome::Navigated(navigation));
        }

        info!(
            provider = provider_id,
            error = result.error_code().unwrap_or_default(),
            "Sign-in failed, returning response to caller"
        );
        Ok(SignInOutcome::Returned(SignInResponse {
            response,
            url,
            result,
        }))
    }
}
