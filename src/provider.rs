//! Provider categories.
//!
//! The bridge never knows the full provider metadata; it only needs to know
//! whether a provider can report its result through a JSON response
//! (credentials, email) or must be driven through a real browser navigation
//! (everything else, OAuth-like).

use serde::{Deserialize, Serialize};

pub const CREDENTIALS: &str = "credentials";
pub const EMAIL: &str = "email";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Credentials,
    Email,
    #[serde(rename = "oauth", alias = "oidc")]
    OAuth,
}

impl ProviderKind {
    /// Classify a provider by its id. Unknown ids are OAuth-like.
    pub fn classify(provider_id: &str) -> Self {
        match provider_id {
            CREDENTIALS => ProviderKind::Credentials,
            EMAIL => ProviderKind::Email,
            _ => ProviderKind::OAuth,
        }
    }

    /// Whether the sign-in result can be inspected from a JSON response.
    pub fn supports_return(self) -> bool {
        matches!(self, ProviderKind::Credentials | ProviderKind::Email)
    }

    /// Engine action that receives the sign-in POST.
    pub fn sign_in_action(self) -> &'static str {
        match self {
            ProviderKind::Credentials => "callback",
            ProviderKind::Email | ProviderKind::OAuth => "signin",
        }
    }
}
