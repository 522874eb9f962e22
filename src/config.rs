// Bridge Configuration
// Auth engine settings shared by the session accessor and the route adapter,
// plus the settings of the bundled server binary.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{BridgeError, BridgeResult};
use crate::provider::ProviderKind;

/// Route prefix the auth engine is mounted under when nothing else is configured.
pub const DEFAULT_PREFIX: &str = "/api/auth";

/// Prefix for environment overrides, e.g. `AUTH_BRIDGE_AUTH__PREFIX`.
pub const ENV_PREFIX: &str = "AUTH_BRIDGE_";

/// Configuration of the auth engine as seen by the bridge.
///
/// The bridge treats most of it as opaque and hands it to the engine; it only
/// reads `prefix`, `url` and `trust_host` itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Route prefix (base path) of the engine, without trailing slash
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Signing secrets, newest first
    #[serde(default)]
    pub secret: Vec<String>,

    /// Trust `X-Forwarded-*` headers when reconstructing the public URL
    #[serde(default)]
    pub trust_host: Option<bool>,

    /// Public base URL of the application, if fixed
    #[serde(default)]
    pub url: Option<String>,

    /// Registered providers
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            secret: Vec::new(),
            trust_host: None,
            url: None,
            providers: Vec::new(),
        }
    }
}

impl AuthConfig {
    /// Fill unset values from the process environment.
    pub fn apply_env_defaults(&mut self) {
        self.apply_defaults_from(|key| std::env::var(key).ok());
    }

    /// Copy of this configuration with environment defaults applied.
    pub fn with_env_defaults(&self) -> Self {
        let mut config = self.clone();
        config.apply_env_defaults();
        config
    }

    /// Fill unset values using `lookup` as the environment.
    pub fn apply_defaults_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if self.prefix.is_empty() {
            self.prefix = default_prefix();
        }

        if self.secret.is_empty() {
            if let Some(secret) = lookup("AUTH_SECRET") {
                self.secret.push(secret);
            }
            for index in 1..=3 {
                if let Some(secret) = lookup(&format!("AUTH_SECRET_{}", index)) {
                    self.secret.push(secret);
                }
            }
        }

        if self.url.is_none() {
            self.url = lookup("AUTH_URL");
        }

        if self.trust_host.is_none() {
            let trust = if self.url.is_some() {
                true
            } else if let Some(flag) = lookup("AUTH_TRUST_HOST") {
                parse_flag(&flag)
            } else if lookup("VERCEL").is_some() || lookup("CF_PAGES").is_some() {
                true
            } else {
                lookup("NODE_ENV").as_deref() != Some("production")
            };
            self.trust_host = Some(trust);
        }

        for provider in &mut self.providers {
            let env_id = provider.env_key();
            if provider.client_id.is_none() {
                provider.client_id = lookup(&format!("AUTH_{}_ID", env_id));
            }
            if provider.client_secret.is_none() {
                provider.client_secret = lookup(&format!("AUTH_{}_SECRET", env_id));
            }
            if provider.issuer.is_none() {
                provider.issuer = lookup(&format!("AUTH_{}_ISSUER", env_id));
            }
        }
    }

    pub fn trusts_host(&self) -> bool {
        self.trust_host.unwrap_or(false)
    }

    /// Validate configuration values
    pub fn validate(&self) -> BridgeResult<()> {
        if !self.prefix.starts_with('/') {
            return Err(BridgeError::InvalidConfig {
                key: "prefix".to_string(),
                reason: "must start with '/'".to_string(),
            });
        }

        if self.prefix.len() > 1 && self.prefix.ends_with('/') {
            return Err(BridgeError::InvalidConfig {
                key: "prefix".to_string(),
                reason: "must not end with '/'".to_string(),
            });
        }

        if self.secret.iter().all(|s| s.is_empty()) {
            return Err(BridgeError::InvalidConfig {
                key: "secret".to_string(),
                reason: "set AUTH_SECRET or configure at least one secret".to_string(),
            });
        }

        if let Some(ref url) = self.url {
            url::Url::parse(url).map_err(|e| BridgeError::InvalidConfig {
                key: "url".to_string(),
                reason: e.to_string(),
            })?;
        }

        for provider in &self.providers {
            if provider.id.is_empty() {
                return Err(BridgeError::InvalidConfig {
                    key: "providers.id".to_string(),
                    reason: "cannot be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Look up a configured provider by id
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }
}

/// Provider entry. Only the id and category matter to the bridge; the rest is
/// forwarded to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ProviderKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: None,
            name: None,
            client_id: None,
            client_secret: None,
            issuer: None,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind.unwrap_or_else(|| ProviderKind::classify(&self.id))
    }

    /// `my-idp` -> `MY_IDP`
    fn env_key(&self) -> String {
        self.id.to_uppercase().replace('-', "_")
    }
}

/// Settings of the bundled server binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Base URL of the external auth service the engine requests are forwarded to
    #[serde(default)]
    pub upstream: Option<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            upstream: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Complete configuration file: `[auth]` and `[server]` tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl BridgeConfig {
    /// Load from an optional TOML file, then `AUTH_BRIDGE_*` overrides, then
    /// the engine's environment defaults.
    pub fn load(path: Option<&Path>) -> BridgeResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(BridgeConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: BridgeConfig =
            figment.extract().map_err(|e| BridgeError::InvalidConfig {
                key: e.path.join("."),
                reason: e.to_string(),
            })?;

        config.auth.apply_env_defaults();
        Ok(config)
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "false" | "0" | "no" | "off"
    )
}

// Default value functions
fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_listen() -> String {
    "127.0.0.1:4321".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}
