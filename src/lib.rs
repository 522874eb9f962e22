//! Glue between an axum application and an Auth.js-style auth engine.
//!
//! The [`server`] side mounts the engine under a route prefix and lets host
//! pages read the current session. The [`client`] side drives sign-in and
//! sign-out against the engine's HTTP endpoints.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub mod client;
pub mod config;
pub mod error;
pub mod provider;
pub mod server;

pub use client::{
    AuthClient, AuthorizationParams, Navigation, SignInOptions, SignInOutcome, SignInResult,
    SignOutOptions,
};
pub use config::{AuthConfig, BridgeConfig, ProviderConfig, ServerConfig};
pub use error::{BridgeError, BridgeResult};
pub use provider::ProviderKind;
pub use server::{AuthEngine, AuthHandler, RemoteEngine, Session, auth_middleware, get_session};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the `info` default. Calling it twice is harmless.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
