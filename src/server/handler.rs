//! Route handler adapter.
//!
//! Puts the engine behind a path-prefix guard inside an axum application.
//! Requests under `{prefix}/` go to the engine and its response is returned
//! as-is; everything else is handed back so the host router can continue.

use axum::{
    Router,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
};
use std::sync::Arc;
use tracing::{debug, error};

use super::engine::AuthEngine;
use super::session::{Session, get_session};
use crate::config::AuthConfig;
use crate::error::BridgeResult;

/// Result of offering a request to the adapter.
#[derive(Debug)]
pub enum Dispatch {
    Handled(Response),
    /// Not an auth route; the untouched request is handed back.
    Unhandled(Request),
}

pub struct AuthHandler<E: ?Sized> {
    config: Arc<AuthConfig>,
    engine: Arc<E>,
}

impl<E: ?Sized> Clone for AuthHandler<E> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<E> AuthHandler<E>
where
    E: AuthEngine + ?Sized + 'static,
{
    /// Environment defaults are applied to `config` once, here.
    pub fn new(engine: Arc<E>, mut config: AuthConfig) -> Self {
        config.apply_env_defaults();
        Self {
            config: Arc::new(config),
            engine,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn prefix(&self) -> &str {
        self.config.prefix.trim_end_matches('/')
    }

    /// Whether `path` belongs to the engine.
    pub fn matches(&self, path: &str) -> bool {
        path.strip_prefix(self.prefix())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    pub async fn dispatch(&self, request: Request) -> Dispatch {
        if !self.matches(request.uri().path()) {
            return Dispatch::Unhandled(request);
        }

        debug!("Dispatching {} {} to auth engine", request.method(), request.uri().path());

        match self.engine.handle(request, &self.config).await {
            Ok(response) => Dispatch::Handled(response),
            Err(e) => {
                error!("Auth engine failed: {}", e);
                Dispatch::Handled(e.into_response())
            }
        }
    }

    /// Session of the user behind `request`; see [`get_session`].
    pub fn session<B>(
        &self,
        request: &axum::http::Request<B>,
        outbound: Option<&mut HeaderMap>,
    ) -> impl Future<Output = BridgeResult<Option<Session>>> + Send {
        get_session(self.engine.as_ref(), request, &self.config, outbound)
    }

    /// Router exposing the engine for GET and POST under the prefix.
    pub fn router(self) -> Router {
        let path = format!("{}/{{*action}}", self.prefix());
        Router::new()
            .route(&path, get(serve::<E>).post(serve::<E>))
            .with_state(self)
    }
}

async fn serve<E>(State(handler): State<AuthHandler<E>>, request: Request) -> Response
where
    E: AuthEngine + ?Sized + 'static,
{
    match handler.dispatch(request).await {
        Dispatch::Handled(response) => response,
        Dispatch::Unhandled(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Middleware that answers auth routes and passes everything else on.
///
/// ```ignore
/// let app = Router::new()
///     .route("/", get(page))
///     .layer(axum::middleware::from_fn_with_state(handler, auth_middleware));
/// ```
pub async fn auth_middleware<E>(
    State(handler): State<AuthHandler<E>>,
    request: Request,
    next: Next,
) -> Response
where
    E: AuthEngine + ?Sized + 'static,
{
    match handler.dispatch(request).await {
        Dispatch::Handled(response) => response,
        Dispatch::Unhandled(request) => next.run(request).await,
    }
}
