use anyhow::Context;
use auth_bridge::{
    AuthEngine, AuthHandler, BridgeConfig, RemoteEngine, auth_middleware, init_tracing,
};
use axum::{
    Router,
    extract::{Request, State},
    http::HeaderMap,
    middleware::from_fn_with_state,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use html_escape::encode_text;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use url::Url;

#[derive(Debug, Parser)]
#[command(name = "auth-bridge", about = "Serve an auth engine behind a route prefix")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overrides `server.listen`
    #[arg(short, long)]
    listen: Option<String>,

    /// Base URL of the auth service, overrides `server.upstream`
    #[arg(short, long)]
    upstream: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mut config = BridgeConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(upstream) = args.upstream {
        config.server.upstream = Some(upstream);
    }
    config.auth.validate()?;

    let upstream = config
        .server
        .upstream
        .as_deref()
        .context("no upstream auth service configured (--upstream or server.upstream)")?;
    let upstream = Url::parse(upstream).context("invalid upstream URL")?;

    let engine = RemoteEngine::with_timeout(upstream.clone(), config.server.request_timeout())?;
    let handler = AuthHandler::new(Arc::new(engine), config.auth.clone());

    let app = Router::new()
        .route("/", get(home::<RemoteEngine>))
        .with_state(handler.clone())
        .layer(from_fn_with_state(handler, auth_middleware::<RemoteEngine>))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("cannot bind {}", config.server.listen))?;
    info!(
        "Listening on {}, auth routes under {} forwarded to {}",
        listener.local_addr()?,
        config.auth.prefix,
        upstream
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested, stopping server");
        })
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Demo page. Cookies the engine sets while answering the session lookup are
/// relayed on every outcome, including a failed lookup.
async fn home<E>(State(handler): State<AuthHandler<E>>, request: Request) -> Response
where
    E: AuthEngine + ?Sized + 'static,
{
    let mut headers = HeaderMap::new();

    let body = match handler.session(&request, Some(&mut headers)).await {
        Ok(Some(session)) => {
            let user = session.user();
            let name = user
                .and_then(|u| u.get("name").or_else(|| u.get("email")))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown user");
            // The engine's own sign-out page carries the CSRF token its POST needs
            format!(
                "<p>Signed in as <strong>{}</strong></p>\
                 <p><a href=\"{}/signout\">Sign out</a></p>",
                encode_text(name),
                handler.prefix()
            )
        }
        Ok(None) => format!(
            "<p>Not signed in.</p><p><a href=\"{}/signin\">Sign in</a></p>",
            handler.prefix()
        ),
        Err(e) => {
            error!("Session lookup failed: {}", e);
            return (headers, e.into_response()).into_response();
        }
    };

    (headers, Html(page(&body))).into_response()
}

fn page(body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>auth-bridge</title></head>\
         <body>{}</body></html>",
        body
    )
}


#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use auth_bridge::{AuthConfig, BridgeResult};
    use axum::{
        body::{Body, to_bytes},
        http::{StatusCode, header},
    };

    /// Engine answering every request with a fixed status, body and cookie.
    struct FixedEngine {
        status: StatusCode,
        body: &'static str,
    }

    #[async_trait]
    impl AuthEngine for FixedEngine {
        async fn handle(&self, _request: Request, _config: &AuthConfig) -> BridgeResult<Response> {
            Ok(Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::SET_COOKIE, "authjs.session-token=; Path=/; Max-Age=0")
                .body(Body::from(self.body))
                .unwrap())
        }
    }

    async fn render(status: StatusCode, body: &'static str) -> (StatusCode, HeaderMap, String) {
        let handler = AuthHandler::new(
            Arc::new(FixedEngine { status, body }),
            AuthConfig {
                secret: vec!["test-secret".to_string()],
                url: Some("https://app.example.com".to_string()),
                ..Default::default()
            },
        );
        let request = axum::http::Request::builder()
            .uri("/")
            .header(header::COOKIE, "authjs.session-token=stale")
            .body(Body::empty())
            .unwrap();

        let response = home(State(handler), request).await;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_failed_lookup_still_relays_cookies() {
        let (status, headers, _) =
            render(StatusCode::INTERNAL_SERVER_ERROR, "database offline").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(
            headers.get(header::SET_COOKIE).unwrap(),
            "authjs.session-token=; Path=/; Max-Age=0"
        );
    }

    #[tokio::test]
    async fn test_signed_in_page_links_to_engine_sign_out() {
        let (status, headers, body) = render(
            StatusCode::OK,
            r#"{"user":{"name":"Ada <3"},"expires":"2030-01-01T00:00:00.000Z"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(header::SET_COOKIE).is_some());
        assert!(body.contains("Signed in as <strong>Ada &lt;3</strong>"), "{}", body);
        assert!(body.contains("<a href=\"/api/auth/signout\">Sign out</a>"), "{}", body);
        assert!(!body.contains("<form"), "{}", body);
    }

    #[tokio::test]
    async fn test_anonymous_page_links_to_sign_in() {
        let (status, _, body) = render(StatusCode::OK, "{}").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<a href=\"/api/auth/signin\">Sign in</a>"), "{}", body);
    }
}
