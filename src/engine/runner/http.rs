use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

use crate::engine::Serve;

/// Binds the port, then serves on a thread of its own. A port which is
/// already taken is reported here, before anything else starts.
pub(crate) fn start(
    target: &Serve,
    port: u16,
    script: Option<String>,
) -> std::io::Result<thread::JoinHandle<Result<(), anyhow::Error>>> {
    let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port)))?;
    listener.set_nonblocking(true)?;

    let router = router(target, script);

    info!(url = %style(format!("http://localhost:{port}/")).yellow(), "starting a HTTP server");

    Ok(thread::spawn(move || {
        let result = super::runtime()
            .map_err(anyhow::Error::from)
            .and_then(|rt| rt.block_on(serve(listener, router)));

        if let Err(e) = &result {
            tracing::error!("HTTP server stopped: {e}");
        }

        result
    }))
}

async fn serve(listener: std::net::TcpListener, router: Router) -> Result<(), anyhow::Error> {
    let listener = tokio::net::TcpListener::from_std(listener)?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Base directories are chained through fallbacks, so the first one which
/// has the requested file answers.
fn router(target: &Serve, script: Option<String>) -> Router {
    let mut router = Router::new();

    for dir in target.base_dirs.iter().rev() {
        router = Router::new().fallback_service(ServeDir::new(dir).fallback(router));
    }

    for (route, dir) in &target.routes {
        router = router.nest_service(route, ServeDir::new(dir));
    }

    match script {
        Some(script) => router.layer(middleware::from_fn_with_state(
            Arc::<str>::from(script),
            inject,
        )),
        None => router,
    }
}

async fn inject(State(script): State<Arc<str>>, request: Request, next: Next) -> Response {
    let is_get = request.method() == Method::GET;
    let response = next.run(request).await;

    if !should_inject(is_get, response.status(), response.headers()) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let Ok(bytes) = axum::body::to_bytes(body, usize::MAX).await else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let html = inject_script(&String::from_utf8_lossy(&bytes), &script);
    parts.headers.remove(header::CONTENT_LENGTH);

    Response::from_parts(parts, Body::from(html))
}

/// Only whole HTML documents get the script. Partial content and bodiless
/// responses to `HEAD` pass through untouched.
fn should_inject(is_get: bool, status: StatusCode, headers: &HeaderMap) -> bool {
    let is_html = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));

    is_get && status == StatusCode::OK && is_html
}

/// Inserts the script right before the closing body tag, or appends it to
/// documents which have none.
fn inject_script(html: &str, script: &str) -> String {
    let tag = format!("<script>{script}</script>");

    match html.rfind("</body>") {
        Some(i) => format!("{}{}{}", &html[..i], tag, &html[i..]),
        None => format!("{html}{tag}"),
    }
}
