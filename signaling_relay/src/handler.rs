//! HTTP front door
//!
//! One axum router serves the liveness probe, the health check and the two
//! WebSocket endpoints. CORS is handled by `tower-http`; any other path is a
//! 404 and is never upgraded.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tower_http::cors::CorsLayer;

use crate::lifecycle::{ConnectionContext, serve_websocket};
use crate::peer::{Role, SessionId};

/// Body of the liveness probe
pub const BANNER: &str = "WebRTC Signaling Server is running";

/// Role and session selected by an upgrade path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub role: Role,
    pub session: SessionId,
}

impl Route {
    /// Map a request path to a role and session
    ///
    /// The first segment selects the role (`ingest` or `stream`); the rest of
    /// the path, if any, is the session. Anything else is `None`.
    pub fn from_path(path: &str) -> Option<Route> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let mut segments = path.trim_start_matches('/').splitn(2, '/');

        let role = match segments.next()? {
            "ingest" => Role::Publisher,
            "stream" => Role::Viewer,
            _ => return None,
        };

        let session = segments
            .next()
            .map(|rest| rest.trim_end_matches('/'))
            .unwrap_or_default();

        Some(Route {
            role,
            session: SessionId::new(session),
        })
    }
}

/// Build the HTTP router
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`; the
/// upgrade handler logs the peer address.
pub fn router(ctx: ConnectionContext) -> axum::Router {
    axum::Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/ingest", get(ws_upgrade))
        .route("/ingest/{*session}", get(ws_upgrade))
        .route("/stream", get(ws_upgrade))
        .route("/stream/{*session}", get(ws_upgrade))
        .fallback(unknown_path)
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// GET / — liveness probe
async fn banner() -> &'static str {
    BANNER
}

/// GET /health
async fn health() -> &'static str {
    "OK"
}

async fn unknown_path(uri: Uri) -> StatusCode {
    tracing::info!(path = %uri.path(), "Unknown connection type; closing connection");
    StatusCode::NOT_FOUND
}

/// WebSocket upgrade for `/ingest` and `/stream`
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    uri: Uri,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(ctx): State<ConnectionContext>,
) -> Response {
    let Some(route) = Route::from_path(uri.path()) else {
        return unknown_path(uri).await.into_response();
    };

    let permit = match ctx.try_acquire() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    ws.on_upgrade(move |socket| async move {
        let _permit = permit;
        serve_websocket(socket, peer_addr, route, ctx).await;
    })
}
