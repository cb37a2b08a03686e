use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tracing::warn;

use crate::connection;
use crate::dispatcher::Dispatcher;

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
    jwt_secret: Arc<str>,
}

#[derive(Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

/// `GET /realtime?token=<jwt>`: WebSocket upgrade into the change channel.
pub fn router(dispatcher: Dispatcher, jwt_secret: &str) -> Router {
    Router::new()
        .route("/realtime", get(ws_upgrade))
        .with_state(GatewayState {
            dispatcher,
            jwt_secret: Arc::from(jwt_secret),
        })
}

async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    // Browsers cannot set headers on WebSocket requests, so the token
    // travels in the query string.
    let Some(claims) = params
        .token
        .as_deref()
        .and_then(|token| connection::authenticate(token, &state.jwt_secret))
    else {
        warn!("realtime upgrade rejected: missing or invalid token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher, claims.sub))
        .into_response()
}
