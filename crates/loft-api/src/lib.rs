pub mod auth;
pub mod conversations;
pub mod convert;
pub mod middleware;
pub mod notifications;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

pub use auth::{AppState, AppStateInner};

/// All `/api` routes, behind bearer-token auth.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/conversations", get(conversations::list_conversations))
        .route("/api/conversations/unread-count", get(conversations::unread_count))
        .route(
            "/api/conversations/unread-by-conversation",
            get(conversations::unread_by_conversation),
        )
        .route("/api/conversations/{id}/mark-read", post(conversations::mark_read))
        .route("/api/conversations/{id}/messages", post(conversations::send_message))
        .route("/api/notifications", post(notifications::create_notification))
        .route("/api/notifications/unread-count", get(notifications::unread_count))
        .route("/api/notifications/read-all", post(notifications::mark_all_read))
        .route("/api/notifications/{id}/read", post(notifications::mark_read))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state)
}
