use std::sync::Arc;

use axum::http::StatusCode;
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::error;
use uuid::Uuid;

use loft_db::Database;
use loft_gateway::dispatcher::Dispatcher;
use loft_types::api::Claims;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
}

/// Issue a signed session token. Sessions normally come from the hosted
/// auth service; this exists for local runs and tests.
pub fn create_token(
    secret: &str,
    user_id: Uuid,
    email: &str,
    ttl: chrono::Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let exp = (chrono::Utc::now() + ttl).timestamp() as usize;
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Run a blocking DB closure off the async runtime.
pub(crate) async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("database error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
