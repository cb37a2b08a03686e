use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use loft_types::api::{
    Claims, CreateNotificationRequest, MarkAllReadResponse, SuccessResponse, UnreadCountResponse,
};

use crate::auth::{AppState, run_db};
use crate::convert;

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub.to_string();
    let count = run_db(&state, move |db| db.count_unread_notifications(&user_id)).await?;
    Ok(Json(UnreadCountResponse { count }))
}

/// Create a notification and push it to the recipient's sessions.
/// Business rules (due bills, overdue payments, task assignment) call this.
/// The caller must be the recipient or share a conversation with them.
pub async fn create_notification(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateNotificationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.title.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let id = Uuid::new_v4().to_string();
    let owner = req.user_id;
    let uid = owner.to_string();
    let caller = claims.sub.to_string();
    let kind = req.kind;

    let row = run_db(&state, move |db| {
        if db.get_profile(&uid)?.is_none() {
            return Ok(Err(StatusCode::NOT_FOUND));
        }
        if caller != uid && !db.shares_conversation(&caller, &uid)? {
            return Ok(Err(StatusCode::FORBIDDEN));
        }
        let row = db.insert_notification(
            &id,
            &uid,
            &req.title,
            &req.message,
            kind.as_str(),
            req.link.as_deref(),
        )?;
        Ok(Ok(row))
    })
    .await??;

    let notification = convert::notification(&row);
    match serde_json::to_value(&notification) {
        Ok(value) => {
            let receivers = state.dispatcher.notification_inserted(owner, value);
            info!(
                notification_id = %notification.id,
                user_id = %owner,
                kind = notification.kind.as_str(),
                receivers,
                "notification published"
            );
        }
        Err(e) => warn!("failed to encode notification change: {}", e),
    }

    Ok((StatusCode::CREATED, Json(notification)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let nid = notification_id.to_string();
    let uid = claims.sub.to_string();

    let updated = run_db(&state, move |db| db.mark_notification_read(&nid, &uid)).await?;
    if !updated {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let uid = claims.sub.to_string();
    let updated = run_db(&state, move |db| db.mark_all_notifications_read(&uid)).await?;
    Ok(Json(MarkAllReadResponse { updated }))
}
