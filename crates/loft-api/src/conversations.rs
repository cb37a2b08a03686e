use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use loft_types::api::{
    Claims, SendMessageRequest, SuccessResponse, UnreadByConversation, UnreadCountResponse,
};
use loft_types::models::Conversation;

use crate::auth::{AppState, run_db};
use crate::convert;

const MAX_MESSAGE_LEN: usize = 4000;

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub.to_string();

    let conversations = run_db(&state, move |db| {
        let unread: HashMap<String, u32> = db.unread_by_conversation(&user_id)?.into_iter().collect();
        let mut out: Vec<Conversation> = Vec::new();
        for row in db.list_conversations(&user_id)? {
            let participants = db
                .get_participants(&row.id)?
                .iter()
                .map(convert::participant)
                .collect();
            let last_message = db.last_message(&row.id)?.as_ref().map(convert::message);
            let unread_count = unread.get(&row.id).copied().unwrap_or(0);
            out.push(convert::conversation(&row, participants, last_message, unread_count));
        }
        Ok(out)
    })
    .await?;

    Ok(Json(conversations))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub.to_string();
    let count = run_db(&state, move |db| db.count_unread_messages(&user_id)).await?;
    Ok(Json(UnreadCountResponse { count }))
}

/// Failures degrade to an empty map; clients treat a missing entry as 0.
pub async fn unread_by_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Json<UnreadByConversation> {
    let user_id = claims.sub.to_string();
    let rows = match run_db(&state, move |db| db.unread_by_conversation(&user_id)).await {
        Ok(rows) => rows,
        Err(_) => return Json(UnreadByConversation::new()),
    };

    let map = rows
        .into_iter()
        .filter_map(|(id, count)| match id.parse::<Uuid>() {
            Ok(id) => Some((id, count)),
            Err(e) => {
                warn!("Corrupt conversation id '{}': {}", id, e);
                None
            }
        })
        .collect();
    Json(map)
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let cid = conversation_id.to_string();
    let uid = claims.sub.to_string();

    let updated = run_db(&state, move |db| db.mark_conversation_read(&cid, &uid)).await?;
    if !updated {
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(Json(SuccessResponse { success: true }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let content = req.content.trim().to_string();
    if content.is_empty() || content.len() > MAX_MESSAGE_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }
    let message_type = req.message_type.unwrap_or_default();

    let message_id = Uuid::new_v4().to_string();
    let cid = conversation_id.to_string();
    let sender = claims.sub.to_string();

    let inserted = run_db(&state, move |db| {
        if !db.is_participant(&cid, &sender)? {
            return Ok(None);
        }
        let row = db.insert_message(&message_id, &cid, &sender, &content, message_type.as_str())?;
        let participants = db.participant_ids(&cid)?;
        let conversation = db.get_conversation(&cid)?;
        Ok(Some((row, participants, conversation)))
    })
    .await?;

    let Some((row, participant_ids, conversation)) = inserted else {
        return Err(StatusCode::FORBIDDEN);
    };

    let message = convert::message(&row);
    let audience: Vec<Uuid> = participant_ids
        .iter()
        .filter_map(|id| id.parse().ok())
        .collect();

    match serde_json::to_value(&message) {
        Ok(value) => {
            let receivers = state.dispatcher.message_inserted(audience.iter().copied(), value);
            info!(
                message_id = %message.id,
                conversation_id = %conversation_id,
                receivers,
                "message published"
            );
        }
        Err(e) => warn!("failed to encode message change: {}", e),
    }

    if let Some(conversation) = conversation {
        let summary = convert::conversation(&conversation, Vec::new(), None, 0);
        if let Ok(value) = serde_json::to_value(&summary) {
            state.dispatcher.conversation_updated(audience, value);
        }
    }

    Ok((StatusCode::CREATED, Json(message)))
}
