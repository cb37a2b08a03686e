use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use loft_api::auth::create_token;
use loft_api::{AppStateInner, router};
use loft_db::Database;
use loft_gateway::dispatcher::Dispatcher;
use loft_types::events::{ChangeKind, Table};

const SECRET: &str = "test-secret";

struct Fixture {
    app: Router,
    dispatcher: Dispatcher,
    alice: Uuid,
    bob: Uuid,
    carol: Uuid,
    conversation: Uuid,
}

fn fixture() -> Fixture {
    let db = Database::open_in_memory().unwrap();
    let (alice, bob, carol, conversation) =
        (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    db.upsert_profile(&alice.to_string(), "Alice Martin", None).unwrap();
    db.upsert_profile(&bob.to_string(), "Bob Durand", None).unwrap();
    db.upsert_profile(&carol.to_string(), "Carol Petit", None).unwrap();
    db.create_conversation(
        &conversation.to_string(),
        Some("Loft 3"),
        "group",
        &[(&alice.to_string(), "admin"), (&bob.to_string(), "member")],
    )
    .unwrap();

    let dispatcher = Dispatcher::new();
    let state = Arc::new(AppStateInner {
        db,
        jwt_secret: SECRET.into(),
        dispatcher: dispatcher.clone(),
    });
    Fixture {
        app: router(state),
        dispatcher,
        alice,
        bob,
        carol,
        conversation,
    }
}

fn token(user: Uuid) -> String {
    create_token(SECRET, user, "someone@example.com", chrono::Duration::hours(1)).unwrap()
}

async fn call(app: &Router, method: &str, uri: &str, user: Option<Uuid>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token(user)));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn counts_require_a_token() {
    let f = fixture();
    let (status, _) = call(&f.app, "GET", "/api/notifications/unread-count", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/conversations/unread-count")
        .header(header::AUTHORIZATION, "Bearer garbage")
        .body(Body::empty())
        .unwrap();
    let response = f.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn notification_lifecycle() {
    let f = fixture();
    let mut changes = f.dispatcher.subscribe();

    let (status, created) = call(
        &f.app,
        "POST",
        "/api/notifications",
        Some(f.bob),
        Some(json!({
            "user_id": f.alice,
            "title": "Task assigned",
            "message": "Check-in at Loft 3",
            "type": "success",
            "link": "/tasks/12"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["type"], "success");

    let envelope = changes.recv().await.unwrap();
    assert_eq!(envelope.change.table, Table::Notifications);
    assert_eq!(envelope.change.kind, ChangeKind::Insert);
    assert!(envelope.audience.includes(f.alice));
    assert!(!envelope.audience.includes(f.bob));

    let (_, body) = call(&f.app, "GET", "/api/notifications/unread-count", Some(f.alice), None).await;
    assert_eq!(body, json!({ "count": 1 }));

    let id = created["id"].as_str().unwrap();
    let (status, _) = call(&f.app, "POST", &format!("/api/notifications/{id}/read"), Some(f.bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&f.app, "POST", &format!("/api/notifications/{id}/read"), Some(f.alice), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&f.app, "GET", "/api/notifications/unread-count", Some(f.alice), None).await;
    assert_eq!(body, json!({ "count": 0 }));
}

#[tokio::test]
async fn notification_for_unknown_user_is_404() {
    let f = fixture();
    let (status, _) = call(
        &f.app,
        "POST",
        "/api/notifications",
        Some(f.alice),
        Some(json!({ "user_id": Uuid::new_v4(), "title": "x", "message": "y" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn strangers_cannot_notify_each_other() {
    let f = fixture();
    let (status, _) = call(
        &f.app,
        "POST",
        "/api/notifications",
        Some(f.carol),
        Some(json!({ "user_id": f.alice, "title": "Free money", "message": "click here" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = call(&f.app, "GET", "/api/notifications/unread-count", Some(f.alice), None).await;
    assert_eq!(body, json!({ "count": 0 }));

    let (status, _) = call(
        &f.app,
        "POST",
        "/api/notifications",
        Some(f.carol),
        Some(json!({ "user_id": f.carol, "title": "Reminder", "message": "Water the plants" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn mark_all_read_reports_updated_rows() {
    let f = fixture();
    for title in ["Water bill", "Gas bill"] {
        call(
            &f.app,
            "POST",
            "/api/notifications",
            Some(f.alice),
            Some(json!({ "user_id": f.alice, "title": title, "message": "due", "type": "warning" })),
        )
        .await;
    }
    let (_, body) = call(&f.app, "POST", "/api/notifications/read-all", Some(f.alice), None).await;
    assert_eq!(body, json!({ "updated": 2 }));
}

#[tokio::test]
async fn messages_drive_unread_counts() {
    let f = fixture();
    let mut changes = f.dispatcher.subscribe();
    let conv = f.conversation;

    let (status, message) = call(
        &f.app,
        "POST",
        &format!("/api/conversations/{conv}/messages"),
        Some(f.bob),
        Some(json!({ "content": "Guests arrive at 15:00" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["sender"]["full_name"], "Bob Durand");

    let envelope = changes.recv().await.unwrap();
    assert_eq!(envelope.change.table, Table::Messages);
    assert!(envelope.audience.includes(f.alice));
    assert!(!envelope.audience.includes(f.carol));

    let (_, body) = call(&f.app, "GET", "/api/conversations/unread-count", Some(f.alice), None).await;
    assert_eq!(body, json!({ "count": 1 }));
    let (_, body) = call(&f.app, "GET", "/api/conversations/unread-count", Some(f.bob), None).await;
    assert_eq!(body, json!({ "count": 0 }));

    let (_, body) = call(&f.app, "GET", "/api/conversations/unread-by-conversation", Some(f.alice), None).await;
    let mut expected = serde_json::Map::new();
    expected.insert(conv.to_string(), json!(1));
    assert_eq!(body, Value::Object(expected));

    let (_, list) = call(&f.app, "GET", "/api/conversations", Some(f.alice), None).await;
    assert_eq!(list[0]["unread_count"], 1);
    assert_eq!(list[0]["last_message"]["content"], "Guests arrive at 15:00");
    assert_eq!(list[0]["participants"].as_array().unwrap().len(), 2);

    let (status, _) = call(&f.app, "POST", &format!("/api/conversations/{conv}/mark-read"), Some(f.alice), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = call(&f.app, "GET", "/api/conversations/unread-count", Some(f.alice), None).await;
    assert_eq!(body, json!({ "count": 0 }));
}

#[tokio::test]
async fn outsiders_are_forbidden() {
    let f = fixture();
    let conv = f.conversation;

    let (status, _) = call(&f.app, "POST", &format!("/api/conversations/{conv}/mark-read"), Some(f.carol), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &f.app,
        "POST",
        &format!("/api/conversations/{conv}/messages"),
        Some(f.carol),
        Some(json!({ "content": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = call(&f.app, "GET", "/api/conversations/unread-by-conversation", Some(f.carol), None).await;
    assert_eq!(body, json!({}));
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let f = fixture();
    let conv = f.conversation;
    let (status, _) = call(
        &f.app,
        "POST",
        &format!("/api/conversations/{conv}/messages"),
        Some(f.alice),
        Some(json!({ "content": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
