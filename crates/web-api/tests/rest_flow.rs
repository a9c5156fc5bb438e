mod support;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
};
use serde_json::{json, Value};
use support::{TestApp, TestUser};
use tower::ServiceExt;

async fn call(
    app: &TestApp,
    method: Method,
    uri: &str,
    user: Option<&TestUser>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", user.token));
    }
    let body = match body {
        Some(value) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_needs_no_token() {
    let app = TestApp::new().await;
    let (status, _) = call(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn creator_is_always_a_participant() {
    let app = TestApp::new().await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/conversations",
        Some(&app.alice),
        Some(json!({"participants": [app.bob.id], "title": "pair"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let participants = body["participants"].as_array().unwrap();
    assert!(participants.contains(&json!(app.alice.id)));
    assert!(participants.contains(&json!(app.bob.id)));
    assert_eq!(body["createdBy"], json!(app.alice.id));

    let id = body["id"].as_str().unwrap();
    let (status, fetched) = call(
        &app,
        Method::GET,
        &format!("/api/v1/conversations/{id}"),
        Some(&app.bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], body["id"]);
}

#[tokio::test]
async fn outsiders_cannot_see_a_conversation() {
    let app = TestApp::new().await;
    let conversation = app.conversation_with(&[app.bob.id]).await;

    let (status, body) = call(
        &app,
        Method::GET,
        &format!("/api/v1/conversations/{conversation}"),
        Some(&app.carol),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn bulk_read_counts_only_new_markers() {
    let app = TestApp::new().await;
    let conversation = app.conversation_with(&[app.bob.id]).await;

    for content in ["a", "b", "c"] {
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/v1/messages",
            Some(&app.alice),
            Some(json!({"conversationId": conversation, "content": content})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let uri = format!("/api/v1/conversations/{conversation}/read");
    let (status, body) = call(&app, Method::POST, &uri, Some(&app.bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], 3);

    let (_, body) = call(&app, Method::POST, &uri, Some(&app.bob), None).await;
    assert_eq!(body["updated"], 0);

    // 自己发的消息不算
    let (_, body) = call(&app, Method::POST, &uri, Some(&app.alice), None).await;
    assert_eq!(body["updated"], 0);
}

#[tokio::test]
async fn empty_text_message_is_rejected() {
    let app = TestApp::new().await;
    let conversation = app.conversation_with(&[app.bob.id]).await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/messages",
        Some(&app.alice),
        Some(json!({"conversationId": conversation, "content": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn typing_without_target_is_rejected() {
    let app = TestApp::new().await;
    let (status, _) = call(
        &app,
        Method::POST,
        "/api/v1/typing",
        Some(&app.alice),
        Some(json!({"isTyping": true})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/typing",
        Some(&app.alice),
        Some(json!({"recipientId": app.bob.id, "isTyping": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["delivered"], 0);
}

#[tokio::test]
async fn expired_or_forged_token_is_unauthorized() {
    let app = TestApp::new().await;
    let forged = TestUser {
        id: app.alice.id,
        token: format!("{}x", app.alice.token),
    };
    let (status, body) = call(&app, Method::GET, "/api/v1/users/online", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTHENTICATION_FAILED");

    let (status, body) = call(&app, Method::GET, "/api/v1/users/online", Some(&app.alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["users"], json!([]));
}

#[tokio::test]
async fn group_update_is_creator_only() {
    let app = TestApp::new().await;
    let (_, group) = call(
        &app,
        Method::POST,
        "/api/v1/conversations",
        Some(&app.alice),
        Some(json!({"participants": [app.bob.id], "title": "team", "isGroup": true})),
    )
    .await;
    let uri = format!("/api/v1/conversations/{}", group["id"].as_str().unwrap());
    let rename = json!({"title": "renamed"});

    let (status, _) = call(&app, Method::PATCH, &uri, Some(&app.carol), Some(rename.clone())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&app, Method::PATCH, &uri, Some(&app.bob), Some(rename)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "AUTHORIZATION_FAILED");

    let (status, body) = call(
        &app,
        Method::PATCH,
        &uri,
        Some(&app.alice),
        Some(json!({"title": "renamed", "participants": [app.carol.id]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "renamed");
    let participants = body["participants"].as_array().unwrap();
    assert!(participants.contains(&json!(app.carol.id)));
    assert!(!participants.contains(&json!(app.bob.id)));

    let (status, _) = call(&app, Method::GET, &uri, Some(&app.bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn direct_conversation_update_is_not_found() {
    let app = TestApp::new().await;
    let conversation = app.conversation_with(&[app.bob.id]).await;

    let (status, _) = call(
        &app,
        Method::PATCH,
        &format!("/api/v1/conversations/{conversation}"),
        Some(&app.alice),
        Some(json!({"title": "nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
