use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use parley_api::{ApiConfig, AppState, AppStateInner, create_app};
use parley_db::Database;
use parley_gateway::dispatcher::Dispatcher;
use parley_gateway::service::ChatService;

pub fn test_app() -> (Router, AppState) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let dispatcher = Dispatcher::new();
    let chat = ChatService::new(db.clone(), dispatcher);

    let state = Arc::new(AppStateInner {
        db,
        chat,
        mailer: None,
        config: ApiConfig {
            jwt_secret: "test-secret".into(),
            refresh_secret: "test-refresh-secret".into(),
            public_base_url: "http://localhost:3000".into(),
            upload_dir: std::env::temp_dir().join(format!("parley-test-{}", Uuid::new_v4())),
        },
    });

    (create_app(state.clone()), state)
}

pub async fn send_json(
    app: &Router,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value, HeaderMap) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };

    (status, json, headers)
}

/// Signup + OTP verification in one step; returns (access_token, user_id).
/// The OTP is read back from the database, the same way an inbox would
/// receive it.
pub async fn register(app: &Router, state: &AppState, name: &str, email: &str) -> (String, Uuid) {
    let (status, _, _) = send_json(
        app,
        "POST",
        "/api/auth/signup",
        None,
        Some(serde_json::json!({
            "name": name,
            "email": email,
            "password": "hunter2-hunter2",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let otp = state
        .db
        .get_user_by_email(email)
        .unwrap()
        .unwrap()
        .otp
        .expect("signup stores an OTP");

    let (status, body, _) = send_json(
        app,
        "POST",
        "/api/auth/verify-otp",
        None,
        Some(serde_json::json!({ "email": email, "otp": otp })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let token = body["access_token"].as_str().unwrap().to_string();
    let user_id: Uuid = body["user"]["id"].as_str().unwrap().parse().unwrap();
    (token, user_id)
}
