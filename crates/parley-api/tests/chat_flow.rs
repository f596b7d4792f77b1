mod common;

use axum::http::StatusCode;
use serde_json::json;

use parley_types::events::GatewayEvent;

use common::{register, send_json, test_app};

#[tokio::test]
async fn direct_conversation_creation_is_idempotent() {
    let (app, state) = test_app();
    let (token_a, _a) = register(&app, &state, "Alice", "a@x.com").await;
    let (token_b, b) = register(&app, &state, "Bob", "b@x.com").await;

    let (status, first, _) = send_json(
        &app,
        "POST",
        "/api/conversations",
        Some(&token_a),
        Some(json!({ "receiver_id": b })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["is_group"], false);
    assert_eq!(first["members"].as_array().unwrap().len(), 2);

    // Same pair again — and from the other side — returns the same id.
    let (_, second, _) = send_json(
        &app,
        "POST",
        "/api/conversations",
        Some(&token_a),
        Some(json!({ "receiver_id": b })),
    )
    .await;
    assert_eq!(first["id"], second["id"]);

    let a_id = first["members"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["email"] == "a@x.com")
        .unwrap()["id"]
        .clone();
    let (_, mirrored, _) = send_json(
        &app,
        "POST",
        "/api/conversations",
        Some(&token_b),
        Some(json!({ "receiver_id": a_id })),
    )
    .await;
    assert_eq!(first["id"], mirrored["id"]);
}

#[tokio::test]
async fn sending_updates_preview_and_both_listeners_get_one_event() {
    let (app, state) = test_app();
    let (token_a, _a) = register(&app, &state, "Alice", "a@x.com").await;
    let (token_b, b) = register(&app, &state, "Bob", "b@x.com").await;

    let (_, convo, _) = send_json(
        &app,
        "POST",
        "/api/conversations",
        Some(&token_a),
        Some(json!({ "receiver_id": b })),
    )
    .await;
    let convo_id = convo["id"].as_str().unwrap().to_string();

    // Two realtime listeners (A's and B's sessions) on the dispatcher.
    let mut rx_a = state.chat.dispatcher().subscribe();
    let mut rx_b = state.chat.dispatcher().subscribe();

    let (status, message, _) = send_json(
        &app,
        "POST",
        "/api/messages",
        Some(&token_a),
        Some(json!({ "conversation_id": convo_id, "content": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["content"], "hi");
    assert_eq!(message["kind"], "text");

    for rx in [&mut rx_a, &mut rx_b] {
        match rx.try_recv().unwrap() {
            GatewayEvent::NewMessage(event) => {
                assert_eq!(event.content, "hi");
                assert_eq!(event.conversation_id.to_string(), convo_id);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err(), "exactly one event per listener");
    }

    // The conversation preview reflects the send.
    let (_, conversations, _) =
        send_json(&app, "GET", "/api/conversations", Some(&token_b), None).await;
    let listed = &conversations.as_array().unwrap()[0];
    assert_eq!(listed["last_message"], "hi");
    assert_eq!(listed["unread_count"], 1);

    // Mark read clears the (conversation-wide) counter.
    let (status, _, _) = send_json(
        &app,
        "POST",
        &format!("/api/messages/{}/read", convo_id),
        Some(&token_b),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, conversations, _) =
        send_json(&app, "GET", "/api/conversations", Some(&token_b), None).await;
    assert_eq!(conversations.as_array().unwrap()[0]["unread_count"], 0);
}

#[tokio::test]
async fn message_listing_is_ascending_with_cursor_pagination() {
    let (app, state) = test_app();
    let (token_a, _a) = register(&app, &state, "Alice", "a@x.com").await;
    let (_token_b, b) = register(&app, &state, "Bob", "b@x.com").await;

    let (_, convo, _) = send_json(
        &app,
        "POST",
        "/api/conversations",
        Some(&token_a),
        Some(json!({ "receiver_id": b })),
    )
    .await;
    let convo_id = convo["id"].as_str().unwrap().to_string();

    for content in ["one", "two", "three"] {
        let (status, _, _) = send_json(
            &app,
            "POST",
            "/api/messages",
            Some(&token_a),
            Some(json!({ "conversation_id": convo_id, "content": content })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, messages, _) = send_json(
        &app,
        "GET",
        &format!("/api/messages/{}", convo_id),
        Some(&token_a),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = messages.as_array().unwrap().clone();
    let contents: Vec<&str> = messages
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["one", "two", "three"]);

    let timestamps: Vec<&str> = messages
        .iter()
        .map(|m| m["created_at"].as_str().unwrap())
        .collect();
    for pair in timestamps.windows(2) {
        assert!(pair[0] <= pair[1]);
    }

    // `before` the last message excludes it; `limit` caps the page.
    let cursor = messages.last().unwrap()["created_at"].as_str().unwrap();
    let encoded = cursor.replace('+', "%2B").replace(':', "%3A");
    let (_, page, _) = send_json(
        &app,
        "GET",
        &format!("/api/messages/{}?limit=1&before={}", convo_id, encoded),
        Some(&token_a),
        None,
    )
    .await;
    let page = page.as_array().unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["content"], "one");
}

#[tokio::test]
async fn non_members_are_rejected_from_messages_and_mutations() {
    let (app, state) = test_app();
    let (token_a, _a) = register(&app, &state, "Alice", "a@x.com").await;
    let (_token_b, b) = register(&app, &state, "Bob", "b@x.com").await;
    let (token_d, d) = register(&app, &state, "Dave", "d@x.com").await;

    let (_, convo, _) = send_json(
        &app,
        "POST",
        "/api/conversations",
        Some(&token_a),
        Some(json!({ "receiver_id": b })),
    )
    .await;
    let convo_id = convo["id"].as_str().unwrap().to_string();

    // Outsider cannot send, list, or mark read.
    let (status, _, _) = send_json(
        &app,
        "POST",
        "/api/messages",
        Some(&token_d),
        Some(json!({ "conversation_id": convo_id, "content": "intrusion" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = send_json(
        &app,
        "GET",
        &format!("/api/messages/{}", convo_id),
        Some(&token_d),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Member mutation on a direct conversation is invalid regardless of caller.
    let (status, _, _) = send_json(
        &app,
        "POST",
        &format!("/api/conversations/{}/add-member", convo_id),
        Some(&token_a),
        Some(json!({ "user_id": d })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn group_lifecycle_membership_and_rename() {
    let (app, state) = test_app();
    let (token_a, _a) = register(&app, &state, "Alice", "a@x.com").await;
    let (_token_b, b) = register(&app, &state, "Bob", "b@x.com").await;
    let (_token_c, c) = register(&app, &state, "Carol", "c@x.com").await;
    let (token_d, _d) = register(&app, &state, "Dave", "d@x.com").await;

    // Creator is implicit; empty name or no other member is invalid.
    let (status, _, _) = send_json(
        &app,
        "POST",
        "/api/conversations/group",
        Some(&token_a),
        Some(json!({ "name": "  ", "member_ids": [b] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send_json(
        &app,
        "POST",
        "/api/conversations/group",
        Some(&token_a),
        Some(json!({ "name": "team", "member_ids": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, group, _) = send_json(
        &app,
        "POST",
        "/api/conversations/group",
        Some(&token_a),
        Some(json!({ "name": "team", "member_ids": [b] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(group["is_group"], true);
    assert_eq!(group["name"], "team");
    assert_eq!(group["members"].as_array().unwrap().len(), 2);
    let group_id = group["id"].as_str().unwrap().to_string();

    // Non-members cannot mutate membership or rename.
    let (status, _, _) = send_json(
        &app,
        "POST",
        &format!("/api/conversations/{}/add-member", group_id),
        Some(&token_d),
        Some(json!({ "user_id": c })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = send_json(
        &app,
        "PATCH",
        &format!("/api/conversations/{}/rename", group_id),
        Some(&token_d),
        Some(json!({ "name": "hijacked" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // A member adds Carol; adding twice is a no-op, not an error.
    for _ in 0..2 {
        let (status, group, _) = send_json(
            &app,
            "POST",
            &format!("/api/conversations/{}/add-member", group_id),
            Some(&token_a),
            Some(json!({ "user_id": c })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(group["members"].as_array().unwrap().len(), 3);
    }

    let (status, group, _) = send_json(
        &app,
        "PATCH",
        &format!("/api/conversations/{}/rename", group_id),
        Some(&token_a),
        Some(json!({ "name": "renamed team" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(group["name"], "renamed team");

    let (status, group, _) = send_json(
        &app,
        "POST",
        &format!("/api/conversations/{}/remove-member", group_id),
        Some(&token_a),
        Some(json!({ "user_id": b })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(group["members"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn user_search_and_profile_update() {
    let (app, state) = test_app();
    let (token_a, _a) = register(&app, &state, "Alice Carter", "a@x.com").await;
    let _ = register(&app, &state, "Bob", "b@x.com").await;

    let (status, hits, _) = send_json(
        &app,
        "GET",
        "/api/users/search?q=cart",
        Some(&token_a),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["name"], "Alice Carter");

    let (_, empty, _) = send_json(&app, "GET", "/api/users/search", Some(&token_a), None).await;
    assert!(empty.as_array().unwrap().is_empty());

    let (status, profile, _) = send_json(
        &app,
        "PUT",
        "/api/users/update",
        Some(&token_a),
        Some(json!({ "name": "Alice C.", "avatar": "http://localhost:3000/uploads/me.png" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["name"], "Alice C.");
    assert_eq!(profile["avatar"], "http://localhost:3000/uploads/me.png");

    let (_, users, _) = send_json(&app, "GET", "/api/users", Some(&token_a), None).await;
    assert_eq!(users.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn image_upload_returns_a_served_url() {
    let (app, state) = test_app();
    let (token_a, _a) = register(&app, &state, "Alice", "a@x.com").await;

    let (status, body, _) = send_json(
        &app,
        "POST",
        "/api/upload/image",
        Some(&token_a),
        Some(json!({ "image": "data:image/png;base64,aGVsbG8=" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let url = body["url"].as_str().unwrap();
    assert!(url.starts_with("http://localhost:3000/uploads/"));
    assert!(url.ends_with(".png"));

    // The stored file exists and holds the decoded bytes.
    let filename = url.rsplit('/').next().unwrap();
    let stored = std::fs::read(state.config.upload_dir.join(filename)).unwrap();
    assert_eq!(stored, b"hello");

    let (status, _, _) = send_json(
        &app,
        "POST",
        "/api/upload/image",
        Some(&token_a),
        Some(json!({ "image": "not base64!!!" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body, _) = send_json(
        &app,
        "POST",
        "/api/upload/presign",
        Some(&token_a),
        Some(json!({ "filename": "holiday photo.png" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["upload_url"], body["file_url"]);
    assert!(body["file_url"].as_str().unwrap().ends_with("holidayphoto.png"));
}
