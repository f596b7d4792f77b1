use std::sync::Arc;

use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use parley_types::api::{
    AuthResponse, PresignResponse, RefreshResponse, SignupResponse, UploadResponse,
};
use parley_types::models::{Conversation, Message, MessageKind, UserProfile};

use crate::coordinator::{RefreshCoordinator, RefreshError};
use crate::error::ClientError;
use crate::session::Session;

/// Authenticated API client. Attaches the session's access token to every
/// request; a 401 triggers a (single-flight) refresh and exactly one retry.
/// The refresh token rides in the cookie store and never surfaces here.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session: Arc<Session>,
    coordinator: RefreshCoordinator,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session: Arc::new(Session::new()),
            coordinator: RefreshCoordinator::new(),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    // -- Auth --

    pub async fn signup(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<SignupResponse, ClientError> {
        let body = json!({ "name": name, "email": email, "password": password });
        let resp = self
            .dispatch(Method::POST, "/api/auth/signup", Some(&body), None)
            .await?;
        decode(resp).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let body = json!({ "email": email, "password": password });
        let resp = self
            .dispatch(Method::POST, "/api/auth/login", Some(&body), None)
            .await?;
        let auth: AuthResponse = decode(resp).await?;
        self.session.set_access_token(auth.access_token.clone());
        self.session.set_user(auth.user.clone());
        Ok(auth)
    }

    pub async fn send_otp(&self, email: &str) -> Result<(), ClientError> {
        let body = json!({ "email": email });
        let resp = self
            .dispatch(Method::POST, "/api/auth/send-otp", Some(&body), None)
            .await?;
        decode::<serde_json::Value>(resp).await.map(|_| ())
    }

    pub async fn verify_otp(&self, email: &str, otp: &str) -> Result<AuthResponse, ClientError> {
        let body = json!({ "email": email, "otp": otp });
        let resp = self
            .dispatch(Method::POST, "/api/auth/verify-otp", Some(&body), None)
            .await?;
        let auth: AuthResponse = decode(resp).await?;
        self.session.set_access_token(auth.access_token.clone());
        self.session.set_user(auth.user.clone());
        Ok(auth)
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        let resp = self
            .dispatch(Method::POST, "/api/auth/logout", None, None)
            .await?;
        self.session.clear();
        decode::<serde_json::Value>(resp).await.map(|_| ())
    }

    // -- Users --

    pub async fn me(&self) -> Result<UserProfile, ClientError> {
        let resp = self.authed(Method::GET, "/api/users/me", None).await?;
        decode(resp).await
    }

    pub async fn list_users(&self) -> Result<Vec<UserProfile>, ClientError> {
        let resp = self.authed(Method::GET, "/api/users", None).await?;
        decode(resp).await
    }

    pub async fn search_users(&self, query: &str) -> Result<Vec<UserProfile>, ClientError> {
        let path = format!("/api/users/search?q={}", urlencode(query));
        let resp = self.authed(Method::GET, &path, None).await?;
        decode(resp).await
    }

    pub async fn update_profile(
        &self,
        name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<UserProfile, ClientError> {
        let body = json!({ "name": name, "avatar": avatar });
        let resp = self
            .authed(Method::PUT, "/api/users/update", Some(&body))
            .await?;
        let profile: UserProfile = decode(resp).await?;
        self.session.set_user(profile.clone());
        Ok(profile)
    }

    // -- Conversations --

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        let resp = self.authed(Method::GET, "/api/conversations", None).await?;
        decode(resp).await
    }

    pub async fn create_direct_conversation(
        &self,
        receiver_id: Uuid,
    ) -> Result<Conversation, ClientError> {
        let body = json!({ "receiver_id": receiver_id });
        let resp = self
            .authed(Method::POST, "/api/conversations", Some(&body))
            .await?;
        decode(resp).await
    }

    pub async fn create_group(
        &self,
        name: &str,
        member_ids: &[Uuid],
    ) -> Result<Conversation, ClientError> {
        let body = json!({ "name": name, "member_ids": member_ids });
        let resp = self
            .authed(Method::POST, "/api/conversations/group", Some(&body))
            .await?;
        decode(resp).await
    }

    pub async fn add_member(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Conversation, ClientError> {
        let path = format!("/api/conversations/{}/add-member", conversation_id);
        let body = json!({ "user_id": user_id });
        let resp = self.authed(Method::POST, &path, Some(&body)).await?;
        decode(resp).await
    }

    pub async fn remove_member(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Conversation, ClientError> {
        let path = format!("/api/conversations/{}/remove-member", conversation_id);
        let body = json!({ "user_id": user_id });
        let resp = self.authed(Method::POST, &path, Some(&body)).await?;
        decode(resp).await
    }

    pub async fn rename_conversation(
        &self,
        conversation_id: Uuid,
        name: &str,
    ) -> Result<Conversation, ClientError> {
        let path = format!("/api/conversations/{}/rename", conversation_id);
        let body = json!({ "name": name });
        let resp = self.authed(Method::PATCH, &path, Some(&body)).await?;
        decode(resp).await
    }

    // -- Messages --

    pub async fn messages(
        &self,
        conversation_id: Uuid,
        limit: Option<u32>,
        before: Option<&str>,
    ) -> Result<Vec<Message>, ClientError> {
        let mut path = format!("/api/messages/{}", conversation_id);
        let mut sep = '?';
        if let Some(limit) = limit {
            path.push_str(&format!("{}limit={}", sep, limit));
            sep = '&';
        }
        if let Some(before) = before {
            path.push_str(&format!("{}before={}", sep, urlencode(before)));
        }
        let resp = self.authed(Method::GET, &path, None).await?;
        decode(resp).await
    }

    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, ClientError> {
        let body = json!({
            "conversation_id": conversation_id,
            "content": content,
            "kind": kind,
        });
        let resp = self.authed(Method::POST, "/api/messages", Some(&body)).await?;
        decode(resp).await
    }

    pub async fn mark_read(&self, conversation_id: Uuid) -> Result<(), ClientError> {
        let path = format!("/api/messages/{}/read", conversation_id);
        let resp = self.authed(Method::POST, &path, None).await?;
        decode::<serde_json::Value>(resp).await.map(|_| ())
    }

    // -- Uploads --

    pub async fn upload_image(&self, image_base64: &str) -> Result<UploadResponse, ClientError> {
        let body = json!({ "image": image_base64 });
        let resp = self
            .authed(Method::POST, "/api/upload/image", Some(&body))
            .await?;
        decode(resp).await
    }

    pub async fn presign(&self, filename: &str) -> Result<PresignResponse, ClientError> {
        let body = json!({ "filename": filename });
        let resp = self
            .authed(Method::POST, "/api/upload/presign", Some(&body))
            .await?;
        decode(resp).await
    }

    // -- Plumbing --

    /// Send with the current token; on 401, refresh (single-flight) and
    /// retry exactly once with the new token.
    async fn authed(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, ClientError> {
        let token = self.session.access_token();
        let resp = self.dispatch(method.clone(), path, body, token).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        debug!("401 on {} {}, refreshing access token", method, path);
        let token = self.refresh_access_token().await?;
        let resp = self.dispatch(method, path, body, Some(token)).await?;
        Ok(resp)
    }

    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        token: Option<String>,
    ) -> Result<Response, ClientError> {
        let mut req = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        Ok(req.send().await?)
    }

    async fn refresh_access_token(&self) -> Result<String, ClientError> {
        let http = self.http.clone();
        let url = format!("{}/api/auth/refresh", self.base_url);

        let result = self
            .coordinator
            .run(move || async move {
                let resp = http
                    .post(&url)
                    .send()
                    .await
                    .map_err(|e| RefreshError::Transport(e.to_string()))?;
                match resp.status() {
                    StatusCode::UNAUTHORIZED => Err(RefreshError::Unauthenticated),
                    status if status.is_success() => {
                        let body: RefreshResponse = resp
                            .json()
                            .await
                            .map_err(|e| RefreshError::Transport(e.to_string()))?;
                        Ok(body.access_token)
                    }
                    status => Err(RefreshError::Transport(format!(
                        "refresh failed with {}",
                        status
                    ))),
                }
            })
            .await;

        match result {
            Ok(token) => {
                self.session.set_access_token(token.clone());
                Ok(token)
            }
            Err(err) => {
                debug!("refresh failed, clearing session: {}", err);
                self.session.clear();
                Err(ClientError::SessionExpired)
            }
        }
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let message = resp
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| format!("request failed with {}", status));

    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

fn urlencode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}
