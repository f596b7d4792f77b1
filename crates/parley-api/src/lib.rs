pub mod auth;
pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod uploads;
pub mod users;
pub mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, patch, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use parley_db::Database;
use parley_gateway::service::ChatService;
use parley_mail::Mailer;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub chat: ChatService,
    /// `None` means dev mode: OTP codes are logged instead of emailed.
    pub mailer: Option<Mailer>,
    pub config: ApiConfig,
}

pub struct ApiConfig {
    pub jwt_secret: String,
    pub refresh_secret: String,
    /// Externally reachable base URL, used to build upload URLs.
    pub public_base_url: String,
    pub upload_dir: PathBuf,
}

pub fn create_app(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/refresh", post(auth::refresh))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/send-otp", post(auth::send_otp))
        .route("/api/auth/verify-otp", post(auth::verify_otp))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/users/me", get(users::me))
        .route("/api/users/update", put(users::update_profile))
        .route("/api/users", get(users::list_users))
        .route("/api/users/search", get(users::search_users))
        .route(
            "/api/conversations",
            get(conversations::list_conversations).post(conversations::create_direct),
        )
        .route("/api/conversations/group", post(conversations::create_group))
        .route(
            "/api/conversations/{conversation_id}/add-member",
            post(conversations::add_member),
        )
        .route(
            "/api/conversations/{conversation_id}/remove-member",
            post(conversations::remove_member),
        )
        .route(
            "/api/conversations/{conversation_id}/rename",
            patch(conversations::rename),
        )
        .route(
            "/api/messages/{conversation_id}",
            get(messages::list_messages),
        )
        .route("/api/messages", post(messages::send_message))
        .route(
            "/api/messages/{conversation_id}/read",
            post(messages::mark_read),
        )
        .route("/api/upload/image", post(uploads::upload_image))
        .route("/api/upload/presign", post(uploads::presign))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .with_state(state.clone());

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .nest_service("/uploads", ServeDir::new(&state.config.upload_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
