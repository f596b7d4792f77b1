use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use parley_api::{ApiConfig, AppStateInner, create_app};
use parley_gateway::dispatcher::Dispatcher;
use parley_gateway::service::ChatService;
use parley_mail::{Mailer, MailerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let refresh_secret = std::env::var("PARLEY_REFRESH_SECRET")
        .unwrap_or_else(|_| "dev-refresh-secret-change-me".into());
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let public_base_url = std::env::var("PARLEY_PUBLIC_URL")
        .unwrap_or_else(|_| format!("http://localhost:{}", port));
    let upload_dir = PathBuf::from(
        std::env::var("PARLEY_UPLOAD_DIR").unwrap_or_else(|_| "uploads".into()),
    );

    // Init database
    let db = Arc::new(parley_db::Database::open(&PathBuf::from(&db_path))?);

    // Mail gateway; without SMTP config, OTP codes are logged instead
    let mailer = match MailerConfig::from_env()? {
        Some(config) => Some(Mailer::new(config)?),
        None => {
            warn!("PARLEY_SMTP_HOST not set; running in dev mode, OTP codes will be logged");
            None
        }
    };

    // Shared state
    let dispatcher = Dispatcher::new();
    let chat = ChatService::new(db.clone(), dispatcher);
    let state = Arc::new(AppStateInner {
        db,
        chat,
        mailer,
        config: ApiConfig {
            jwt_secret,
            refresh_secret,
            public_base_url,
            upload_dir,
        },
    });

    let app = create_app(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
