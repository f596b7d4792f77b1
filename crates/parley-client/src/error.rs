#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Refresh failed; the stored session was cleared. The embedding UI is
    /// expected to route back to its login entry point.
    #[error("session expired")]
    SessionExpired,

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("gateway connection failed: {0}")]
    Gateway(String),
}
