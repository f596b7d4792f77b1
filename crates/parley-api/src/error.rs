use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use parley_gateway::service::ChatError;
use parley_mail::MailError;

/// Central error type for the REST surface. The `IntoResponse` impl is the
/// one place that turns failures into `{"message": ...}` JSON.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid or expired OTP.")]
    InvalidOtp,

    #[error("Account not verified. Please check your email for an OTP.")]
    Unverified,

    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Failed to send OTP email.")]
    Mail(#[from] MailError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::InvalidCredentials
            | Self::InvalidOtp
            | Self::Conflict(_) => StatusCode::BAD_REQUEST,
            Self::Unverified | Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Mail(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(err) => error!("internal error: {:#}", err),
            Self::Mail(err) => error!("mail error: {}", err),
            _ => {}
        }
        let body = Json(serde_json::json!({ "message": self.to_string() }));
        (self.status(), body).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::NotFound => Self::NotFound("Conversation not found".into()),
            ChatError::NotMember => {
                Self::Forbidden("You are not a member of this conversation".into())
            }
            ChatError::EmptyContent => {
                Self::Validation("Message content must not be empty".into())
            }
            ChatError::Internal(err) => Self::Internal(err),
        }
    }
}
