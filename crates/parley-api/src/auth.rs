use anyhow::anyhow;
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::Rng;
use tracing::warn;
use uuid::Uuid;

use parley_db::models::UserRow;
use parley_types::api::{
    AuthResponse, Claims, LoginRequest, RefreshResponse, SendOtpRequest, SignupRequest,
    SignupResponse, VerifyOtpRequest,
};

use crate::AppState;
use crate::error::ApiError;

pub const REFRESH_COOKIE: &str = "refresh_token";

const ACCESS_TOKEN_DAYS: i64 = 1;
const REFRESH_TOKEN_DAYS: i64 = 7;
const OTP_VALIDITY_MINUTES: i64 = 10;

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() || req.email.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::Validation("All fields are required".into()));
    }
    if name.len() > 64 {
        return Err(ApiError::Validation(
            "Name must be at most 64 characters".into(),
        ));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation(
            "Password must be at least 8 characters".into(),
        ));
    }
    let email = normalize_email(&req.email);
    if !is_plausible_email(&email) {
        return Err(ApiError::Validation("Invalid email address".into()));
    }

    let db = state.db.clone();
    let lookup = email.clone();
    let existing = tokio::task::spawn_blocking(move || db.get_user_by_email(&lookup))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    if let Some(user) = existing {
        if user.is_verified {
            return Err(ApiError::Conflict(
                "Email already exists and is verified.".into(),
            ));
        }
        // Unverified signup retry: resend the OTP instead of failing.
        issue_otp(&state, &user.id, &user.email).await?;
        return Ok((
            StatusCode::OK,
            Json(SignupResponse {
                success: true,
                requires_otp: true,
                message: "OTP sent to your email address.".into(),
            }),
        ));
    }

    let password_hash = hash_password(&req.password)?;
    let user_id = Uuid::new_v4();

    let db = state.db.clone();
    let insert_email = email.clone();
    let insert_name = name.clone();
    tokio::task::spawn_blocking(move || {
        db.create_user(
            &user_id.to_string(),
            &insert_name,
            &insert_email,
            &password_hash,
            &parley_db::now_rfc3339(),
        )
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    issue_otp(&state, &user_id.to_string(), &email).await?;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            success: true,
            requires_otp: true,
            message: "OTP sent to your email address.".into(),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::Validation("All fields are required".into()));
    }
    let email = normalize_email(&req.email);

    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_email(&email))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??
        .ok_or(ApiError::InvalidCredentials)?;

    verify_password(&user.password, &req.password)?;

    if !user.is_verified {
        return Err(ApiError::Unverified);
    }

    finish_auth(&state, jar, user, "Login successful")
}

pub async fn send_otp(
    State(state): State<AppState>,
    Json(req): Json<SendOtpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);

    let db = state.db.clone();
    let lookup = email.clone();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_email(&lookup))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??
        .ok_or_else(|| ApiError::NotFound("User not found.".into()))?;

    issue_otp(&state, &user.id, &user.email).await?;

    Ok(Json(serde_json::json!({
        "message": "OTP sent to your email address."
    })))
}

pub async fn verify_otp(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<VerifyOtpRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    let email = normalize_email(&req.email);

    let db = state.db.clone();
    let lookup = email.clone();
    // Unknown email, wrong code, and expired code all collapse into the same
    // error so callers cannot probe which addresses are registered.
    let user = tokio::task::spawn_blocking(move || db.get_user_by_email(&lookup))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??
        .ok_or(ApiError::InvalidOtp)?;

    let stored = user.otp.as_deref().ok_or(ApiError::InvalidOtp)?;
    if stored != req.otp {
        return Err(ApiError::InvalidOtp);
    }
    let expires_at = user
        .otp_expires_at
        .as_deref()
        .ok_or(ApiError::InvalidOtp)
        .and_then(|raw| parley_db::parse_rfc3339(raw).map_err(|_| ApiError::InvalidOtp))?;
    if expires_at < Utc::now() {
        return Err(ApiError::InvalidOtp);
    }

    let db = state.db.clone();
    let user_id = user.id.clone();
    tokio::task::spawn_blocking(move || db.mark_verified(&user_id))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    let mut verified = user;
    verified.is_verified = true;
    verified.otp = None;
    verified.otp_expires_at = None;

    finish_auth(&state, jar, verified, "Email verified successfully.")
}

pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<RefreshResponse>, ApiError> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .ok_or_else(|| ApiError::Authentication("No refresh token".into()))?;

    let claims = verify_token(&state.config.refresh_secret, &token)
        .map_err(|_| ApiError::Authentication("Invalid refresh token".into()))?;

    // The refresh token is not rotated; only a new access token is minted.
    let access_token = mint_access_token(&state.config.jwt_secret, claims.sub)?;
    Ok(Json(RefreshResponse { access_token }))
}

pub async fn logout(jar: CookieJar) -> (CookieJar, Json<serde_json::Value>) {
    let jar = jar.remove(Cookie::build(REFRESH_COOKIE).path("/").build());
    (jar, Json(serde_json::json!({ "message": "Logged out" })))
}

// -- Helpers --

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(anyhow!("password hashing failed: {}", e)))
}

fn verify_password(hash: &str, password: &str) -> Result<(), ApiError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| ApiError::Internal(anyhow!("stored hash is corrupt: {}", e)))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| ApiError::InvalidCredentials)
}

/// Generate and persist a fresh OTP, then hand it to the mail gateway.
/// Without SMTP configured the code is logged instead (dev mode).
async fn issue_otp(state: &AppState, user_id: &str, email: &str) -> Result<(), ApiError> {
    let otp = rand::rng().random_range(100_000..1_000_000).to_string();
    let expires_at = Utc::now() + chrono::Duration::minutes(OTP_VALIDITY_MINUTES);

    let db = state.db.clone();
    let uid = user_id.to_string();
    let code = otp.clone();
    tokio::task::spawn_blocking(move || {
        db.set_otp(&uid, &code, &parley_db::format_rfc3339(expires_at))
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    match &state.mailer {
        Some(mailer) => mailer.send_otp_email(email, &otp).await?,
        None => warn!("SMTP not configured; OTP for {} is {}", email, otp),
    }

    Ok(())
}

fn finish_auth(
    state: &AppState,
    jar: CookieJar,
    user: UserRow,
    message: &str,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::Internal(anyhow!("corrupt user id '{}': {}", user.id, e)))?;

    let access_token = mint_access_token(&state.config.jwt_secret, user_id)?;
    let refresh_token = mint_refresh_token(&state.config.refresh_secret, user_id)?;

    let cookie = Cookie::build((REFRESH_COOKIE, refresh_token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    let profile = user.into_profile()?;

    Ok((
        jar.add(cookie),
        Json(AuthResponse {
            message: message.to_string(),
            access_token,
            user: profile,
        }),
    ))
}

pub fn mint_access_token(secret: &str, user_id: Uuid) -> Result<String, ApiError> {
    mint_token(secret, user_id, ACCESS_TOKEN_DAYS)
}

pub fn mint_refresh_token(secret: &str, user_id: Uuid) -> Result<String, ApiError> {
    mint_token(secret, user_id, REFRESH_TOKEN_DAYS)
}

fn mint_token(secret: &str, user_id: Uuid, days: i64) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        exp: (Utc::now() + chrono::Duration::days(days)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(anyhow!("token encoding failed: {}", e)))
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}
