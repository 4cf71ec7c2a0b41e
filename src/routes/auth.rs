use axum::{
    Router,
    extract::{FromRequest, Json, Request, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::{get, post},
};
use bcrypt::{DEFAULT_COST, hash, verify};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use super::json_body;
use crate::config::AppConfig;
use crate::error::{ApiError, ApiResult, ok};
use crate::models::{CreateUser, LoginUser, TokenResponse, User, UserResponse};
use crate::state::AppState;

pub const ROLE_USER: &str = "user";
pub const ROLE_ADMIN: &str = "admin";
const TOKEN_TTL_HOURS: i64 = 24;
const ACCOUNT_BANNED: &str = "Account is banned";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(get_me))
}

// ============================
// Standard Auth
// ============================

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<CreateUser>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let input = json_body(payload)?;
    let username = input.username.trim();
    let email = input.email.trim();
    if username.is_empty() || email.is_empty() {
        return Err(ApiError::BadRequest("Username and email are required".into()));
    }
    if input.password.chars().count() < 6 {
        return Err(ApiError::BadRequest("Password must be at least 6 characters".into()));
    }

    let existing = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ? OR email = ?")
        .bind(username)
        .bind(email)
        .fetch_optional(&state.pool)
        .await?;

    if existing.is_some() {
        return Err(ApiError::Conflict("Username or email already registered".into()));
    }

    let hashed = hash(&input.password, DEFAULT_COST).map_err(|e| ApiError::Internal(e.into()))?;
    let display_name = input
        .display_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| username.to_string());

    let result = sqlx::query(
        r#"INSERT INTO users (username, email, hashed_password, display_name, created_at)
           VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(username)
    .bind(email)
    .bind(&hashed)
    .bind(&display_name)
    .bind(Utc::now())
    .execute(&state.pool)
    .await?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(result.last_insert_rowid())
        .fetch_one(&state.pool)
        .await?;

    tracing::info!(username = %user.username, "User registered");
    Ok((StatusCode::CREATED, ok(UserResponse::from(user))))
}

/// Accepts either a form-encoded or a JSON body.
async fn login(State(state): State<AppState>, request: Request) -> ApiResult<impl IntoResponse> {
    let is_json = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    let input: LoginUser = if is_json {
        let Json(input) = Json::<LoginUser>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        input
    } else {
        let axum::Form(input) = axum::Form::<LoginUser>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        input
    };

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
        .bind(input.username.trim())
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Incorrect username or password".into()))?;

    let valid = verify(&input.password, &user.hashed_password).map_err(|e| ApiError::Internal(e.into()))?;
    if !valid {
        return Err(ApiError::Unauthorized("Incorrect username or password".into()));
    }
    if user.banned {
        tracing::warn!(username = %user.username, "Banned user tried to log in");
        return Err(ApiError::Forbidden(ACCOUNT_BANNED.into()));
    }

    let token = issue_token(&state.config, &user.username, ROLE_USER)?;
    Ok(ok(TokenResponse {
        access_token: token,
        token_type: "bearer".to_string(),
    }))
}

async fn get_me(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    let user = current_user(&state, &headers).await?;
    Ok(ok(UserResponse::from(user)))
}

// ============================
// Helpers: tokens and identities
// ============================

fn secret(config: &AppConfig) -> ApiResult<&str> {
    config
        .secret_key
        .as_deref()
        .ok_or_else(|| ApiError::Config("SECRET_KEY not configured".into()))
}

pub fn issue_token(config: &AppConfig, subject: &str, role: &str) -> ApiResult<String> {
    let secret = secret(config)?;
    let expiration = (Utc::now() + chrono::Duration::hours(TOKEN_TTL_HOURS)).timestamp() as usize;

    let claims = Claims {
        sub: subject.to_string(),
        role: role.to_string(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(e.into()))
}

pub fn decode_token(config: &AppConfig, token: &str) -> ApiResult<Claims> {
    let secret = secret(config)?;
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthorized("Invalid token".into()))
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub async fn current_user(state: &AppState, headers: &HeaderMap) -> ApiResult<User> {
    let token = bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("Missing authorization header".into()))?;
    let claims = decode_token(&state.config, token)?;
    if claims.role != ROLE_USER {
        return Err(ApiError::Forbidden("User token required".into()));
    }

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
        .bind(&claims.sub)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".into()))?;
    if user.banned {
        return Err(ApiError::Forbidden(ACCOUNT_BANNED.into()));
    }
    Ok(user)
}

/// Admin check. The header wins; `body_token` covers clients that post the token in JSON.
pub fn require_admin(state: &AppState, headers: &HeaderMap, body_token: Option<&str>) -> ApiResult<Claims> {
    let token = bearer_token(headers)
        .or(body_token.map(str::trim).filter(|token| !token.is_empty()))
        .ok_or_else(|| ApiError::Unauthorized("Unauthorized".into()))?;
    let claims = decode_token(&state.config, token)?;
    if claims.role != ROLE_ADMIN {
        return Err(ApiError::Forbidden("Admin privileges required".into()));
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: Option<&str>) -> AppConfig {
        let secret = secret.map(str::to_string);
        AppConfig::from_lookup(move |key| (key == "SECRET_KEY").then(|| secret.clone()).flatten())
    }

    #[test]
    fn token_round_trip_keeps_role() {
        let config = config(Some("test-secret"));
        let token = issue_token(&config, "alice", ROLE_ADMIN).unwrap();
        let claims = decode_token(&config, &token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.role, ROLE_ADMIN);
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let token = issue_token(&config(Some("one")), "alice", ROLE_USER).unwrap();
        assert!(matches!(
            decode_token(&config(Some("two")), &token),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn missing_secret_is_a_configuration_error() {
        assert!(matches!(
            issue_token(&config(None), "alice", ROLE_USER),
            Err(ApiError::Config(_))
        ));
    }

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Token abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));
    }
}
