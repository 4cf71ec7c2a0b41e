use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        Json, Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::{delete, get, post},
};
use bcrypt::{DEFAULT_COST, hash};
use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite};

use super::{json_body, path_param, query_params};
use crate::batch::BatchError;
use crate::config::clamp_batch_interval;
use crate::db::page_offset;
use crate::db::papers::recent_paper_ids;
use crate::error::{ApiError, ApiResult, ok};
use crate::feed::{clamp_limit, ingest};
use crate::metrics::{
    DEFAULT_LOG_PAGE_SIZE, Severity, SystemEvent, admin_stats, list_api_logs, list_system_logs, log_batch_report,
    log_system_event, visit_stats,
};
use crate::models::{
    CONTACT_INFO_KEY, Pagination, SaveSystemConfig, SystemConfig, User, UserAction, UserPage, UserResponse,
};
use crate::routes::auth::{ROLE_ADMIN, issue_token, require_admin};
use crate::routes::settings::{load_settings, upsert_setting};
use crate::state::AppState;

pub const DEFAULT_BATCH_LIMIT: i64 = 200;
pub const MAX_BATCH_LIMIT: i64 = 1_000;
const DEFAULT_USER_PAGE_SIZE: i64 = 20;
const MAX_USER_PAGE_SIZE: i64 = 100;
const GENERATED_PASSWORD_LEN: usize = 12;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(admin_login))
        .route("/stats", get(get_stats))
        .route("/fetch-papers", post(fetch_papers))
        .route("/batch-analyze", post(batch_analyze))
        .route("/batch/progress", get(batch_progress))
        .route("/settings", get(get_settings).put(update_settings))
        .route("/contact", post(update_contact))
        .route("/visits", get(get_visits))
        .route("/api-logs", get(get_api_logs))
        .route("/system-logs", get(get_system_logs))
        .route("/users", get(list_users))
        .route("/users/{user_id}", post(update_user))
        .route("/configs", get(list_configs).post(save_config))
        .route("/configs/{config_id}", delete(delete_config))
}

// ============================
// POST /admin/login
// ============================
#[derive(Debug, Deserialize)]
struct AdminLogin {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn admin_login(
    State(state): State<AppState>,
    payload: Result<Json<AdminLogin>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let input = json_body(payload)?;
    let (Some(username), Some(password)) = (
        state.config.admin_username.as_deref(),
        state.config.admin_password.as_deref(),
    ) else {
        return Err(ApiError::Config("Admin credential not configured".into()));
    };

    if input.username != username || input.password != password {
        tracing::warn!(username = %input.username, "Rejected admin login");
        return Err(ApiError::Unauthorized("Invalid credential".into()));
    }

    let token = issue_token(&state.config, username, ROLE_ADMIN)?;
    Ok(ok(json!({ "token": token, "token_type": "bearer" })))
}

// ============================
// GET /admin/stats
// ============================
async fn get_stats(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    require_admin(&state, &headers, None)?;
    let stats = admin_stats(&state.pool, Utc::now()).await?;
    Ok(ok(stats))
}

// ============================
// POST /admin/fetch-papers
// ============================
#[derive(Debug, Default, Deserialize)]
struct FetchPapersInput {
    token: Option<String>,
    limit: Option<usize>,
    timestamp: Option<i64>,
    #[serde(default)]
    analyze_new: bool,
}

async fn fetch_papers(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<FetchPapersInput>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let input = json_body(payload)?;
    require_admin(&state, &headers, input.token.as_deref())?;

    let report = ingest(
        &state.pool,
        &state.http,
        &state.config.feed_url,
        clamp_limit(input.limit),
        input.timestamp,
    )
    .await?;
    log_system_event(
        &state.pool,
        SystemEvent {
            log_type: "feed_ingest",
            severity: if report.errors.is_empty() { Severity::Info } else { Severity::Warning },
            message: format!(
                "Fetched {} feed items, {} new",
                report.total_fetched,
                report.new_papers.len()
            ),
            details: Some(json!({ "errors": report.errors })),
            source: "admin",
        },
    )
    .await;

    let mut batch_skipped = false;
    let batch = if input.analyze_new && !report.new_papers.is_empty() {
        let ids = report.new_papers.iter().map(|paper| paper.id.clone()).collect();
        let driver = state.batch_driver(state.config.batch_interval);
        match state.batch.run_exclusive(driver, ids).await {
            Ok(batch) => {
                log_batch_report(&state.pool, &batch, "admin").await;
                Some(batch)
            }
            Err(BatchError::Busy) => {
                tracing::warn!(
                    new = report.new_papers.len(),
                    "Batch already running; new papers left for a later run"
                );
                batch_skipped = true;
                None
            }
            Err(error) => return Err(error.into()),
        }
    } else {
        None
    };

    Ok(ok(json!({ "ingest": report, "batch": batch, "batch_skipped": batch_skipped })))
}

// ============================
// POST /admin/batch-analyze
// ============================
#[derive(Debug, Default, Deserialize)]
struct BatchAnalyzeInput {
    token: Option<String>,
    limit: Option<i64>,
    interval_ms: Option<u64>,
    only_new: Option<bool>,
    paper_ids: Option<Vec<String>>,
}

/// Explicit ids win (trimmed, deduplicated); otherwise the most recent papers.
async fn select_batch_ids(state: &AppState, input: &BatchAnalyzeInput) -> ApiResult<Vec<String>> {
    if let Some(paper_ids) = input.paper_ids.as_ref().filter(|ids| !ids.is_empty()) {
        let mut ids: Vec<String> = Vec::new();
        for id in paper_ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()) {
            if !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
        return Ok(ids);
    }

    let limit = input.limit.unwrap_or(DEFAULT_BATCH_LIMIT).clamp(1, MAX_BATCH_LIMIT);
    let only_new = input.only_new.unwrap_or(true);
    Ok(recent_paper_ids(&state.pool, limit, only_new).await?)
}

async fn batch_analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<BatchAnalyzeInput>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let input = json_body(payload)?;
    require_admin(&state, &headers, input.token.as_deref())?;

    let delay: Duration = input
        .interval_ms
        .map(clamp_batch_interval)
        .unwrap_or(state.config.batch_interval);
    let ids = select_batch_ids(&state, &input).await?;

    let driver = state.batch_driver(delay);
    let report = state.batch.run_exclusive(driver, ids).await?;
    log_batch_report(&state.pool, &report, "admin").await;
    Ok(ok(report))
}

// ============================
// GET /admin/batch/progress
// ============================
async fn batch_progress(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    require_admin(&state, &headers, None)?;
    Ok(ok(state.batch.snapshot()))
}

// ============================
// Site settings
// ============================
async fn get_settings(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    require_admin(&state, &headers, None)?;
    let settings = load_settings(&state.pool).await?;
    Ok(ok(settings))
}

#[derive(Debug, Deserialize)]
struct UpdateSettingsInput {
    token: Option<String>,
    settings: BTreeMap<String, String>,
}

async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<UpdateSettingsInput>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let input = json_body(payload)?;
    require_admin(&state, &headers, input.token.as_deref())?;

    if input.settings.keys().any(|key| key.trim().is_empty()) {
        return Err(ApiError::BadRequest("Setting keys must not be empty".into()));
    }
    for (key, value) in &input.settings {
        upsert_setting(&state.pool, key.trim(), value).await?;
    }
    tracing::info!(count = input.settings.len(), "Site settings updated");

    let settings = load_settings(&state.pool).await?;
    Ok(ok(settings))
}

#[derive(Debug, Deserialize)]
struct ContactInput {
    token: Option<String>,
    #[serde(default)]
    contact_info: String,
}

async fn update_contact(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ContactInput>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let input = json_body(payload)?;
    require_admin(&state, &headers, input.token.as_deref())?;

    upsert_setting(&state.pool, CONTACT_INFO_KEY, &input.contact_info).await?;
    Ok(ok(json!({ "contact": input.contact_info })))
}

// ============================
// Visits, model call logs and system logs
// ============================
async fn get_visits(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    require_admin(&state, &headers, None)?;
    let stats = visit_stats(&state.pool, Utc::now()).await?;
    Ok(ok(stats))
}

#[derive(Debug, Deserialize)]
struct ApiLogQuery {
    page: Option<i64>,
    limit: Option<i64>,
    function: Option<String>,
}

async fn get_api_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<ApiLogQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&state, &headers, None)?;
    let query = query_params(query)?;
    let page = list_api_logs(
        &state.pool,
        query.page.unwrap_or(1),
        query.limit.unwrap_or(DEFAULT_LOG_PAGE_SIZE),
        query.function.as_deref(),
    )
    .await?;
    Ok(ok(page))
}

#[derive(Debug, Deserialize)]
struct SystemLogQuery {
    page: Option<i64>,
    limit: Option<i64>,
    severity: Option<String>,
}

async fn get_system_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<SystemLogQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&state, &headers, None)?;
    let query = query_params(query)?;
    let page = list_system_logs(
        &state.pool,
        query.page.unwrap_or(1),
        query.limit.unwrap_or(DEFAULT_LOG_PAGE_SIZE),
        query.severity.as_deref(),
    )
    .await?;
    Ok(ok(page))
}

// ============================
// User moderation
// ============================
#[derive(Debug, Deserialize)]
struct UserListQuery {
    page: Option<i64>,
    limit: Option<i64>,
    search: Option<String>,
}

fn push_user_search(builder: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
    if let Some(search) = search {
        let pattern = format!("%{search}%");
        builder
            .push(" WHERE username LIKE ")
            .push_bind(pattern.clone())
            .push(" OR email LIKE ")
            .push_bind(pattern.clone())
            .push(" OR display_name LIKE ")
            .push_bind(pattern);
    }
}

async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<UserListQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&state, &headers, None)?;
    let query = query_params(query)?;
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_USER_PAGE_SIZE)
        .clamp(1, MAX_USER_PAGE_SIZE);
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let mut count_builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM users");
    push_user_search(&mut count_builder, search);
    let (total,): (i64,) = count_builder.build_query_as().fetch_one(&state.pool).await?;

    let mut list_builder = QueryBuilder::<Sqlite>::new("SELECT * FROM users");
    push_user_search(&mut list_builder, search);
    list_builder
        .push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(page_offset(page, limit));
    let users: Vec<User> = list_builder.build_query_as().fetch_all(&state.pool).await?;

    Ok(ok(UserPage {
        users: users.into_iter().map(UserResponse::from).collect(),
        pagination: Pagination::new(page, limit, total),
    }))
}

#[derive(Debug, Deserialize)]
struct UpdateUserInput {
    token: Option<String>,
    action: UserAction,
}

fn generate_password() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";
    let mut rng = rand::rng();
    (0..GENERATED_PASSWORD_LEN)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateUserInput>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let user_id = path_param(path)?;
    let input = json_body(payload)?;
    let admin = require_admin(&state, &headers, input.token.as_deref())?;

    let mut new_password = None;
    let result = match input.action {
        UserAction::BanUser | UserAction::UnbanUser => {
            sqlx::query("UPDATE users SET banned = ? WHERE id = ?")
                .bind(input.action == UserAction::BanUser)
                .bind(user_id)
                .execute(&state.pool)
                .await?
        }
        UserAction::ResetPassword => {
            let password = generate_password();
            let hashed = hash(&password, DEFAULT_COST).map_err(|e| ApiError::Internal(e.into()))?;
            new_password = Some(password);
            sqlx::query("UPDATE users SET hashed_password = ? WHERE id = ?")
                .bind(&hashed)
                .bind(user_id)
                .execute(&state.pool)
                .await?
        }
    };
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("User not found".into()));
    }

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(&state.pool)
        .await?;
    tracing::info!(admin = %admin.sub, username = %user.username, action = ?input.action, "User updated");
    log_system_event(
        &state.pool,
        SystemEvent {
            log_type: "user_moderation",
            severity: if input.action == UserAction::BanUser { Severity::Warning } else { Severity::Info },
            message: format!("{:?} applied to {}", input.action, user.username),
            details: Some(json!({ "user_id": user.id, "admin": admin.sub })),
            source: "admin",
        },
    )
    .await;

    let mut body = json!({ "user": UserResponse::from(user) });
    if let Some(password) = new_password {
        body["new_password"] = json!(password);
    }
    Ok(ok(body))
}

// ============================
// System configs
// ============================
const CONFIG_COLUMNS: &str = "id, config_key, config_value, description, is_active, created_at, updated_at";

async fn list_configs(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    require_admin(&state, &headers, None)?;
    let configs = sqlx::query_as::<_, SystemConfig>(&format!(
        "SELECT {CONFIG_COLUMNS} FROM system_configs ORDER BY config_key"
    ))
    .fetch_all(&state.pool)
    .await?;
    Ok(ok(configs))
}

fn config_conflict(error: sqlx::Error, key: &str) -> ApiError {
    if let sqlx::Error::Database(db) = &error {
        if db.is_unique_violation() {
            return ApiError::Conflict(format!("Config key {key} already exists"));
        }
    }
    error.into()
}

/// Updates the entry named by `configId`, or creates one when it is absent.
async fn save_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SaveSystemConfig>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let input = json_body(payload)?;
    require_admin(&state, &headers, input.token.as_deref())?;

    let key = input.key.trim();
    if key.is_empty() {
        return Err(ApiError::BadRequest("Config key is required".into()));
    }
    let now = Utc::now();

    let config_id = match input.config_id {
        Some(config_id) => {
            let result = sqlx::query(
                r#"
                UPDATE system_configs
                SET config_key = ?, config_value = ?, description = ?, is_active = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(key)
            .bind(&input.value)
            .bind(&input.description)
            .bind(input.is_active)
            .bind(now)
            .bind(config_id)
            .execute(&state.pool)
            .await
            .map_err(|e| config_conflict(e, key))?;
            if result.rows_affected() == 0 {
                return Err(ApiError::NotFound("Config not found".into()));
            }
            config_id
        }
        None => sqlx::query(
            r#"
            INSERT INTO system_configs (config_key, config_value, description, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(&input.value)
        .bind(&input.description)
        .bind(input.is_active)
        .bind(now)
        .bind(now)
        .execute(&state.pool)
        .await
        .map_err(|e| config_conflict(e, key))?
        .last_insert_rowid(),
    };

    let config = sqlx::query_as::<_, SystemConfig>(&format!(
        "SELECT {CONFIG_COLUMNS} FROM system_configs WHERE id = ?"
    ))
    .bind(config_id)
    .fetch_one(&state.pool)
    .await?;
    log_system_event(
        &state.pool,
        SystemEvent {
            log_type: "system_config",
            severity: Severity::Info,
            message: format!("Config {} saved", config.key),
            details: Some(json!({ "config_id": config.id, "is_active": config.is_active })),
            source: "admin",
        },
    )
    .await;
    Ok(ok(config))
}

async fn delete_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&state, &headers, None)?;
    let config_id = path_param(path)?;

    let result = sqlx::query("DELETE FROM system_configs WHERE id = ?")
        .bind(config_id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("Config not found".into()));
    }

    log_system_event(
        &state.pool,
        SystemEvent {
            log_type: "system_config",
            severity: Severity::Warning,
            message: format!("Config {config_id} deleted"),
            details: None,
            source: "admin",
        },
    )
    .await;
    Ok(ok(json!({ "deleted": config_id })))
}
