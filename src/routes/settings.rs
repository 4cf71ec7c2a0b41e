use std::collections::BTreeMap;

use axum::{Router, extract::State, response::IntoResponse, routing::get};
use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;

use crate::error::{ApiResult, ok};
use crate::models::{CONTACT_INFO_KEY, SiteSetting};
use crate::state::AppState;

pub fn settings_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_settings))
        .route("/contact", get(get_contact))
}

pub async fn load_settings(pool: &SqlitePool) -> Result<Vec<SiteSetting>, sqlx::Error> {
    sqlx::query_as::<_, SiteSetting>(
        "SELECT setting_key, setting_value, updated_at FROM site_settings ORDER BY setting_key",
    )
    .fetch_all(pool)
    .await
}

pub async fn upsert_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO site_settings (setting_key, setting_value, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

async fn get_settings(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let settings: BTreeMap<String, String> = load_settings(&state.pool)
        .await?
        .into_iter()
        .map(|setting| (setting.setting_key, setting.setting_value))
        .collect();
    Ok(ok(settings))
}

async fn get_contact(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let row: Option<(String,)> = sqlx::query_as("SELECT setting_value FROM site_settings WHERE setting_key = ?")
        .bind(CONTACT_INFO_KEY)
        .fetch_optional(&state.pool)
        .await?;
    let contact = row.map(|(value,)| value).unwrap_or_default();
    Ok(ok(json!({ "contact": contact })))
}
