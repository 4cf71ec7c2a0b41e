use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const CONTACT_INFO_KEY: &str = "contact_info";

/// Keys seeded at startup so the admin form always has a row to edit.
pub const DEFAULT_SETTING_KEYS: &[&str] = &[
    CONTACT_INFO_KEY,
    "copyright",
    "contact_email",
    "contact_phone",
    "address",
    "social_twitter",
    "social_github",
];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SiteSetting {
    pub setting_key: String,
    pub setting_value: String,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SystemConfig {
    pub id: i64,
    #[sqlx(rename = "config_key")]
    pub key: String,
    #[sqlx(rename = "config_value")]
    pub value: String,
    pub description: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create (no `config_id`) or update a system config entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSystemConfig {
    pub token: Option<String>,
    pub config_id: Option<i64>,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}
