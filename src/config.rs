use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://biorxiv_daily.db?mode=rwc";
pub const DEFAULT_DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_DEEPSEEK_MODEL: &str = "deepseek-chat";
pub const DEFAULT_FEED_URL: &str = "https://connect.biorxiv.org/biorxiv_xml.php?subject=all";
pub const DEFAULT_MAX_INPUT_CHARS: usize = 24_000;
pub const MIN_INPUT_CHARS: usize = 1_000;
pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 1_000;
pub const MIN_BATCH_INTERVAL_MS: u64 = 100;
pub const MAX_BATCH_INTERVAL_MS: u64 = 5_000;

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub secret_key: Option<String>,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub llm: LlmConfig,
    pub max_input_chars: usize,
    pub feed_url: String,
    pub feed_schedule_hour_utc: Option<u32>,
    pub batch_interval: Duration,
    pub frontend_dist: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values count as unset.
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let max_input_chars = get("ANALYSIS_MAX_INPUT_CHARS")
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_INPUT_CHARS);

        let batch_interval_ms = get("BATCH_INTERVAL_MS")
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_BATCH_INTERVAL_MS);

        Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            secret_key: get("SECRET_KEY"),
            admin_username: get("ADMIN_USERNAME"),
            admin_password: get("ADMIN_PASSWORD"),
            llm: LlmConfig {
                api_key: get("DEEPSEEK_API_KEY"),
                base_url: get("DEEPSEEK_BASE_URL")
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| DEFAULT_DEEPSEEK_BASE_URL.to_string()),
                model: get("DEEPSEEK_MODEL").unwrap_or_else(|| DEFAULT_DEEPSEEK_MODEL.to_string()),
            },
            max_input_chars: budget_chars(max_input_chars),
            feed_url: get("FEED_URL").unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
            feed_schedule_hour_utc: get("FEED_SCHEDULE_HOUR_UTC")
                .and_then(|raw| raw.trim().parse::<u32>().ok())
                .filter(|hour| *hour < 24),
            batch_interval: clamp_batch_interval(batch_interval_ms),
            frontend_dist: get("FRONTEND_DIST")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("frontend/dist")),
        }
    }
}

/// Effective character budget for model input. Never below [`MIN_INPUT_CHARS`].
pub fn budget_chars(configured: usize) -> usize {
    configured.max(MIN_INPUT_CHARS)
}

pub fn clamp_batch_interval(interval_ms: u64) -> Duration {
    Duration::from_millis(interval_ms.clamp(MIN_BATCH_INTERVAL_MS, MAX_BATCH_INTERVAL_MS))
}
