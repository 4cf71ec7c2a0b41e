use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminStats {
    pub total_papers: i64,
    pub total_analyzed: i64,
    pub total_deep_analyzed: i64,
    pub today_papers: i64,
    pub unanalyzed_papers: i64,
    pub total_users: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PageCount {
    pub path: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RecentVisit {
    pub path: String,
    pub visitor_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitStats {
    pub pv: i64,
    pub uv: i64,
    pub top_pages: Vec<PageCount>,
    pub recent_visits: Vec<RecentVisit>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApiLogEntry {
    pub id: i64,
    pub function_name: String,
    pub response_status: i64,
    pub tokens_used: Option<i64>,
    pub duration_ms: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        Self {
            page,
            limit,
            total,
            total_pages: (total + limit - 1) / limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiLogPage {
    pub logs: Vec<ApiLogEntry>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SystemLogEntry {
    pub id: i64,
    pub log_type: String,
    pub severity: String,
    pub message: String,
    pub details: Option<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemLogPage {
    pub logs: Vec<SystemLogEntry>,
    pub pagination: Pagination,
}
