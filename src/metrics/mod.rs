use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::batch::BatchReport;
use crate::db::page_offset;
use crate::models::{
    AdminStats, ApiLogEntry, ApiLogPage, PageCount, Pagination, RecentVisit, SystemLogEntry, SystemLogPage,
    VisitStats,
};

pub const TOP_PAGES: i64 = 5;
pub const RECENT_VISITS: i64 = 10;
pub const DEFAULT_LOG_PAGE_SIZE: i64 = 50;
pub const MAX_LOG_PAGE_SIZE: i64 = 200;

#[derive(Debug, Clone)]
pub struct ApiCallRecord<'a> {
    pub function_name: &'a str,
    pub response_status: u16,
    pub tokens_used: Option<i64>,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}

pub async fn record_api_call(pool: &SqlitePool, record: ApiCallRecord<'_>) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO api_logs (function_name, response_status, tokens_used, duration_ms, error_message, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.function_name)
    .bind(i64::from(record.response_status))
    .bind(record.tokens_used)
    .bind(record.duration_ms)
    .bind(&record.error_message)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_api_logs(
    pool: &SqlitePool,
    page: i64,
    limit: i64,
    function_name: Option<&str>,
) -> Result<ApiLogPage, sqlx::Error> {
    let page = page.max(1);
    let limit = limit.clamp(1, MAX_LOG_PAGE_SIZE);
    let function_name = function_name.map(str::trim).filter(|name| !name.is_empty());

    let mut count_builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM api_logs");
    if let Some(name) = function_name {
        count_builder.push(" WHERE function_name = ").push_bind(name);
    }
    let (total,): (i64,) = count_builder.build_query_as().fetch_one(pool).await?;

    let mut list_builder = QueryBuilder::<Sqlite>::new(
        "SELECT id, function_name, response_status, tokens_used, duration_ms, error_message, created_at FROM api_logs",
    );
    if let Some(name) = function_name {
        list_builder.push(" WHERE function_name = ").push_bind(name);
    }
    list_builder
        .push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(page_offset(page, limit));

    let logs: Vec<ApiLogEntry> = list_builder.build_query_as().fetch_all(pool).await?;

    Ok(ApiLogPage {
        logs,
        pagination: Pagination::new(page, limit, total),
    })
}

// ============================
// System event log
// ============================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SystemEvent<'a> {
    pub log_type: &'a str,
    pub severity: Severity,
    pub message: String,
    pub details: Option<Value>,
    pub source: &'a str,
}

pub async fn record_system_log(pool: &SqlitePool, event: SystemEvent<'_>) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO system_logs (log_type, severity, message, details, source, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.log_type)
    .bind(event.severity.as_str())
    .bind(&event.message)
    .bind(event.details.map(|details| details.to_string()))
    .bind(event.source)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Best effort: a failed write is only traced.
pub async fn log_system_event(pool: &SqlitePool, event: SystemEvent<'_>) {
    let log_type = event.log_type;
    if let Err(error) = record_system_log(pool, event).await {
        tracing::warn!(log_type, "Failed to write system log: {}", error);
    }
}

pub async fn log_batch_report(pool: &SqlitePool, report: &BatchReport, source: &str) {
    let failed: Vec<_> = report.results.iter().filter(|item| !item.ok).collect();
    log_system_event(
        pool,
        SystemEvent {
            log_type: "batch_analysis",
            severity: if failed.is_empty() { Severity::Info } else { Severity::Warning },
            message: format!("Analyzed {} papers, {} failed", report.total, report.failed),
            details: Some(serde_json::json!({ "failed": failed })),
            source,
        },
    )
    .await;
}

pub async fn list_system_logs(
    pool: &SqlitePool,
    page: i64,
    limit: i64,
    severity: Option<&str>,
) -> Result<SystemLogPage, sqlx::Error> {
    let page = page.max(1);
    let limit = limit.clamp(1, MAX_LOG_PAGE_SIZE);
    let severity = severity
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_lowercase);

    let mut count_builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM system_logs");
    if let Some(severity) = &severity {
        count_builder.push(" WHERE severity = ").push_bind(severity.clone());
    }
    let (total,): (i64,) = count_builder.build_query_as().fetch_one(pool).await?;

    let mut list_builder = QueryBuilder::<Sqlite>::new(
        "SELECT id, log_type, severity, message, details, source, created_at FROM system_logs",
    );
    if let Some(severity) = &severity {
        list_builder.push(" WHERE severity = ").push_bind(severity.clone());
    }
    list_builder
        .push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(page_offset(page, limit));

    let logs: Vec<SystemLogEntry> = list_builder.build_query_as().fetch_all(pool).await?;

    Ok(SystemLogPage {
        logs,
        pagination: Pagination::new(page, limit, total),
    })
}

/// Stable anonymous visitor id derived from client address and user agent.
pub fn visitor_hash(client: &str, user_agent: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(client.as_bytes());
    hasher.update(b"|");
    hasher.update(user_agent.as_bytes());
    hasher
        .finalize()
        .iter()
        .take(8)
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

pub async fn record_visit(
    pool: &SqlitePool,
    path: &str,
    user_id: Option<i64>,
    visitor_hash: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO page_visits (path, user_id, visitor_hash, created_at) VALUES (?, ?, ?, ?)")
        .bind(path)
        .bind(user_id)
        .bind(visitor_hash)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(())
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now - Duration::hours(24))
}

/// Today's page views, unique visitors, busiest pages and latest visits (UTC day).
pub async fn visit_stats(pool: &SqlitePool, now: DateTime<Utc>) -> Result<VisitStats, sqlx::Error> {
    let since = start_of_day(now);

    let (pv, uv): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*), COUNT(DISTINCT COALESCE(visitor_hash, CAST(user_id AS TEXT)))
        FROM page_visits WHERE created_at >= ?
        "#,
    )
    .bind(since)
    .fetch_one(pool)
    .await?;

    let top_pages = sqlx::query_as::<_, PageCount>(
        r#"
        SELECT path, COUNT(*) AS count FROM page_visits
        WHERE created_at >= ?
        GROUP BY path
        ORDER BY count DESC, path ASC
        LIMIT ?
        "#,
    )
    .bind(since)
    .bind(TOP_PAGES)
    .fetch_all(pool)
    .await?;

    let recent_visits = sqlx::query_as::<_, RecentVisit>(
        "SELECT path, visitor_hash, created_at FROM page_visits ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(RECENT_VISITS)
    .fetch_all(pool)
    .await?;

    Ok(VisitStats {
        pv,
        uv,
        top_pages,
        recent_visits,
    })
}

pub async fn admin_stats(pool: &SqlitePool, now: DateTime<Utc>) -> Result<AdminStats, sqlx::Error> {
    let count = |sql: &'static str| async move {
        let (value,): (i64,) = sqlx::query_as(sql).fetch_one(pool).await?;
        Ok::<i64, sqlx::Error>(value)
    };

    let today = now.format("%Y-%m-%d").to_string();
    let (today_papers,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM papers WHERE published_date = ?")
        .bind(&today)
        .fetch_one(pool)
        .await?;

    Ok(AdminStats {
        total_papers: count("SELECT COUNT(*) FROM papers").await?,
        total_analyzed: count("SELECT COUNT(*) FROM paper_analysis").await?,
        total_deep_analyzed: count("SELECT COUNT(*) FROM paper_deep_analysis").await?,
        today_papers,
        unanalyzed_papers: count(
            "SELECT COUNT(*) FROM papers p WHERE NOT EXISTS (SELECT 1 FROM paper_analysis a WHERE a.paper_id = p.id)",
        )
        .await?,
        total_users: count("SELECT COUNT(*) FROM users").await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::db::papers::{insert_paper, sample_paper};

    #[test]
    fn visitor_hash_is_stable_and_short() {
        let a = visitor_hash("10.0.0.1", "curl/8");
        assert_eq!(a, visitor_hash("10.0.0.1", "curl/8"));
        assert_ne!(a, visitor_hash("10.0.0.2", "curl/8"));
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn visit_stats_count_today_only() {
        let pool = memory_pool().await;
        record_visit(&pool, "/", None, Some("v1")).await.unwrap();
        record_visit(&pool, "/", None, Some("v2")).await.unwrap();
        record_visit(&pool, "/paper/1", Some(7), None).await.unwrap();
        sqlx::query("INSERT INTO page_visits (path, visitor_hash, created_at) VALUES ('/old', 'v9', ?)")
            .bind(Utc::now() - Duration::days(3))
            .execute(&pool)
            .await
            .unwrap();

        let stats = visit_stats(&pool, Utc::now()).await.unwrap();
        assert_eq!(stats.pv, 3);
        assert_eq!(stats.uv, 3);
        assert_eq!(stats.top_pages[0].path, "/");
        assert_eq!(stats.top_pages[0].count, 2);
        assert_eq!(stats.recent_visits.len(), 4);
    }

    #[tokio::test]
    async fn api_logs_page_and_filter() {
        let pool = memory_pool().await;
        for (name, status) in [("deep-analysis", 200), ("extract-tags", 200), ("deep-analysis", 502)] {
            record_api_call(
                &pool,
                ApiCallRecord {
                    function_name: name,
                    response_status: status,
                    tokens_used: Some(10),
                    duration_ms: 5,
                    error_message: None,
                },
            )
            .await
            .unwrap();
        }

        let page = list_api_logs(&pool, 1, 2, None).await.unwrap();
        assert_eq!(page.logs.len(), 2);
        assert_eq!(page.pagination.total, 3);
        assert_eq!(page.pagination.total_pages, 2);

        let filtered = list_api_logs(&pool, 1, 50, Some("deep-analysis")).await.unwrap();
        assert_eq!(filtered.pagination.total, 2);
        assert_eq!(filtered.logs[0].response_status, 502);
    }

    #[tokio::test]
    async fn admin_stats_counts_unanalyzed() {
        let pool = memory_pool().await;
        let today = Utc::now().format("%Y-%m-%d").to_string();
        insert_paper(&pool, &sample_paper("10.1101/x", &today)).await.unwrap();
        insert_paper(&pool, &sample_paper("10.1101/y", "2020-01-01")).await.unwrap();

        let stats = admin_stats(&pool, Utc::now()).await.unwrap();
        assert_eq!(stats.total_papers, 2);
        assert_eq!(stats.today_papers, 1);
        assert_eq!(stats.unanalyzed_papers, 2);
        assert_eq!(stats.total_analyzed, 0);
        assert_eq!(stats.total_users, 0);
    }

    #[tokio::test]
    async fn huge_log_page_is_empty_not_a_panic() {
        let pool = memory_pool().await;
        let page = list_api_logs(&pool, i64::MAX, 50, None).await.unwrap();
        assert!(page.logs.is_empty());
        assert_eq!(page.pagination.page, i64::MAX);

        let page = list_system_logs(&pool, i64::MAX, i64::MAX, None).await.unwrap();
        assert!(page.logs.is_empty());
        assert_eq!(page.pagination.limit, MAX_LOG_PAGE_SIZE);
    }

    #[tokio::test]
    async fn system_logs_filter_by_severity() {
        let pool = memory_pool().await;
        for (severity, message) in [
            (Severity::Info, "ingest finished"),
            (Severity::Error, "batch item failed"),
            (Severity::Info, "user banned"),
        ] {
            log_system_event(
                &pool,
                SystemEvent {
                    log_type: "test",
                    severity,
                    message: message.to_string(),
                    details: Some(serde_json::json!({ "n": 1 })),
                    source: "metrics-test",
                },
            )
            .await;
        }

        let all = list_system_logs(&pool, 1, 50, None).await.unwrap();
        assert_eq!(all.pagination.total, 3);
        assert_eq!(all.logs[0].message, "user banned");

        let errors = list_system_logs(&pool, 1, 50, Some(" ERROR ")).await.unwrap();
        assert_eq!(errors.pagination.total, 1);
        assert_eq!(errors.logs[0].details.as_deref(), Some(r#"{"n":1}"#));
    }
}
