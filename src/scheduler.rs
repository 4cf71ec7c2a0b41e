//! Daily feed ingestion followed by analysis of the new papers.

use anyhow::Context;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use tokio::task::JoinHandle;

use crate::feed::{DEFAULT_FEED_LIMIT, ingest};
use crate::metrics::{Severity, SystemEvent, log_batch_report, log_system_event};
use crate::state::AppState;

/// Next instant strictly after `now` whose UTC hour is `hour` (minute zero).
pub fn next_run_after(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(at).and_utc();
    if today > now { today } else { today + Duration::days(1) }
}

async fn run_once(state: &AppState) -> anyhow::Result<()> {
    let report = ingest(&state.pool, &state.http, &state.config.feed_url, DEFAULT_FEED_LIMIT, None)
        .await
        .context("scheduled feed ingestion failed")?;
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
            details: Some(serde_json::json!({ "errors": report.errors })),
            source: "scheduler",
        },
    )
    .await;

    if report.new_papers.is_empty() {
        return Ok(());
    }
    let ids = report.new_papers.into_iter().map(|paper| paper.id).collect();
    let driver = state.batch_driver(state.config.batch_interval);
    let batch = state
        .batch
        .run_exclusive(driver, ids)
        .await
        .context("scheduled batch skipped")?;
    log_batch_report(&state.pool, &batch, "scheduler").await;
    Ok(())
}

pub fn spawn_daily_ingest(state: AppState, hour: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = next_run_after(now, hour);
            tracing::info!(%next, "Next scheduled ingestion");
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            if let Err(error) = run_once(&state).await {
                tracing::error!("{:#}", error);
                log_system_event(
                    &state.pool,
                    SystemEvent {
                        log_type: "scheduler",
                        severity: Severity::Error,
                        message: format!("{error:#}"),
                        details: None,
                        source: "scheduler",
                    },
                )
                .await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn later_hour_runs_today() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 6, 30, 0).unwrap();
        assert_eq!(
            next_run_after(now, 8),
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn passed_or_current_hour_runs_tomorrow() {
        let now = Utc.with_ymd_and_hms(2024, 5, 31, 8, 0, 0).unwrap();
        assert_eq!(
            next_run_after(now, 8),
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
        );
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 0).unwrap();
        assert_eq!(
            next_run_after(now, 0),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        );
    }
}
