//! Sequential, rate-limited batch analysis.
//!
//! A single consumer drains an explicit queue of paper ids. Each item moves
//! `Pending -> InFlight -> Succeeded | Failed` and progress is published on a
//! `watch` channel after every transition. One failure never stops the batch.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinError;

#[async_trait]
pub trait PaperAnalyzer: Send + Sync {
    async fn analyze(&self, paper_id: &str) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemState {
    Pending,
    InFlight,
    Succeeded,
    Failed { error: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchProgress {
    pub total: usize,
    pub done: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub in_flight: Option<String>,
    pub running: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemResult {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<ItemResult>,
}

#[derive(Clone)]
pub struct BatchDriver {
    analyzer: Arc<dyn PaperAnalyzer>,
    delay: Duration,
}

impl BatchDriver {
    pub fn new(analyzer: Arc<dyn PaperAnalyzer>, delay: Duration) -> Self {
        Self { analyzer, delay }
    }

    pub async fn run(&self, paper_ids: Vec<String>, progress: &watch::Sender<BatchProgress>) -> BatchReport {
        let mut items: Vec<(String, ItemState)> = paper_ids
            .into_iter()
            .map(|id| (id, ItemState::Pending))
            .collect();
        let mut queue: VecDeque<usize> = (0..items.len()).collect();

        let mut snapshot = BatchProgress {
            total: items.len(),
            running: true,
            ..Default::default()
        };
        progress.send_replace(snapshot.clone());
        tracing::info!(total = snapshot.total, delay_ms = self.delay.as_millis(), "Batch analysis started");

        while let Some(index) = queue.pop_front() {
            let paper_id = items[index].0.clone();
            items[index].1 = ItemState::InFlight;
            snapshot.in_flight = Some(paper_id.clone());
            progress.send_replace(snapshot.clone());

            let state = match self.analyzer.analyze(&paper_id).await {
                Ok(()) => {
                    snapshot.succeeded += 1;
                    ItemState::Succeeded
                }
                Err(error) => {
                    tracing::warn!(%paper_id, "Batch item failed: {}", error);
                    snapshot.failed += 1;
                    ItemState::Failed { error }
                }
            };
            items[index].1 = state;
            snapshot.done += 1;
            snapshot.in_flight = None;
            progress.send_replace(snapshot.clone());

            if !queue.is_empty() {
                tokio::time::sleep(self.delay).await;
            }
        }

        snapshot.running = false;
        progress.send_replace(snapshot.clone());
        tracing::info!(
            succeeded = snapshot.succeeded,
            failed = snapshot.failed,
            "Batch analysis finished"
        );

        let results = items
            .into_iter()
            .map(|(id, state)| match state {
                ItemState::Failed { error } => ItemResult {
                    id,
                    ok: false,
                    error: Some(error),
                },
                _ => ItemResult {
                    id,
                    ok: true,
                    error: None,
                },
            })
            .collect();

        BatchReport {
            total: snapshot.total,
            succeeded: snapshot.succeeded,
            failed: snapshot.failed,
            results,
        }
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("A batch analysis is already running")]
    Busy,
    #[error("batch task aborted: {0}")]
    Task(#[from] JoinError),
}

/// Process-wide batch slot: at most one batch runs, progress is observable.
pub struct BatchMonitor {
    progress: Arc<watch::Sender<BatchProgress>>,
    running: Arc<Mutex<()>>,
}

impl Default for BatchMonitor {
    fn default() -> Self {
        Self {
            progress: Arc::new(watch::Sender::new(BatchProgress::default())),
            running: Arc::new(Mutex::new(())),
        }
    }
}

impl BatchMonitor {
    pub fn snapshot(&self) -> BatchProgress {
        self.progress.borrow().clone()
    }

    /// Runs the batch on its own task; the slot stays taken until that task
    /// ends, even if the caller stops waiting.
    pub async fn run_exclusive(
        &self,
        driver: BatchDriver,
        paper_ids: Vec<String>,
    ) -> Result<BatchReport, BatchError> {
        let guard = self
            .running
            .clone()
            .try_lock_owned()
            .map_err(|_| BatchError::Busy)?;
        let progress = self.progress.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            driver.run(paper_ids, &progress).await
        });
        Ok(task.await?)
    }

    #[cfg(test)]
    pub(crate) fn hold_slot(&self) -> tokio::sync::OwnedMutexGuard<()> {
        self.running
            .clone()
            .try_lock_owned()
            .expect("batch slot already taken")
    }
}
