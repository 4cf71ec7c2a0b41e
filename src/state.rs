use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;

use crate::analysis::Analyzer;
use crate::batch::{BatchDriver, BatchMonitor};
use crate::config::AppConfig;
use crate::llm::{ChatModel, LoggedChatModel};

/// Shared handler state, built once in `main`.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<AppConfig>,
    pub http: reqwest::Client,
    pub analyzer: Analyzer,
    pub batch: Arc<BatchMonitor>,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        config: AppConfig,
        http: reqwest::Client,
        llm: Arc<dyn ChatModel>,
    ) -> Self {
        let llm: Arc<dyn ChatModel> = Arc::new(LoggedChatModel::new(llm, pool.clone()));
        let analyzer = Analyzer::new(pool.clone(), http.clone(), llm, config.max_input_chars);
        Self {
            pool,
            config: Arc::new(config),
            http,
            analyzer,
            batch: Arc::new(BatchMonitor::default()),
        }
    }

    /// Sequential driver over the shared analyzer with the given spacing.
    pub fn batch_driver(&self, delay: Duration) -> BatchDriver {
        BatchDriver::new(Arc::new(self.analyzer.clone()), delay)
    }
}
