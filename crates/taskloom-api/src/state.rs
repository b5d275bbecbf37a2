//! Application state shared by the CLI commands.
//!
//! Pins the engine's generic repository to the SQLite implementation and
//! keeps the loaded configuration alongside the data directory.

use std::path::PathBuf;

use taskloom_core::executor::BoxTaskExecutor;
use taskloom_core::workflow::Engine;
use taskloom_infra::config::database_url;
use taskloom_infra::sqlite::execution::SqliteExecutionRepository;
use taskloom_infra::sqlite::pool::DatabasePool;
use taskloom_types::config::AppConfig;

/// Engine pinned to the SQLite repository.
pub type ConcreteEngine = Engine<SqliteExecutionRepository>;

pub struct AppState {
    pub config: AppConfig,
    pub data_dir: PathBuf,
    pub repo: SqliteExecutionRepository,
}

impl AppState {
    /// Create the data directory if needed and open the database.
    pub async fn init(data_dir: PathBuf, config: AppConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir).await?;

        let url = database_url(&config, &data_dir);
        let pool = DatabasePool::new(&url).await?;
        tracing::debug!(data_dir = %data_dir.display(), "application state ready");

        Ok(Self {
            config,
            data_dir,
            repo: SqliteExecutionRepository::new(pool),
        })
    }

    /// Build an engine over this state's repository.
    pub fn engine(&self, executor: BoxTaskExecutor) -> ConcreteEngine {
        Engine::new(self.repo.clone(), executor, self.config.engine.clone())
    }
}
