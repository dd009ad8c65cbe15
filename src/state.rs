use std::sync::Arc;

use crate::catalog::CatalogStore;
use crate::config::AppConfig;
use crate::jobs::JobRunner;
use crate::metrics::Metrics;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Pool behind the catalog; used directly by the readiness probe.
    pub db: sqlx::SqlitePool,
    pub config: Arc<AppConfig>,
    pub catalog: Arc<dyn CatalogStore>,
    pub runner: JobRunner,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        db: sqlx::SqlitePool,
        config: AppConfig,
        catalog: Arc<dyn CatalogStore>,
        runner: JobRunner,
        metrics: Metrics,
    ) -> Self {
        Self { db, config: Arc::new(config), catalog, runner, metrics }
    }
}
