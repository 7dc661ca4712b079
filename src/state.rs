use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    audit::AuditSink,
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    extract::TextExtractor,
    notify::NotificationSink,
    permissions::PermissionChecker,
    scan::ScanEngine,
    storage::ObjectStorage,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn NotificationSink>,
    pub scanner: Arc<dyn ScanEngine>,
    pub extractor: Arc<dyn TextExtractor>,
    pub permissions: Arc<dyn PermissionChecker>,
}

pub struct Collaborators {
    pub storage: Arc<dyn ObjectStorage>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn NotificationSink>,
    pub scanner: Arc<dyn ScanEngine>,
    pub extractor: Arc<dyn TextExtractor>,
    pub permissions: Arc<dyn PermissionChecker>,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig, collaborators: Collaborators) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            storage: collaborators.storage,
            audit: collaborators.audit,
            notifier: collaborators.notifier,
            scanner: collaborators.scanner,
            extractor: collaborators.extractor,
            permissions: collaborators.permissions,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
