use std::{sync::Arc, time::Duration};

use tracing_subscriber::EnvFilter;

use docgov::{
    audit::DbAuditSink,
    config::AppConfig,
    create_router, db,
    extract::TesseractExtractor,
    notify::DbNotificationSink,
    permissions::StaticPermissionChecker,
    s3::build_client,
    scan::ClamavScanner,
    state::{AppState, Collaborators},
    storage::S3Storage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "api",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        s3_bucket = %config.s3_bucket,
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let s3_client = build_client(&config).await?;
    let subprocess_timeout = Duration::from_secs(config.subprocess_timeout_secs);

    let collaborators = Collaborators {
        storage: Arc::new(S3Storage::new(s3_client, config.s3_bucket.clone())),
        audit: Arc::new(DbAuditSink::new(pool.clone())),
        notifier: Arc::new(DbNotificationSink::new(pool.clone())),
        scanner: Arc::new(ClamavScanner::new(subprocess_timeout)),
        extractor: Arc::new(TesseractExtractor::new(
            config.ocr_languages.clone(),
            subprocess_timeout,
        )),
        permissions: Arc::new(StaticPermissionChecker::allow_all()),
    };

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let state = AppState::new(pool, config, collaborators);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
