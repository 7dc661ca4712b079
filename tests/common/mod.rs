use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use docgov::audit::DbAuditSink;
use docgov::config::AppConfig;
use docgov::db::{self, PgPool};
use docgov::extract::{is_extractable_extension, ExtractError, TextExtractor};
use docgov::models::{Job, NewUser, Notification};
use docgov::notify::DbNotificationSink;
use docgov::permissions::StaticPermissionChecker;
use docgov::routes;
use docgov::scan::{ScanEngine, ScanVerdict};
use docgov::state::{AppState, Collaborators};
use docgov::storage::ObjectStorage;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

#[derive(Clone, Copy)]
pub struct Actor {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
}

impl Actor {
    pub fn new(tenant_id: Uuid) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            tenant_id,
        }
    }
}

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let guard = self.objects.lock().await;
        guard
            .get(key)
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| anyhow!("object {key} missing"))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }
}

/// Scan engine with a scripted verdict; no subprocesses in tests.
pub struct FakeScanner {
    verdict: std::sync::Mutex<ScanVerdict>,
}

impl Default for FakeScanner {
    fn default() -> Self {
        Self {
            verdict: std::sync::Mutex::new(ScanVerdict::Clean),
        }
    }
}

impl FakeScanner {
    #[allow(dead_code)]
    pub fn set_verdict(&self, verdict: ScanVerdict) {
        *self.verdict.lock().expect("verdict lock") = verdict;
    }
}

impl ScanEngine for FakeScanner {
    fn scan(&self, _bytes: &[u8]) -> Result<ScanVerdict> {
        Ok(self.verdict.lock().expect("verdict lock").clone())
    }
}

/// Extractor that echoes the filename; rejects the same extensions the real
/// one would.
#[derive(Default)]
pub struct FakeExtractor;

impl TextExtractor for FakeExtractor {
    fn extract(&self, _bytes: &[u8], filename: &str) -> Result<String, ExtractError> {
        let ext = std::path::Path::new(filename)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !is_extractable_extension(&ext) {
            return Err(ExtractError::UnsupportedExtension(ext));
        }
        Ok(format!("extracted text from {filename}"))
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
    scanner: Arc<FakeScanner>,
}

impl TestApp {
    /// Returns `Ok(None)` when `TEST_DATABASE_URL` is not set so suites can
    /// skip without failing on machines without Postgres.
    pub async fn new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            return Ok(None);
        };

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
            subprocess_timeout_secs: 5,
            ocr_languages: vec!["eng".to_string()],
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let scanner = Arc::new(FakeScanner::default());
        let collaborators = Collaborators {
            storage: storage.clone(),
            audit: Arc::new(DbAuditSink::new(pool.clone())),
            notifier: Arc::new(DbNotificationSink::new(pool.clone())),
            scanner: scanner.clone(),
            extractor: Arc::new(FakeExtractor),
            permissions: Arc::new(StaticPermissionChecker::allow_all()),
        };

        let state = AppState::new(pool.clone(), config, collaborators);
        let router = routes::create_router(state.clone());

        Ok(Some(Self {
            state,
            router,
            storage,
            scanner,
        }))
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    #[allow(dead_code)]
    pub fn scanner(&self) -> Arc<FakeScanner> {
        self.scanner.clone()
    }

    #[allow(dead_code)]
    pub async fn insert_user(&self, tenant_id: Uuid, email: &str, is_active: bool) -> Result<Uuid> {
        let email = email.to_string();
        self.with_conn(move |conn| {
            let user = NewUser {
                id: Uuid::new_v4(),
                tenant_id,
                email: email.clone(),
                display_name: email,
                role: "member".to_string(),
                is_active,
            };
            diesel::insert_into(docgov::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn jobs_by_type(&self, ty: &str) -> Result<Vec<Job>> {
        let ty = ty.to_string();
        self.with_conn(move |conn| {
            use docgov::schema::jobs::dsl::{job_type as job_type_col, jobs as jobs_table};
            let rows = jobs_table
                .filter(job_type_col.eq(&ty))
                .load::<Job>(conn)
                .context("failed to load jobs")?;
            Ok(rows)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn notifications_for(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        self.with_conn(move |conn| {
            use docgov::schema::notifications::dsl::{
                notifications as notifications_table, user_id as user_col,
            };
            let rows = notifications_table
                .filter(user_col.eq(user_id))
                .load::<Notification>(conn)
                .context("failed to load notifications")?;
            Ok(rows)
        })
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        actor: &Actor,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json")
            .header("x-user-id", actor.user_id.to_string())
            .header("x-tenant-id", actor.tenant_id.to_string())
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        actor: &Actor,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let request = Request::builder()
            .method(Method::PATCH)
            .uri(path)
            .header("content-type", "application/json")
            .header("x-user-id", actor.user_id.to_string())
            .header("x-tenant-id", actor.tenant_id.to_string())
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, actor: &Actor) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header("x-user-id", actor.user_id.to_string())
            .header("x-tenant-id", actor.tenant_id.to_string())
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, actor: &Actor) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(path)
            .header("x-user-id", actor.user_id.to_string())
            .header("x-tenant-id", actor.tenant_id.to_string())
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn upload_version(
        &self,
        document_id: Uuid,
        filename: &str,
        content_type: &str,
        data: &[u8],
        extract_text: bool,
        actor: &Actor,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend(data);
        body.extend(b"\r\n");

        if extract_text {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(b"Content-Disposition: form-data; name=\"extract_text\"\r\n\r\n");
            body.extend(b"true\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/documents/{document_id}/versions"))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("x-user-id", actor.user_id.to_string())
            .header("x-tenant-id", actor.tenant_id.to_string())
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE jobs, notifications, audit_log, ack_assignments, ack_campaigns, \
         approval_steps, approval_workflows, document_versions, documents, users \
         RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
