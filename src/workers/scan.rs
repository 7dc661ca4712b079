use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use tokio::task;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    domain::documents as domain_docs,
    error::AppError,
    jobs::JOB_SCAN_VERSION,
    models::{Document, DocumentVersion, Job},
    scan::ScanVerdict,
    schema::{document_versions, documents},
    state::AppState,
};

use super::{JobExecution, JobHandler};

#[derive(Clone, Debug, Deserialize)]
struct ScanPayload {
    version_id: Uuid,
}

/// Runs the antivirus engine over a freshly uploaded version and records the
/// verdict on the version row (and the document's denormalized copy when the
/// version is still the latest).
pub struct ScanVersionJob;

impl ScanVersionJob {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for ScanVersionJob {
    fn job_type(&self) -> &'static str {
        JOB_SCAN_VERSION
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload: ScanPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid scan payload: {err}"),
                }
            }
        };

        let state_clone = state.clone();
        let version = match task::spawn_blocking(move || {
            load_version(&state_clone, payload.version_id)
        })
        .await
        {
            Ok(Ok(version)) => version,
            Ok(Err(LoadError::Gone(message))) => {
                warn!(job_id = %job.id, %message, "nothing to scan");
                return JobExecution::Failed { error: message };
            }
            Ok(Err(LoadError::Transient(message))) => {
                return JobExecution::Retry {
                    delay: Duration::from_secs(30),
                    error: message,
                };
            }
            Err(join_err) => {
                error!(job_id = %job.id, error = %join_err, "scan task panicked");
                return JobExecution::Retry {
                    delay: Duration::from_secs(60),
                    error: format!("worker panicked: {join_err}"),
                };
            }
        };

        let bytes = match state.storage.get_object(&version.storage_key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "failed to fetch version for scanning");
                return JobExecution::Retry {
                    delay: Duration::from_secs(30),
                    error: err.to_string(),
                };
            }
        };

        let scanner = state.scanner.clone();
        let verdict = match task::spawn_blocking(move || scanner.scan(&bytes)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(err)) => {
                warn!(job_id = %job.id, error = %err, "antivirus engine failed");
                return JobExecution::Retry {
                    delay: Duration::from_secs(60),
                    error: err.to_string(),
                };
            }
            Err(join_err) => {
                error!(job_id = %job.id, error = %join_err, "scan task panicked");
                return JobExecution::Retry {
                    delay: Duration::from_secs(60),
                    error: format!("worker panicked: {join_err}"),
                };
            }
        };

        if let ScanVerdict::Infected { detail } = &verdict {
            warn!(
                version_id = %version.id,
                document_id = %version.document_id,
                detail,
                "infected upload detected"
            );
        }

        let state_clone = state.clone();
        let version_id = version.id;
        match task::spawn_blocking(move || write_verdict(&state_clone, version_id, &verdict)).await
        {
            Ok(Ok(())) => {
                info!(version_id = %version_id, "scan verdict recorded");
                JobExecution::Success
            }
            Ok(Err(message)) => JobExecution::Retry {
                delay: Duration::from_secs(30),
                error: message,
            },
            Err(join_err) => JobExecution::Retry {
                delay: Duration::from_secs(60),
                error: format!("worker panicked: {join_err}"),
            },
        }
    }
}

enum LoadError {
    Gone(String),
    Transient(String),
}

fn load_version(state: &AppState, version_id: Uuid) -> Result<DocumentVersion, LoadError> {
    let mut conn = state
        .db()
        .map_err(|err| LoadError::Transient(err.to_string()))?;
    match domain_docs::find_version(&mut conn, version_id) {
        Ok(version) => Ok(version),
        Err(AppError::NotFound(message)) => Err(LoadError::Gone(message)),
        Err(err) => Err(LoadError::Transient(err.to_string())),
    }
}

fn write_verdict(
    state: &AppState,
    version_id: Uuid,
    verdict: &ScanVerdict,
) -> Result<(), String> {
    let mut conn = state.db().map_err(|err| err.to_string())?;
    conn.transaction::<(), diesel::result::Error, _>(|conn| {
        let version: DocumentVersion = document_versions::table.find(version_id).first(conn)?;

        diesel::update(document_versions::table.find(version_id))
            .set((
                document_versions::av_status.eq(verdict.status()),
                document_versions::av_detail.eq(verdict.detail().map(|d| d.to_string())),
            ))
            .execute(conn)?;

        let document: Document = documents::table.find(version.document_id).first(conn)?;
        if document.current_version == version.version_number {
            diesel::update(documents::table.find(document.id))
                .set((
                    documents::av_status.eq(verdict.status()),
                    documents::updated_at.eq(Utc::now().naive_utc()),
                ))
                .execute(conn)?;
        }
        Ok(())
    })
    .map_err(|err| err.to_string())
}
