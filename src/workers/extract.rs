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
    extract::ExtractError,
    jobs::JOB_EXTRACT_TEXT,
    models::{Document, DocumentVersion, Job},
    schema::{document_versions, documents},
    state::AppState,
};

use super::{JobExecution, JobHandler};

#[derive(Clone, Debug, Deserialize)]
struct ExtractPayload {
    version_id: Uuid,
    filename: String,
}

/// OCRs the blob behind a version and stores the result in `ocr_text`. A file
/// type the extractor cannot handle fails the job without retrying.
pub struct ExtractTextJob;

impl ExtractTextJob {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for ExtractTextJob {
    fn job_type(&self) -> &'static str {
        JOB_EXTRACT_TEXT
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload: ExtractPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid extract payload: {err}"),
                }
            }
        };

        let state_clone = state.clone();
        let version_id = payload.version_id;
        let version =
            match task::spawn_blocking(move || load_version(&state_clone, version_id)).await {
                Ok(Ok(version)) => version,
                Ok(Err(LoadError::Gone(message))) => {
                    warn!(job_id = %job.id, %message, "nothing to extract");
                    return JobExecution::Failed { error: message };
                }
                Ok(Err(LoadError::Transient(message))) => {
                    return JobExecution::Retry {
                        delay: Duration::from_secs(30),
                        error: message,
                    };
                }
                Err(join_err) => {
                    error!(job_id = %job.id, error = %join_err, "extract task panicked");
                    return JobExecution::Retry {
                        delay: Duration::from_secs(60),
                        error: format!("worker panicked: {join_err}"),
                    };
                }
            };

        let bytes = match state.storage.get_object(&version.storage_key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "failed to fetch version for extraction");
                return JobExecution::Retry {
                    delay: Duration::from_secs(30),
                    error: err.to_string(),
                };
            }
        };

        let extractor = state.extractor.clone();
        let filename = payload.filename.clone();
        let text = match task::spawn_blocking(move || extractor.extract(&bytes, &filename)).await {
            Ok(Ok(text)) => text,
            Ok(Err(err @ ExtractError::UnsupportedExtension(_))) => {
                // Re-running the job can never succeed for this file type.
                return JobExecution::Failed {
                    error: err.to_string(),
                };
            }
            Ok(Err(err)) => {
                warn!(job_id = %job.id, error = %err, "text extraction failed");
                return JobExecution::Retry {
                    delay: Duration::from_secs(60),
                    error: err.to_string(),
                };
            }
            Err(join_err) => {
                error!(job_id = %job.id, error = %join_err, "extract task panicked");
                return JobExecution::Retry {
                    delay: Duration::from_secs(60),
                    error: format!("worker panicked: {join_err}"),
                };
            }
        };

        let state_clone = state.clone();
        match task::spawn_blocking(move || write_text(&state_clone, version_id, &text)).await {
            Ok(Ok(())) => {
                info!(version_id = %version_id, "extracted text recorded");
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

fn write_text(state: &AppState, version_id: Uuid, text: &str) -> Result<(), String> {
    let mut conn = state.db().map_err(|err| err.to_string())?;
    conn.transaction::<(), diesel::result::Error, _>(|conn| {
        let version: DocumentVersion = document_versions::table.find(version_id).first(conn)?;

        diesel::update(document_versions::table.find(version_id))
            .set(document_versions::ocr_text.eq(Some(text.to_string())))
            .execute(conn)?;

        let document: Document = documents::table.find(version.document_id).first(conn)?;
        if document.current_version == version.version_number {
            diesel::update(documents::table.find(document.id))
                .set((
                    documents::ocr_text.eq(Some(text.to_string())),
                    documents::updated_at.eq(Utc::now().naive_utc()),
                ))
                .execute(conn)?;
        }
        Ok(())
    })
    .map_err(|err| err.to_string())
}
