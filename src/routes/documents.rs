use axum::extract::{Json, Multipart, Path, Query, State};
use axum::http::StatusCode;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::domain::documents::{
    self, CreateDocumentInput, DocumentFilter, UpdateDocumentInput, VersionUpload,
};
use crate::error::{AppError, AppResult};
use crate::models::{Document, DocumentVersion};
use crate::permissions::{require, RequestActor, PERM_DOCUMENTS_MANAGE};
use crate::state::AppState;

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub title: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub doc_type: String,
    pub category: Option<String>,
    pub status: String,
    pub current_version: i32,
    pub owner_id: Option<Uuid>,
    pub classification: Option<String>,
    pub storage_key: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub checksum_sha256: Option<String>,
    pub ocr_text: Option<String>,
    pub av_status: String,
    pub created_by: Uuid,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Document> for DocumentResponse {
    fn from(document: Document) -> Self {
        Self {
            id: document.id,
            title: document.title,
            code: document.code,
            description: document.description,
            doc_type: document.doc_type,
            category: document.category,
            status: document.status,
            current_version: document.current_version,
            owner_id: document.owner_id,
            classification: document.classification,
            storage_key: document.storage_key,
            mime_type: document.mime_type,
            size_bytes: document.size_bytes,
            checksum_sha256: document.checksum_sha256,
            ocr_text: document.ocr_text,
            av_status: document.av_status,
            created_by: document.created_by,
            created_at: document.created_at.and_utc().to_rfc3339(),
            updated_at: document.updated_at.and_utc().to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct VersionResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version_number: i32,
    pub storage_key: String,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub checksum_sha256: String,
    pub ocr_text: Option<String>,
    pub av_status: String,
    pub av_detail: Option<String>,
    pub created_by: Uuid,
    pub created_at: String,
}

impl From<DocumentVersion> for VersionResponse {
    fn from(version: DocumentVersion) -> Self {
        Self {
            id: version.id,
            document_id: version.document_id,
            version_number: version.version_number,
            storage_key: version.storage_key,
            mime_type: version.mime_type,
            size_bytes: version.size_bytes,
            checksum_sha256: version.checksum_sha256,
            ocr_text: version.ocr_text,
            av_status: version.av_status,
            av_detail: version.av_detail,
            created_by: version.created_by,
            created_at: version.created_at.and_utc().to_rfc3339(),
        }
    }
}

pub async fn create_document(
    State(state): State<AppState>,
    actor: RequestActor,
    Json(payload): Json<CreateDocumentInput>,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    require(state.permissions.as_ref(), &actor, PERM_DOCUMENTS_MANAGE)?;
    let mut conn = state.db()?;
    let document = documents::create_document(&mut conn, state.audit.as_ref(), &actor, payload)?;
    info!(document_id = %document.id, "document created");
    Ok((StatusCode::CREATED, Json(document.into())))
}

pub async fn list_documents(
    State(state): State<AppState>,
    actor: RequestActor,
    Query(filter): Query<DocumentFilter>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;
    let rows = documents::list_documents(&mut conn, actor.tenant_id, &filter)?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

pub async fn get_document(
    State(state): State<AppState>,
    actor: RequestActor,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentResponse>> {
    let mut conn = state.db()?;
    let document = documents::get_document(&mut conn, actor.tenant_id, document_id)?;
    Ok(Json(document.into()))
}

pub async fn update_document(
    State(state): State<AppState>,
    actor: RequestActor,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<UpdateDocumentInput>,
) -> AppResult<Json<DocumentResponse>> {
    require(state.permissions.as_ref(), &actor, PERM_DOCUMENTS_MANAGE)?;
    let mut conn = state.db()?;
    let document =
        documents::update_document(&mut conn, state.audit.as_ref(), &actor, document_id, payload)?;
    Ok(Json(document.into()))
}

pub async fn delete_document(
    State(state): State<AppState>,
    actor: RequestActor,
    Path(document_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    require(state.permissions.as_ref(), &actor, PERM_DOCUMENTS_MANAGE)?;
    let mut conn = state.db()?;
    documents::delete_document(&mut conn, state.audit.as_ref(), &actor, document_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn publish_document(
    State(state): State<AppState>,
    actor: RequestActor,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentResponse>> {
    require(state.permissions.as_ref(), &actor, PERM_DOCUMENTS_MANAGE)?;
    let mut conn = state.db()?;
    let document =
        documents::publish_document(&mut conn, state.audit.as_ref(), &actor, document_id)?;
    Ok(Json(document.into()))
}

pub async fn list_versions(
    State(state): State<AppState>,
    actor: RequestActor,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Vec<VersionResponse>>> {
    let mut conn = state.db()?;
    let rows = documents::list_versions(&mut conn, actor.tenant_id, document_id)?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

pub async fn upload_version(
    State(state): State<AppState>,
    actor: RequestActor,
    Path(document_id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<VersionResponse>)> {
    require(state.permissions.as_ref(), &actor, PERM_DOCUMENTS_MANAGE)?;

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut extract_text = false;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::validation(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                filename = field.file_name().map(|n| n.to_string());
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::validation(format!("failed to read file bytes: {err}"))
                })?;
                file_bytes = Some(data.to_vec());
            }
            Some("extract_text") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::validation(format!("invalid extract_text: {err}")))?;
                extract_text = matches!(value.trim(), "true" | "1");
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| AppError::validation("file field is required"))?;
    if bytes.is_empty() {
        return Err(AppError::validation("file field must not be empty"));
    }
    let filename = filename.ok_or_else(|| AppError::validation("filename is required"))?;

    let mut conn = state.db()?;
    let (_, version_number) = documents::next_version(&mut conn, actor.tenant_id, document_id)?;

    let storage_key = documents::version_storage_key(document_id, version_number, &filename);
    let mime_type = documents::mime_type_for(&filename);
    let checksum = documents::checksum_sha256(&bytes);
    let size_bytes = bytes.len() as i64;

    state
        .storage
        .put_object(&storage_key, bytes, Some(mime_type.clone()))
        .await
        .map_err(|err| {
            error!(error = %err, document_id = %document_id, "blob upload failed");
            AppError::external(format!("object storage upload failed: {err}"))
        })?;

    let recorded = documents::record_version(
        &mut conn,
        state.audit.as_ref(),
        &actor,
        document_id,
        VersionUpload {
            version_number,
            storage_key: storage_key.clone(),
            filename,
            mime_type,
            size_bytes,
            checksum_sha256: checksum,
            extract_text,
        },
    );
    let version = match recorded {
        Ok(version) => version,
        Err(err) => {
            // The blob went up before the ledger write; remove it so a lost
            // race does not leave an orphan object under the claimed key.
            if let Err(delete_err) = state.storage.delete_object(&storage_key).await {
                error!(
                    error = %delete_err,
                    key = %storage_key,
                    "failed to delete blob after version record failure"
                );
            }
            return Err(err);
        }
    };

    info!(
        document_id = %document_id,
        version_number = version.version_number,
        "document version uploaded"
    );
    Ok((StatusCode::CREATED, Json(version.into())))
}
