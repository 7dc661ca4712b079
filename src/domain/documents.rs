use chrono::{NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::audit::{self, AuditSink};
use crate::error::{AppError, AppResult};
use crate::extract::mime_for_filename;
use crate::jobs::{self, JOB_EXTRACT_TEXT, JOB_SCAN_VERSION};
use crate::models::{Document, DocumentVersion, NewDocument, NewDocumentVersion};
use crate::permissions::RequestActor;
use crate::scan::AV_STATUS_PENDING;
use crate::schema::{document_versions, documents};

pub const STATUS_DRAFT: &str = "draft";
pub const STATUS_IN_REVIEW: &str = "in_review";
pub const STATUS_APPROVED: &str = "approved";

pub const DOCUMENT_TYPES: &[&str] = &[
    "policy",
    "standard",
    "procedure",
    "instruction",
    "act",
    "other",
];

#[derive(Debug, Deserialize)]
pub struct CreateDocumentInput {
    pub title: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub doc_type: String,
    pub category: Option<String>,
    pub owner_id: Option<Uuid>,
    pub classification: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateDocumentInput {
    pub title: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub owner_id: Option<Uuid>,
    pub classification: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DocumentFilter {
    pub status: Option<String>,
    pub doc_type: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = documents)]
struct DocumentChanges {
    title: Option<String>,
    code: Option<String>,
    description: Option<String>,
    category: Option<String>,
    owner_id: Option<Uuid>,
    classification: Option<String>,
    updated_at: NaiveDateTime,
}

pub fn create_document(
    conn: &mut PgConnection,
    sink: &dyn AuditSink,
    actor: &RequestActor,
    input: CreateDocumentInput,
) -> AppResult<Document> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(AppError::validation("title must not be empty"));
    }
    if !DOCUMENT_TYPES.contains(&input.doc_type.as_str()) {
        return Err(AppError::validation(format!(
            "unknown document type '{}'",
            input.doc_type
        )));
    }

    let new_document = NewDocument {
        id: Uuid::new_v4(),
        tenant_id: actor.tenant_id,
        title: title.to_string(),
        code: input.code,
        description: input.description,
        doc_type: input.doc_type,
        category: input.category,
        status: STATUS_DRAFT.to_string(),
        current_version: 0,
        owner_id: input.owner_id,
        classification: input.classification,
        av_status: AV_STATUS_PENDING.to_string(),
        created_by: actor.user_id,
    };

    diesel::insert_into(documents::table)
        .values(&new_document)
        .execute(conn)?;
    let document: Document = documents::table.find(new_document.id).first(conn)?;

    audit::record(
        sink,
        actor.tenant_id,
        actor.user_id,
        "document.created",
        "document",
        Some(document.id),
        json!({ "title": document.title, "doc_type": document.doc_type }),
    );

    Ok(document)
}

pub fn get_document(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    document_id: Uuid,
) -> AppResult<Document> {
    documents::table
        .filter(documents::id.eq(document_id))
        .filter(documents::tenant_id.eq(tenant_id))
        .filter(documents::deleted_at.is_null())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("document not found"))
}

pub fn list_documents(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    filter: &DocumentFilter,
) -> AppResult<Vec<Document>> {
    let mut query = documents::table
        .filter(documents::tenant_id.eq(tenant_id))
        .filter(documents::deleted_at.is_null())
        .into_boxed();

    if let Some(status) = &filter.status {
        query = query.filter(documents::status.eq(status.clone()));
    }
    if let Some(doc_type) = &filter.doc_type {
        query = query.filter(documents::doc_type.eq(doc_type.clone()));
    }

    let rows = query.order(documents::created_at.desc()).load(conn)?;
    Ok(rows)
}

pub fn update_document(
    conn: &mut PgConnection,
    sink: &dyn AuditSink,
    actor: &RequestActor,
    document_id: Uuid,
    input: UpdateDocumentInput,
) -> AppResult<Document> {
    let document = get_document(conn, actor.tenant_id, document_id)?;
    if document.status == STATUS_APPROVED {
        return Err(AppError::invalid_state(
            "approved documents are immutable; create a new version instead",
        ));
    }
    if let Some(title) = &input.title {
        if title.trim().is_empty() {
            return Err(AppError::validation("title must not be empty"));
        }
    }

    let changes = DocumentChanges {
        title: input.title,
        code: input.code,
        description: input.description,
        category: input.category,
        owner_id: input.owner_id,
        classification: input.classification,
        updated_at: Utc::now().naive_utc(),
    };
    diesel::update(documents::table.find(document.id))
        .set(&changes)
        .execute(conn)?;
    let document: Document = documents::table.find(document.id).first(conn)?;

    audit::record(
        sink,
        actor.tenant_id,
        actor.user_id,
        "document.updated",
        "document",
        Some(document.id),
        json!({ "title": document.title }),
    );

    Ok(document)
}

pub fn delete_document(
    conn: &mut PgConnection,
    sink: &dyn AuditSink,
    actor: &RequestActor,
    document_id: Uuid,
) -> AppResult<()> {
    let document = get_document(conn, actor.tenant_id, document_id)?;
    if document.status == STATUS_APPROVED {
        return Err(AppError::invalid_state(
            "approved documents cannot be deleted",
        ));
    }

    diesel::update(documents::table.find(document.id))
        .set((
            documents::deleted_at.eq(Some(Utc::now().naive_utc())),
            documents::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;

    audit::record(
        sink,
        actor.tenant_id,
        actor.user_id,
        "document.deleted",
        "document",
        Some(document.id),
        json!({ "title": document.title }),
    );

    Ok(())
}

/// Marks an approved document as published. There is no distinct published
/// state; the transition is recorded in the audit trail only.
pub fn publish_document(
    conn: &mut PgConnection,
    sink: &dyn AuditSink,
    actor: &RequestActor,
    document_id: Uuid,
) -> AppResult<Document> {
    let document = get_document(conn, actor.tenant_id, document_id)?;
    if document.status != STATUS_APPROVED {
        return Err(AppError::invalid_state(
            "only approved documents can be published",
        ));
    }

    diesel::update(documents::table.find(document.id))
        .set(documents::updated_at.eq(Utc::now().naive_utc()))
        .execute(conn)?;

    audit::record(
        sink,
        actor.tenant_id,
        actor.user_id,
        "document.published",
        "document",
        Some(document.id),
        json!({ "version": document.current_version }),
    );

    Ok(document)
}

pub fn list_versions(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    document_id: Uuid,
) -> AppResult<Vec<DocumentVersion>> {
    let document = get_document(conn, tenant_id, document_id)?;
    let rows = document_versions::table
        .filter(document_versions::document_id.eq(document.id))
        .order(document_versions::version_number.desc())
        .load(conn)?;
    Ok(rows)
}

pub fn find_version(conn: &mut PgConnection, version_id: Uuid) -> AppResult<DocumentVersion> {
    document_versions::table
        .find(version_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("document version not found"))
}

/// Metadata for a blob already written to object storage; `record_version`
/// turns it into the version row and pointer update.
#[derive(Debug)]
pub struct VersionUpload {
    pub version_number: i32,
    pub storage_key: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub checksum_sha256: String,
    pub extract_text: bool,
}

/// Reads the document and claims the next version number. The claim is
/// re-validated under a row lock in `record_version`, after the blob upload.
pub fn next_version(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    document_id: Uuid,
) -> AppResult<(Document, i32)> {
    let document = get_document(conn, tenant_id, document_id)?;
    let number = document.current_version + 1;
    Ok((document, number))
}

pub fn version_storage_key(document_id: Uuid, version_number: i32, filename: &str) -> String {
    format!("documents/{document_id}/v{version_number}/{filename}")
}

pub fn checksum_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn mime_type_for(filename: &str) -> String {
    mime_for_filename(filename)
}

/// Inserts the version row and bumps the document's denormalized pointer
/// fields, with the document row locked for the whole transaction. A claimed
/// version number that is no longer `current_version + 1` means a concurrent
/// upload won the race; the caller may retry.
pub fn record_version(
    conn: &mut PgConnection,
    sink: &dyn AuditSink,
    actor: &RequestActor,
    document_id: Uuid,
    upload: VersionUpload,
) -> AppResult<DocumentVersion> {
    let version = conn.transaction::<DocumentVersion, AppError, _>(|conn| {
        let document: Document = documents::table
            .filter(documents::id.eq(document_id))
            .filter(documents::tenant_id.eq(actor.tenant_id))
            .filter(documents::deleted_at.is_null())
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("document not found"))?;

        if document.current_version + 1 != upload.version_number {
            return Err(AppError::invalid_state(
                "another version was uploaded concurrently, retry the upload",
            ));
        }

        let new_version = NewDocumentVersion {
            id: Uuid::new_v4(),
            document_id: document.id,
            version_number: upload.version_number,
            storage_key: upload.storage_key.clone(),
            mime_type: Some(upload.mime_type.clone()),
            size_bytes: Some(upload.size_bytes),
            checksum_sha256: upload.checksum_sha256.clone(),
            av_status: AV_STATUS_PENDING.to_string(),
            created_by: actor.user_id,
        };
        diesel::insert_into(document_versions::table)
            .values(&new_version)
            .execute(conn)?;

        diesel::update(documents::table.find(document.id))
            .set((
                documents::current_version.eq(upload.version_number),
                documents::storage_key.eq(Some(upload.storage_key.clone())),
                documents::mime_type.eq(Some(upload.mime_type.clone())),
                documents::size_bytes.eq(Some(upload.size_bytes)),
                documents::checksum_sha256.eq(Some(upload.checksum_sha256.clone())),
                documents::ocr_text.eq::<Option<String>>(None),
                documents::av_status.eq(AV_STATUS_PENDING),
                documents::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;

        jobs::enqueue_job(
            conn,
            JOB_SCAN_VERSION,
            json!({ "version_id": new_version.id }),
            None,
        )
        .map_err(AppError::internal)?;
        if upload.extract_text {
            jobs::enqueue_job(
                conn,
                JOB_EXTRACT_TEXT,
                json!({ "version_id": new_version.id, "filename": upload.filename }),
                None,
            )
            .map_err(AppError::internal)?;
        }

        let version = document_versions::table.find(new_version.id).first(conn)?;
        Ok(version)
    })?;

    audit::record(
        sink,
        actor.tenant_id,
        actor.user_id,
        "document.version.uploaded",
        "document",
        Some(document_id),
        json!({
            "version_id": version.id,
            "version_number": version.version_number,
            "filename": upload.filename,
            "size_bytes": upload.size_bytes,
        }),
    );

    Ok(version)
}
