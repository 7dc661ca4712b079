use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: Uuid,
    pub tenant_id: Uuid,
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
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub doc_type: String,
    pub category: Option<String>,
    pub status: String,
    pub current_version: i32,
    pub owner_id: Option<Uuid>,
    pub classification: Option<String>,
    pub av_status: String,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = document_versions)]
#[diesel(belongs_to(Document))]
pub struct DocumentVersion {
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
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_versions)]
pub struct NewDocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version_number: i32,
    pub storage_key: String,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub checksum_sha256: String,
    pub av_status: String,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = approval_workflows)]
#[diesel(belongs_to(Document))]
pub struct ApprovalWorkflow {
    pub id: Uuid,
    pub document_id: Uuid,
    pub workflow_type: String,
    pub status: String,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = approval_workflows)]
pub struct NewApprovalWorkflow {
    pub id: Uuid,
    pub document_id: Uuid,
    pub workflow_type: String,
    pub status: String,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = approval_steps)]
#[diesel(belongs_to(ApprovalWorkflow, foreign_key = workflow_id))]
pub struct ApprovalStep {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub step_order: i32,
    pub approver_id: Uuid,
    pub status: String,
    pub comments: Option<String>,
    pub created_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = approval_steps)]
pub struct NewApprovalStep {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub step_order: i32,
    pub approver_id: Uuid,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = ack_campaigns)]
#[diesel(belongs_to(Document))]
pub struct AckCampaign {
    pub id: Uuid,
    pub document_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub audience_type: String,
    pub audience_ids: serde_json::Value,
    pub deadline: Option<NaiveDateTime>,
    pub quiz_id: Option<Uuid>,
    pub status: String,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ack_campaigns)]
pub struct NewAckCampaign {
    pub id: Uuid,
    pub document_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub audience_type: String,
    pub audience_ids: serde_json::Value,
    pub deadline: Option<NaiveDateTime>,
    pub quiz_id: Option<Uuid>,
    pub status: String,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = ack_assignments)]
#[diesel(belongs_to(AckCampaign, foreign_key = campaign_id))]
pub struct AckAssignment {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub quiz_score: Option<i32>,
    pub quiz_passed: Option<bool>,
    pub created_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ack_assignments)]
pub struct NewAckAssignment {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = audit_log)]
pub struct AuditEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub actor_id: Uuid,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = audit_log)]
pub struct NewAuditEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub actor_id: Uuid,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub document_id: Option<Uuid>,
    pub kind: String,
    pub body: String,
    pub created_at: NaiveDateTime,
    pub read_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub document_id: Option<Uuid>,
    pub kind: String,
    pub body: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}
