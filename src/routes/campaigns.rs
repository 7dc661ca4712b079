use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::domain::campaigns::{self, AcknowledgeInput, CreateCampaignInput};
use crate::error::AppResult;
use crate::models::{AckAssignment, AckCampaign};
use crate::permissions::{require, RequestActor, PERM_CAMPAIGNS_MANAGE};
use crate::state::AppState;

#[derive(Serialize)]
pub struct CampaignResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub audience_type: String,
    pub audience_ids: Value,
    pub deadline: Option<String>,
    pub quiz_id: Option<Uuid>,
    pub status: String,
    pub created_by: Uuid,
    pub created_at: String,
}

impl From<AckCampaign> for CampaignResponse {
    fn from(campaign: AckCampaign) -> Self {
        Self {
            id: campaign.id,
            document_id: campaign.document_id,
            title: campaign.title,
            description: campaign.description,
            audience_type: campaign.audience_type,
            audience_ids: campaign.audience_ids,
            deadline: campaign.deadline.map(|at| at.and_utc().to_rfc3339()),
            quiz_id: campaign.quiz_id,
            status: campaign.status,
            created_by: campaign.created_by,
            created_at: campaign.created_at.and_utc().to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct AssignmentResponse {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub quiz_score: Option<i32>,
    pub quiz_passed: Option<bool>,
    pub completed_at: Option<String>,
}

impl From<AckAssignment> for AssignmentResponse {
    fn from(assignment: AckAssignment) -> Self {
        Self {
            id: assignment.id,
            campaign_id: assignment.campaign_id,
            user_id: assignment.user_id,
            status: assignment.status,
            quiz_score: assignment.quiz_score,
            quiz_passed: assignment.quiz_passed,
            completed_at: assignment.completed_at.map(|at| at.and_utc().to_rfc3339()),
        }
    }
}

#[derive(Serialize)]
pub struct CampaignDetailResponse {
    pub campaign: CampaignResponse,
    pub assignments: Vec<AssignmentResponse>,
}

pub async fn create_campaign(
    State(state): State<AppState>,
    actor: RequestActor,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<CreateCampaignInput>,
) -> AppResult<(StatusCode, Json<CampaignDetailResponse>)> {
    require(state.permissions.as_ref(), &actor, PERM_CAMPAIGNS_MANAGE)?;
    let mut conn = state.db()?;
    let (campaign, assignments) = campaigns::create_campaign(
        &mut conn,
        state.audit.as_ref(),
        state.notifier.as_ref(),
        &actor,
        document_id,
        payload,
    )?;
    info!(
        campaign_id = %campaign.id,
        document_id = %document_id,
        assignments = assignments.len(),
        "acknowledgment campaign created"
    );
    Ok((
        StatusCode::CREATED,
        Json(CampaignDetailResponse {
            campaign: campaign.into(),
            assignments: assignments.into_iter().map(Into::into).collect(),
        }),
    ))
}

pub async fn list_campaigns(
    State(state): State<AppState>,
    actor: RequestActor,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Vec<CampaignResponse>>> {
    let mut conn = state.db()?;
    let rows = campaigns::list_campaigns(&mut conn, actor.tenant_id, document_id)?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

pub async fn my_assignments(
    State(state): State<AppState>,
    actor: RequestActor,
) -> AppResult<Json<Vec<AssignmentResponse>>> {
    let mut conn = state.db()?;
    let rows =
        campaigns::pending_assignments_for_user(&mut conn, actor.tenant_id, actor.user_id)?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

pub async fn acknowledge(
    State(state): State<AppState>,
    actor: RequestActor,
    Path(assignment_id): Path<Uuid>,
    Json(payload): Json<AcknowledgeInput>,
) -> AppResult<Json<AssignmentResponse>> {
    let mut conn = state.db()?;
    let assignment = campaigns::acknowledge(
        &mut conn,
        state.audit.as_ref(),
        &actor,
        assignment_id,
        payload,
    )?;
    Ok(Json(assignment.into()))
}
