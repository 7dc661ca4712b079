use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::domain::workflow::{self, ApprovalAction, SubmitInput};
use crate::error::AppResult;
use crate::models::{ApprovalStep, ApprovalWorkflow};
use crate::permissions::{require, RequestActor, PERM_WORKFLOWS_MANAGE};
use crate::state::AppState;

#[derive(Serialize)]
pub struct WorkflowResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub workflow_type: String,
    pub status: String,
    pub created_by: Uuid,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl From<ApprovalWorkflow> for WorkflowResponse {
    fn from(workflow: ApprovalWorkflow) -> Self {
        Self {
            id: workflow.id,
            document_id: workflow.document_id,
            workflow_type: workflow.workflow_type,
            status: workflow.status,
            created_by: workflow.created_by,
            created_at: workflow.created_at.and_utc().to_rfc3339(),
            completed_at: workflow
                .completed_at
                .map(|at| at.and_utc().to_rfc3339()),
        }
    }
}

#[derive(Serialize)]
pub struct StepResponse {
    pub id: Uuid,
    pub step_order: i32,
    pub approver_id: Uuid,
    pub status: String,
    pub comments: Option<String>,
    pub completed_at: Option<String>,
}

impl From<ApprovalStep> for StepResponse {
    fn from(step: ApprovalStep) -> Self {
        Self {
            id: step.id,
            step_order: step.step_order,
            approver_id: step.approver_id,
            status: step.status,
            comments: step.comments,
            completed_at: step.completed_at.map(|at| at.and_utc().to_rfc3339()),
        }
    }
}

#[derive(Serialize)]
pub struct WorkflowDetailResponse {
    pub workflow: WorkflowResponse,
    pub steps: Vec<StepResponse>,
}

pub async fn submit_workflow(
    State(state): State<AppState>,
    actor: RequestActor,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<SubmitInput>,
) -> AppResult<(StatusCode, Json<WorkflowResponse>)> {
    require(state.permissions.as_ref(), &actor, PERM_WORKFLOWS_MANAGE)?;
    let mut conn = state.db()?;
    let workflow = workflow::submit_for_approval(
        &mut conn,
        state.audit.as_ref(),
        state.notifier.as_ref(),
        &actor,
        document_id,
        payload,
    )?;
    info!(document_id = %document_id, workflow_id = %workflow.id, "workflow submitted");
    Ok((StatusCode::CREATED, Json(workflow.into())))
}

pub async fn get_workflow(
    State(state): State<AppState>,
    actor: RequestActor,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<WorkflowDetailResponse>> {
    let mut conn = state.db()?;
    let (workflow, steps) =
        workflow::get_workflow_for_document(&mut conn, actor.tenant_id, document_id)?;
    Ok(Json(WorkflowDetailResponse {
        workflow: workflow.into(),
        steps: steps.into_iter().map(Into::into).collect(),
    }))
}

#[derive(Deserialize)]
pub struct ActionRequest {
    pub action: ApprovalAction,
    pub comments: Option<String>,
}

pub async fn act_on_step(
    State(state): State<AppState>,
    actor: RequestActor,
    Path((workflow_id, step_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<ActionRequest>,
) -> AppResult<Json<WorkflowResponse>> {
    let mut conn = state.db()?;
    let workflow = workflow::process_approval_action(
        &mut conn,
        state.audit.as_ref(),
        state.notifier.as_ref(),
        &actor,
        workflow_id,
        step_id,
        payload.action,
        payload.comments,
    )?;
    info!(
        workflow_id = %workflow_id,
        step_id = %step_id,
        status = %workflow.status,
        "approval action processed"
    );
    Ok(Json(workflow.into()))
}
