use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::audit::{self, AuditSink};
use crate::error::{AppError, AppResult};
use crate::models::{
    ApprovalStep, ApprovalWorkflow, Document, NewApprovalStep, NewApprovalWorkflow,
};
use crate::notify::{self, NotificationSink, KIND_APPROVAL_REQUESTED};
use crate::permissions::RequestActor;
use crate::schema::{approval_steps, approval_workflows, documents};

use super::documents::{STATUS_APPROVED, STATUS_DRAFT, STATUS_IN_REVIEW};

pub const TYPE_SEQUENTIAL: &str = "sequential";
pub const TYPE_PARALLEL: &str = "parallel";

pub const WORKFLOW_PENDING: &str = "pending";
pub const WORKFLOW_APPROVED: &str = "approved";
pub const WORKFLOW_REJECTED: &str = "rejected";

pub const STEP_PENDING: &str = "pending";
pub const STEP_APPROVED: &str = "approved";
pub const STEP_REJECTED: &str = "rejected";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalAction {
    Approved,
    Rejected,
}

#[derive(Debug, Deserialize)]
pub struct SubmitInput {
    pub workflow_type: String,
    pub approvers: Vec<Uuid>,
}

pub fn submit_for_approval(
    conn: &mut PgConnection,
    sink: &dyn AuditSink,
    notifier: &dyn NotificationSink,
    actor: &RequestActor,
    document_id: Uuid,
    input: SubmitInput,
) -> AppResult<ApprovalWorkflow> {
    if input.workflow_type != TYPE_SEQUENTIAL && input.workflow_type != TYPE_PARALLEL {
        return Err(AppError::validation(format!(
            "unknown workflow type '{}'",
            input.workflow_type
        )));
    }
    if input.approvers.is_empty() {
        return Err(AppError::validation("at least one approver is required"));
    }
    let mut seen = std::collections::HashSet::new();
    for approver in &input.approvers {
        if !seen.insert(*approver) {
            return Err(AppError::validation("duplicate approver in step list"));
        }
    }

    let (workflow, steps) = conn.transaction::<(ApprovalWorkflow, Vec<ApprovalStep>), AppError, _>(
        |conn| {
            let document: Document = documents::table
                .filter(documents::id.eq(document_id))
                .filter(documents::tenant_id.eq(actor.tenant_id))
                .filter(documents::deleted_at.is_null())
                .for_update()
                .first(conn)
                .optional()?
                .ok_or_else(|| AppError::not_found("document not found"))?;

            if document.status != STATUS_DRAFT {
                return Err(AppError::invalid_state(format!(
                    "document in status '{}' cannot be submitted for approval",
                    document.status
                )));
            }

            let active = approval_workflows::table
                .filter(approval_workflows::document_id.eq(document.id))
                .filter(approval_workflows::status.eq(WORKFLOW_PENDING))
                .count()
                .get_result::<i64>(conn)?;
            if active > 0 {
                return Err(AppError::invalid_state(
                    "document already has a pending approval workflow",
                ));
            }

            let new_workflow = NewApprovalWorkflow {
                id: Uuid::new_v4(),
                document_id: document.id,
                workflow_type: input.workflow_type.clone(),
                status: WORKFLOW_PENDING.to_string(),
                created_by: actor.user_id,
            };
            diesel::insert_into(approval_workflows::table)
                .values(&new_workflow)
                .execute(conn)?;

            let new_steps: Vec<NewApprovalStep> = input
                .approvers
                .iter()
                .enumerate()
                .map(|(idx, approver_id)| NewApprovalStep {
                    id: Uuid::new_v4(),
                    workflow_id: new_workflow.id,
                    step_order: idx as i32 + 1,
                    approver_id: *approver_id,
                    status: STEP_PENDING.to_string(),
                })
                .collect();
            diesel::insert_into(approval_steps::table)
                .values(&new_steps)
                .execute(conn)?;

            diesel::update(documents::table.find(document.id))
                .set((
                    documents::status.eq(STATUS_IN_REVIEW),
                    documents::updated_at.eq(Utc::now().naive_utc()),
                ))
                .execute(conn)?;

            let workflow = approval_workflows::table.find(new_workflow.id).first(conn)?;
            let steps = approval_steps::table
                .filter(approval_steps::workflow_id.eq(new_workflow.id))
                .order(approval_steps::step_order.asc())
                .load(conn)?;
            Ok((workflow, steps))
        },
    )?;

    audit::record(
        sink,
        actor.tenant_id,
        actor.user_id,
        "document.submitted_for_approval",
        "document",
        Some(document_id),
        json!({
            "workflow_id": workflow.id,
            "workflow_type": workflow.workflow_type,
            "steps": steps.len(),
        }),
    );

    for approver_id in eligible_approvers(&workflow.workflow_type, &step_views(&steps)) {
        notify::deliver(
            notifier,
            actor.tenant_id,
            approver_id,
            Some(document_id),
            KIND_APPROVAL_REQUESTED,
            "A document is awaiting your approval",
        );
    }

    Ok(workflow)
}

pub fn process_approval_action(
    conn: &mut PgConnection,
    sink: &dyn AuditSink,
    notifier: &dyn NotificationSink,
    actor: &RequestActor,
    workflow_id: Uuid,
    step_id: Uuid,
    action: ApprovalAction,
    comments: Option<String>,
) -> AppResult<ApprovalWorkflow> {
    let outcome = conn.transaction::<ActionOutcome, AppError, _>(|conn| {
        let workflow: ApprovalWorkflow = approval_workflows::table
            .find(workflow_id)
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("workflow not found"))?;

        // Lock the document first; every workflow mutation for it serializes
        // on this row.
        let document: Document = documents::table
            .filter(documents::id.eq(workflow.document_id))
            .filter(documents::tenant_id.eq(actor.tenant_id))
            .filter(documents::deleted_at.is_null())
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("document not found"))?;

        if workflow.status != WORKFLOW_PENDING {
            return Err(AppError::invalid_state(format!(
                "workflow is already {}",
                workflow.status
            )));
        }

        let step: ApprovalStep = approval_steps::table
            .find(step_id)
            .filter(approval_steps::workflow_id.eq(workflow.id))
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("approval step not found"))?;

        if step.status != STEP_PENDING {
            return Err(AppError::invalid_state(format!(
                "step is already {}",
                step.status
            )));
        }
        if step.approver_id != actor.user_id {
            return Err(AppError::unauthorized(
                "only the assigned approver can act on this step",
            ));
        }

        let steps: Vec<ApprovalStep> = approval_steps::table
            .filter(approval_steps::workflow_id.eq(workflow.id))
            .order(approval_steps::step_order.asc())
            .load(conn)?;

        if workflow.workflow_type == TYPE_SEQUENTIAL {
            let blocked = steps.iter().any(|earlier| {
                earlier.step_order < step.step_order && earlier.status != STEP_APPROVED
            });
            if blocked {
                return Err(AppError::invalid_state(
                    "earlier steps must be approved first",
                ));
            }
        }

        let now = Utc::now().naive_utc();
        let step_status = match action {
            ApprovalAction::Approved => STEP_APPROVED,
            ApprovalAction::Rejected => STEP_REJECTED,
        };
        diesel::update(approval_steps::table.find(step.id))
            .set((
                approval_steps::status.eq(step_status),
                approval_steps::comments.eq(comments.clone()),
                approval_steps::completed_at.eq(Some(now)),
            ))
            .execute(conn)?;

        let mut next_approvers = Vec::new();
        match action {
            ApprovalAction::Rejected => {
                diesel::update(approval_workflows::table.find(workflow.id))
                    .set((
                        approval_workflows::status.eq(WORKFLOW_REJECTED),
                        approval_workflows::completed_at.eq(Some(now)),
                    ))
                    .execute(conn)?;
                diesel::update(documents::table.find(document.id))
                    .set((
                        documents::status.eq(STATUS_DRAFT),
                        documents::updated_at.eq(now),
                    ))
                    .execute(conn)?;
            }
            ApprovalAction::Approved => {
                // Re-read so the evaluation sees the step we just updated.
                let steps: Vec<ApprovalStep> = approval_steps::table
                    .filter(approval_steps::workflow_id.eq(workflow.id))
                    .order(approval_steps::step_order.asc())
                    .load(conn)?;
                match evaluate(&workflow.workflow_type, &step_views(&steps)) {
                    Evaluation::Complete => {
                        diesel::update(approval_workflows::table.find(workflow.id))
                            .set((
                                approval_workflows::status.eq(WORKFLOW_APPROVED),
                                approval_workflows::completed_at.eq(Some(now)),
                            ))
                            .execute(conn)?;
                        diesel::update(documents::table.find(document.id))
                            .set((
                                documents::status.eq(STATUS_APPROVED),
                                documents::updated_at.eq(now),
                            ))
                            .execute(conn)?;
                    }
                    Evaluation::Awaiting { approvers } => {
                        next_approvers = approvers;
                    }
                }
            }
        }

        let workflow = approval_workflows::table.find(workflow.id).first(conn)?;
        Ok(ActionOutcome {
            workflow,
            document_id: document.id,
            next_approvers,
        })
    })?;

    let action_name = match action {
        ApprovalAction::Approved => "document.approval.approved",
        ApprovalAction::Rejected => "document.approval.rejected",
    };
    audit::record(
        sink,
        actor.tenant_id,
        actor.user_id,
        action_name,
        "document",
        Some(outcome.document_id),
        json!({
            "workflow_id": outcome.workflow.id,
            "step_id": step_id,
            "comments": comments,
        }),
    );

    for approver_id in &outcome.next_approvers {
        notify::deliver(
            notifier,
            actor.tenant_id,
            *approver_id,
            Some(outcome.document_id),
            KIND_APPROVAL_REQUESTED,
            "A document is awaiting your approval",
        );
    }

    Ok(outcome.workflow)
}

pub fn get_workflow_for_document(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    document_id: Uuid,
) -> AppResult<(ApprovalWorkflow, Vec<ApprovalStep>)> {
    let workflow: ApprovalWorkflow = approval_workflows::table
        .inner_join(documents::table)
        .filter(documents::id.eq(document_id))
        .filter(documents::tenant_id.eq(tenant_id))
        .order(approval_workflows::created_at.desc())
        .select(approval_workflows::all_columns)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("no workflow for this document"))?;

    let steps = approval_steps::table
        .filter(approval_steps::workflow_id.eq(workflow.id))
        .order(approval_steps::step_order.asc())
        .load(conn)?;
    Ok((workflow, steps))
}

struct ActionOutcome {
    workflow: ApprovalWorkflow,
    document_id: Uuid,
    next_approvers: Vec<Uuid>,
}

/// Minimal view of a step for the completion evaluation.
#[derive(Debug, Clone)]
pub struct StepView {
    pub step_order: i32,
    pub approver_id: Uuid,
    pub status: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Evaluation {
    Complete,
    Awaiting { approvers: Vec<Uuid> },
}

fn step_views(steps: &[ApprovalStep]) -> Vec<StepView> {
    steps
        .iter()
        .map(|step| StepView {
            step_order: step.step_order,
            approver_id: step.approver_id,
            status: step.status.clone(),
        })
        .collect()
}

/// Completion rule over the full step set. Sequential workflows complete when
/// every step is approved in order; parallel workflows complete when every
/// step is approved in any order. Anything short of complete names the
/// approvers to nudge next.
pub fn evaluate(workflow_type: &str, steps: &[StepView]) -> Evaluation {
    if steps.iter().all(|step| step.status == STEP_APPROVED) {
        return Evaluation::Complete;
    }
    Evaluation::Awaiting {
        approvers: eligible_approvers(workflow_type, steps),
    }
}

/// Approvers whose steps can be acted on right now. Sequential: the first
/// pending step by order. Parallel: every pending step.
pub fn eligible_approvers(workflow_type: &str, steps: &[StepView]) -> Vec<Uuid> {
    let mut pending: Vec<&StepView> = steps
        .iter()
        .filter(|step| step.status == STEP_PENDING)
        .collect();
    pending.sort_by_key(|step| step.step_order);

    if workflow_type == TYPE_SEQUENTIAL {
        return pending
            .first()
            .map(|step| vec![step.approver_id])
            .unwrap_or_default();
    }
    pending.into_iter().map(|step| step.approver_id).collect()
}
