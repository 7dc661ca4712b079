use chrono::{NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::audit::{self, AuditSink};
use crate::error::{AppError, AppResult};
use crate::models::{AckAssignment, AckCampaign, NewAckAssignment, NewAckCampaign};
use crate::notify::{self, NotificationSink, KIND_ACK_REQUESTED};
use crate::permissions::RequestActor;
use crate::schema::{ack_assignments, ack_campaigns, documents, users};

use super::documents::{get_document, STATUS_APPROVED};

pub const CAMPAIGN_ACTIVE: &str = "active";
pub const CAMPAIGN_COMPLETED: &str = "completed";

pub const ASSIGNMENT_PENDING: &str = "pending";
pub const ASSIGNMENT_ACKNOWLEDGED: &str = "acknowledged";

pub const AUDIENCE_ALL: &str = "all";
pub const AUDIENCE_CUSTOM: &str = "custom";
pub const AUDIENCE_ROLE: &str = "role";
pub const AUDIENCE_DEPARTMENT: &str = "department";

/// Who a campaign targets. Role and department audiences are declared in the
/// data model but resolution for them is not implemented yet; they fail
/// loudly instead of silently treating the ids as user ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    All,
    Custom(Vec<Uuid>),
    Role(Uuid),
    Department(Uuid),
}

impl Audience {
    pub fn parse(audience_type: &str, ids: &[Uuid]) -> AppResult<Self> {
        match audience_type {
            AUDIENCE_ALL => Ok(Audience::All),
            AUDIENCE_CUSTOM => {
                if ids.is_empty() {
                    return Err(AppError::validation(
                        "custom audience requires at least one user id",
                    ));
                }
                let mut deduped = Vec::new();
                for id in ids {
                    if !deduped.contains(id) {
                        deduped.push(*id);
                    }
                }
                Ok(Audience::Custom(deduped))
            }
            AUDIENCE_ROLE => match ids {
                [id] => Ok(Audience::Role(*id)),
                [] => Err(AppError::validation("role audience requires a role id")),
                _ => Err(AppError::validation("role audience takes exactly one id")),
            },
            AUDIENCE_DEPARTMENT => match ids {
                [id] => Ok(Audience::Department(*id)),
                [] => Err(AppError::validation("department audience requires an id")),
                _ => Err(AppError::validation(
                    "department audience takes exactly one id",
                )),
            },
            other => Err(AppError::validation(format!(
                "unknown audience type '{other}'"
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Audience::All => AUDIENCE_ALL,
            Audience::Custom(_) => AUDIENCE_CUSTOM,
            Audience::Role(_) => AUDIENCE_ROLE,
            Audience::Department(_) => AUDIENCE_DEPARTMENT,
        }
    }

    pub fn ids(&self) -> Vec<Uuid> {
        match self {
            Audience::All => Vec::new(),
            Audience::Custom(ids) => ids.clone(),
            Audience::Role(id) | Audience::Department(id) => vec![*id],
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCampaignInput {
    pub title: String,
    pub description: Option<String>,
    pub audience_type: String,
    #[serde(default)]
    pub audience_ids: Vec<Uuid>,
    pub deadline: Option<NaiveDateTime>,
    pub quiz_id: Option<Uuid>,
}

pub fn create_campaign(
    conn: &mut PgConnection,
    sink: &dyn AuditSink,
    notifier: &dyn NotificationSink,
    actor: &RequestActor,
    document_id: Uuid,
    input: CreateCampaignInput,
) -> AppResult<(AckCampaign, Vec<AckAssignment>)> {
    if input.title.trim().is_empty() {
        return Err(AppError::validation("campaign title must not be empty"));
    }
    let audience = Audience::parse(&input.audience_type, &input.audience_ids)?;

    let (campaign, assignments) = conn
        .transaction::<(AckCampaign, Vec<AckAssignment>), AppError, _>(|conn| {
            let document = get_document(conn, actor.tenant_id, document_id)?;
            if document.status != STATUS_APPROVED {
                return Err(AppError::invalid_state(
                    "acknowledgment campaigns require an approved document",
                ));
            }

            let recipients = resolve_audience(conn, actor.tenant_id, &audience)?;
            if recipients.is_empty() {
                return Err(AppError::validation(
                    "audience resolved to zero recipients",
                ));
            }

            let new_campaign = NewAckCampaign {
                id: Uuid::new_v4(),
                document_id: document.id,
                title: input.title.trim().to_string(),
                description: input.description.clone(),
                audience_type: audience.type_name().to_string(),
                audience_ids: json!(audience.ids()),
                deadline: input.deadline,
                quiz_id: input.quiz_id,
                status: CAMPAIGN_ACTIVE.to_string(),
                created_by: actor.user_id,
            };
            diesel::insert_into(ack_campaigns::table)
                .values(&new_campaign)
                .execute(conn)?;

            let new_assignments: Vec<NewAckAssignment> = recipients
                .iter()
                .map(|user_id| NewAckAssignment {
                    id: Uuid::new_v4(),
                    campaign_id: new_campaign.id,
                    user_id: *user_id,
                    status: ASSIGNMENT_PENDING.to_string(),
                })
                .collect();
            diesel::insert_into(ack_assignments::table)
                .values(&new_assignments)
                .execute(conn)?;

            let campaign = ack_campaigns::table.find(new_campaign.id).first(conn)?;
            let assignments = ack_assignments::table
                .filter(ack_assignments::campaign_id.eq(new_campaign.id))
                .load(conn)?;
            Ok((campaign, assignments))
        })?;

    audit::record(
        sink,
        actor.tenant_id,
        actor.user_id,
        "document.ack_campaign.created",
        "ack_campaign",
        Some(campaign.id),
        json!({
            "document_id": document_id,
            "audience_type": campaign.audience_type,
            "assignments": assignments.len(),
        }),
    );

    // One best-effort notification per assignee; a failed delivery never
    // aborts the rest of the fan-out.
    for assignment in &assignments {
        notify::deliver(
            notifier,
            actor.tenant_id,
            assignment.user_id,
            Some(document_id),
            KIND_ACK_REQUESTED,
            "A document requires your acknowledgment",
        );
    }

    Ok((campaign, assignments))
}

fn resolve_audience(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    audience: &Audience,
) -> AppResult<Vec<Uuid>> {
    match audience {
        Audience::All => {
            let ids = users::table
                .filter(users::tenant_id.eq(tenant_id))
                .filter(users::is_active.eq(true))
                .select(users::id)
                .load(conn)?;
            Ok(ids)
        }
        Audience::Custom(ids) => Ok(ids.clone()),
        Audience::Role(_) => Err(AppError::validation(
            "role audience resolution is not implemented",
        )),
        Audience::Department(_) => Err(AppError::validation(
            "department audience resolution is not implemented",
        )),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AcknowledgeInput {
    pub quiz_score: Option<i32>,
    pub quiz_passed: Option<bool>,
}

pub fn acknowledge(
    conn: &mut PgConnection,
    sink: &dyn AuditSink,
    actor: &RequestActor,
    assignment_id: Uuid,
    input: AcknowledgeInput,
) -> AppResult<AckAssignment> {
    let (assignment, campaign_id) = conn
        .transaction::<(AckAssignment, Uuid), AppError, _>(|conn| {
            let assignment: AckAssignment = ack_assignments::table
                .find(assignment_id)
                .for_update()
                .first(conn)
                .optional()?
                .ok_or_else(|| AppError::not_found("assignment not found"))?;

            if assignment.user_id != actor.user_id {
                return Err(AppError::unauthorized(
                    "assignment belongs to another user",
                ));
            }
            if assignment.status != ASSIGNMENT_PENDING {
                return Err(AppError::invalid_state("assignment already acknowledged"));
            }

            let now = Utc::now().naive_utc();
            diesel::update(ack_assignments::table.find(assignment.id))
                .set((
                    ack_assignments::status.eq(ASSIGNMENT_ACKNOWLEDGED),
                    ack_assignments::quiz_score.eq(input.quiz_score),
                    ack_assignments::quiz_passed.eq(input.quiz_passed),
                    ack_assignments::completed_at.eq(Some(now)),
                ))
                .execute(conn)?;

            let remaining = ack_assignments::table
                .filter(ack_assignments::campaign_id.eq(assignment.campaign_id))
                .filter(ack_assignments::status.eq(ASSIGNMENT_PENDING))
                .count()
                .get_result::<i64>(conn)?;
            if remaining == 0 {
                diesel::update(ack_campaigns::table.find(assignment.campaign_id))
                    .set(ack_campaigns::status.eq(CAMPAIGN_COMPLETED))
                    .execute(conn)?;
            }

            let refreshed = ack_assignments::table.find(assignment.id).first(conn)?;
            Ok((refreshed, assignment.campaign_id))
        })?;

    audit::record(
        sink,
        actor.tenant_id,
        actor.user_id,
        "document.acknowledged",
        "ack_assignment",
        Some(assignment.id),
        json!({ "campaign_id": campaign_id, "quiz_passed": assignment.quiz_passed }),
    );

    Ok(assignment)
}

pub fn list_campaigns(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    document_id: Uuid,
) -> AppResult<Vec<AckCampaign>> {
    let document = get_document(conn, tenant_id, document_id)?;
    let rows = ack_campaigns::table
        .filter(ack_campaigns::document_id.eq(document.id))
        .order(ack_campaigns::created_at.desc())
        .load(conn)?;
    Ok(rows)
}

pub fn pending_assignments_for_user(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    user_id: Uuid,
) -> AppResult<Vec<AckAssignment>> {
    let rows = ack_assignments::table
        .inner_join(ack_campaigns::table.inner_join(documents::table))
        .filter(documents::tenant_id.eq(tenant_id))
        .filter(ack_assignments::user_id.eq(user_id))
        .filter(ack_assignments::status.eq(ASSIGNMENT_PENDING))
        .order(ack_assignments::created_at.asc())
        .select(ack_assignments::all_columns)
        .load(conn)?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_audience_types() {
        let id = Uuid::new_v4();
        assert_eq!(Audience::parse("all", &[]).unwrap(), Audience::All);
        assert_eq!(
            Audience::parse("custom", &[id]).unwrap(),
            Audience::Custom(vec![id])
        );
        assert_eq!(Audience::parse("role", &[id]).unwrap(), Audience::Role(id));
    }

    #[test]
    fn custom_audience_dedupes_and_keeps_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let audience = Audience::parse("custom", &[a, b, a]).unwrap();
        assert_eq!(audience, Audience::Custom(vec![a, b]));
    }

    #[test]
    fn role_and_department_audiences_take_exactly_one_id() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        for kind in ["role", "department"] {
            assert!(Audience::parse(kind, &[]).is_err());
            assert!(Audience::parse(kind, &[a]).is_ok());
            let err = Audience::parse(kind, &[a, b]).unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
    }

    #[test]
    fn empty_custom_audience_is_rejected() {
        let err = Audience::parse("custom", &[]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn unknown_audience_type_is_rejected() {
        let err = Audience::parse("everyone", &[]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
