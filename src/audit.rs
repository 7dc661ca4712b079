use diesel::prelude::*;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::db::PgPool;
use crate::models::NewAuditEntry;
use crate::schema::audit_log;

/// Append-only audit trail. Failures are never propagated to the caller;
/// every mutation stays best-effort audited.
pub trait AuditSink: Send + Sync + 'static {
    fn log(
        &self,
        tenant_id: Uuid,
        actor_id: Uuid,
        action: &str,
        entity_type: &str,
        entity_id: Option<Uuid>,
        payload: Value,
    ) -> anyhow::Result<()>;
}

/// Logs the audit event, swallowing and warning on failure.
pub fn record(
    sink: &dyn AuditSink,
    tenant_id: Uuid,
    actor_id: Uuid,
    action: &str,
    entity_type: &str,
    entity_id: Option<Uuid>,
    payload: Value,
) {
    if let Err(err) = sink.log(tenant_id, actor_id, action, entity_type, entity_id, payload) {
        warn!(error = %err, action, "failed to write audit event");
    }
}

pub struct DbAuditSink {
    pool: PgPool,
}

impl DbAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditSink for DbAuditSink {
    fn log(
        &self,
        tenant_id: Uuid,
        actor_id: Uuid,
        action: &str,
        entity_type: &str,
        entity_id: Option<Uuid>,
        payload: Value,
    ) -> anyhow::Result<()> {
        let mut conn = self.pool.get()?;
        let entry = NewAuditEntry {
            id: Uuid::new_v4(),
            tenant_id,
            actor_id,
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id,
            payload,
        };
        diesel::insert_into(audit_log::table)
            .values(&entry)
            .execute(&mut conn)?;
        Ok(())
    }
}
