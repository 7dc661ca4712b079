use diesel::prelude::*;
use tracing::warn;
use uuid::Uuid;

use crate::db::PgPool;
use crate::models::NewNotification;
use crate::schema::notifications;

pub const KIND_APPROVAL_REQUESTED: &str = "approval.requested";
pub const KIND_ACK_REQUESTED: &str = "ack.requested";

/// Fire-and-forget delivery to a user. Implementations must not be relied on
/// for anything stronger than best-effort.
pub trait NotificationSink: Send + Sync + 'static {
    fn notify(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        document_id: Option<Uuid>,
        kind: &str,
        body: &str,
    ) -> anyhow::Result<()>;
}

/// Delivers the notification, swallowing and warning on failure.
pub fn deliver(
    sink: &dyn NotificationSink,
    tenant_id: Uuid,
    user_id: Uuid,
    document_id: Option<Uuid>,
    kind: &str,
    body: &str,
) {
    if let Err(err) = sink.notify(tenant_id, user_id, document_id, kind, body) {
        warn!(error = %err, %user_id, kind, "failed to deliver notification");
    }
}

pub struct DbNotificationSink {
    pool: PgPool,
}

impl DbNotificationSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl NotificationSink for DbNotificationSink {
    fn notify(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        document_id: Option<Uuid>,
        kind: &str,
        body: &str,
    ) -> anyhow::Result<()> {
        let mut conn = self.pool.get()?;
        let row = NewNotification {
            id: Uuid::new_v4(),
            tenant_id,
            user_id,
            document_id,
            kind: kind.to_string(),
            body: body.to_string(),
        };
        diesel::insert_into(notifications::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(())
    }
}
