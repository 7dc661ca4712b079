use std::collections::HashSet;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

pub const PERM_DOCUMENTS_MANAGE: &str = "documents.manage";
pub const PERM_WORKFLOWS_MANAGE: &str = "workflows.manage";
pub const PERM_CAMPAIGNS_MANAGE: &str = "campaigns.manage";

/// Identity established by the upstream gateway. Authentication itself is
/// out of scope; the gateway forwards the verified ids as headers.
#[derive(Debug, Clone, Copy)]
pub struct RequestActor {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
}

#[async_trait]
impl FromRequestParts<AppState> for RequestActor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user_id = header_uuid(parts, "x-user-id")?;
        let tenant_id = header_uuid(parts, "x-tenant-id")?;
        Ok(RequestActor { user_id, tenant_id })
    }
}

fn header_uuid(parts: &Parts, name: &str) -> Result<Uuid, AppError> {
    let raw = parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::unauthorized(format!("missing {name} header")))?;
    Uuid::parse_str(raw).map_err(|_| AppError::unauthorized(format!("invalid {name} header")))
}

/// Capability injected into the services at construction. No global
/// singleton; callers decide the policy when wiring the state.
pub trait PermissionChecker: Send + Sync + 'static {
    fn allows(&self, actor: &RequestActor, permission: &str) -> bool;
}

pub fn require(
    checker: &dyn PermissionChecker,
    actor: &RequestActor,
    permission: &str,
) -> Result<(), AppError> {
    if checker.allows(actor, permission) {
        return Ok(());
    }
    Err(AppError::unauthorized(format!(
        "permission {permission} denied"
    )))
}

/// Policy defined at wiring time: everything is allowed except an explicit
/// deny list.
#[derive(Default)]
pub struct StaticPermissionChecker {
    denied: HashSet<String>,
}

impl StaticPermissionChecker {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn with_denied(permissions: impl IntoIterator<Item = String>) -> Self {
        Self {
            denied: permissions.into_iter().collect(),
        }
    }
}

impl PermissionChecker for StaticPermissionChecker {
    fn allows(&self, _actor: &RequestActor, permission: &str) -> bool {
        !self.denied.contains(permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> RequestActor {
        RequestActor {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn allow_all_permits_everything() {
        let checker = StaticPermissionChecker::allow_all();
        assert!(checker.allows(&actor(), PERM_DOCUMENTS_MANAGE));
    }

    #[test]
    fn deny_list_blocks_named_permission() {
        let checker =
            StaticPermissionChecker::with_denied(vec![PERM_CAMPAIGNS_MANAGE.to_string()]);
        let actor = actor();
        assert!(!checker.allows(&actor, PERM_CAMPAIGNS_MANAGE));
        assert!(checker.allows(&actor, PERM_DOCUMENTS_MANAGE));
        assert!(require(&checker, &actor, PERM_CAMPAIGNS_MANAGE).is_err());
    }
}
