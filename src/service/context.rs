use super::error::ServiceError;
use serde::{Deserialize, Serialize};

/// Identity of whoever performs an operation. `tenant_id` here is the
/// actor's own tenant, which may differ from the tenant being operated on
/// (an auditor from tenant A reviewing tenant B keeps their A attribution).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rol: Option<String>,
    #[serde(rename = "tenantId", skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl ActorContext {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            rol: None,
            tenant_id: None,
        }
    }
}

/// Per-call request context: which tenant's data is addressed and who is
/// asking. Validation happens in the consuming service call, not here.
#[derive(Debug, Clone, Default)]
pub struct ServiceContext {
    pub tenant_id: Option<String>,
    pub actor: Option<ActorContext>,
}

impl ServiceContext {
    pub fn new(tenant_id: Option<String>, actor: Option<ActorContext>) -> Self {
        Self { tenant_id, actor }
    }

    /// Context scoped to a tenant with no acting user (system jobs).
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            actor: None,
        }
    }

    pub(crate) fn actor_uid(&self) -> Option<&str> {
        self.actor.as_ref().map(|a| a.uid.as_str())
    }
}

/// The authenticated-user shape the session layer hands us.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub uid: String,
    pub email: Option<String>,
}

/// Builds a [`ServiceContext`] from an optional authenticated user and an
/// optional tenant id. Pure; performs no validation.
pub fn build_service_context(
    user: Option<&AuthenticatedUser>,
    tenant_id: Option<String>,
) -> ServiceContext {
    ServiceContext {
        tenant_id,
        actor: user.map(|u| ActorContext {
            uid: u.uid.clone(),
            email: u.email.clone(),
            rol: None,
            tenant_id: None,
        }),
    }
}

/// Strategy resolving the collection path an operation addresses, given the
/// call context. Implementations enforce tenant isolation at the path level:
/// a caller cannot reach another tenant's data without that tenant's id in
/// the context.
pub trait CollectionPathResolver: Send + Sync {
    fn resolve(&self, ctx: &ServiceContext) -> Result<String, ServiceError>;
}

/// Resolves to `tenants/{tenantId}/{entity}`; fails with `invalid-argument`
/// when the context carries no tenant.
pub struct TenantCollection {
    entity: String,
}

impl TenantCollection {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
        }
    }
}

impl CollectionPathResolver for TenantCollection {
    fn resolve(&self, ctx: &ServiceContext) -> Result<String, ServiceError> {
        let tenant = ctx.tenant_id.as_deref().ok_or_else(|| {
            ServiceError::invalid_argument("tenantId is required for this operation")
        })?;
        Ok(format!("tenants/{}/{}", tenant, self.entity))
    }
}

/// Resolves to a fixed root-level collection, for the few collections that
/// are not tenant-scoped (`requires_tenant = false` services).
pub struct RootCollection {
    name: String,
}

impl RootCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl CollectionPathResolver for RootCollection {
    fn resolve(&self, _ctx: &ServiceContext) -> Result<String, ServiceError> {
        Ok(self.name.clone())
    }
}
