use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity supplied by the calling layer on every operation.
///
/// Authentication happens upstream; the engine trusts the tenant scoping it
/// receives here and never widens it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub tenant_id: Uuid,
    pub actor_id: Uuid,
}

impl RequestContext {
    pub fn new(tenant_id: Uuid, actor_id: Uuid) -> Self {
        Self { tenant_id, actor_id }
    }
}
