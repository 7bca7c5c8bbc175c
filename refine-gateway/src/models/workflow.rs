use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Owned by exactly one user; out of the core beyond the ownership relation
/// used by the authorization checks in [`crate::auth`].
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_by_user_id: Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
