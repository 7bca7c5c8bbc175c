use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mutable working copy owned by a user, bound to a workflow.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Draft {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub created_by_user_id: Uuid,
    pub name: String,
    pub status: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// A single file in a draft's specification file collection, keyed by
/// `(draft_id, file_path)`.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct DraftFile {
    pub draft_id: Uuid,
    pub file_path: String,
    pub content: String,
    pub file_type: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}
