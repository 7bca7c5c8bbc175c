use serde::{Deserialize, Serialize};
use sqlx::types::Json as SqlxJson;
use uuid::Uuid;

/// Legal proposal states. Transition legality lives in
/// [`crate::services::proposal_service`], not here — this type only
/// carries the value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Approved,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Processing => "processing",
            ProposalStatus::Completed => "completed",
            ProposalStatus::Failed => "failed",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
        }
    }

    /// Terminal states no longer accept approve/reject or background writes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalStatus::Approved | ProposalStatus::Rejected)
    }
}

impl std::str::FromStr for ProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProposalStatus::Pending),
            "processing" => Ok(ProposalStatus::Processing),
            "completed" => Ok(ProposalStatus::Completed),
            "failed" => Ok(ProposalStatus::Failed),
            "approved" => Ok(ProposalStatus::Approved),
            "rejected" => Ok(ProposalStatus::Rejected),
            other => Err(format!("unknown proposal status: {other}")),
        }
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single engine-generated file as carried in `generated_files`.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct GeneratedFile {
    pub content: Vec<String>,
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub modified_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl GeneratedFile {
    /// Joins the ordered line sequence into a single text blob.
    pub fn to_text(&self) -> String {
        self.content.join("\n")
    }
}

pub type GeneratedFiles = std::collections::HashMap<String, GeneratedFile>;

/// Raw database row. `status` is stored as text and parsed on read, keeping
/// the `FromRow` mapping close to the column types actually sent over the
/// wire.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ProposalRow {
    pub id: Uuid,
    pub draft_id: Uuid,
    pub created_by_user_id: Uuid,
    pub thread_id: Option<String>,
    pub user_prompt: String,
    pub context_file_path: Option<String>,
    pub context_selection: Option<SqlxJson<serde_json::Value>>,
    pub generated_files: SqlxJson<GeneratedFiles>,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub resolved_by_user_id: Option<Uuid>,
    pub resolved_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ai_generated_content: SqlxJson<serde_json::Value>,
}

/// Grants read/write reach over a proposal beyond its creator, e.g. other
/// collaborators on the owning draft's workflow.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProposalAccess {
    pub proposal_id: Uuid,
    pub user_id: Uuid,
    pub access_type: String,
    pub granted_at: chrono::DateTime<chrono::Utc>,
}

/// Read-only projection returned by `GET /proposals/{id}`.
#[derive(Debug, Serialize)]
pub struct ProposalView {
    pub id: Uuid,
    pub draft_id: Uuid,
    pub created_by_user_id: Uuid,
    pub thread_id: Option<String>,
    pub user_prompt: String,
    pub context_file_path: Option<String>,
    pub context_selection: Option<serde_json::Value>,
    pub generated_files: GeneratedFiles,
    pub status: String,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub resolved_by_user_id: Option<Uuid>,
    pub resolved_at: Option<String>,
}

impl From<ProposalRow> for ProposalView {
    fn from(row: ProposalRow) -> Self {
        ProposalView {
            id: row.id,
            draft_id: row.draft_id,
            created_by_user_id: row.created_by_user_id,
            thread_id: row.thread_id,
            user_prompt: row.user_prompt,
            context_file_path: row.context_file_path,
            context_selection: row.context_selection.map(|j| j.0),
            generated_files: row.generated_files.0,
            status: row.status,
            created_at: row.created_at.to_rfc3339(),
            completed_at: row.completed_at.map(|t| t.to_rfc3339()),
            resolved_by_user_id: row.resolved_by_user_id,
            resolved_at: row.resolved_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Deserialize, garde::Validate)]
pub struct CreateRefinementRequest {
    #[garde(length(min = 1))]
    pub user_prompt: String,
    #[garde(skip)]
    pub context_file_path: Option<String>,
    #[garde(skip)]
    pub context_selection: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct CreateRefinementResponse {
    pub proposal_id: Uuid,
    pub thread_id: String,
    pub status: &'static str,
    pub websocket_url: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ApproveResponse {
    pub proposal_id: Uuid,
    pub approved_at: String,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RejectResponse {
    pub proposal_id: Uuid,
    pub message: &'static str,
}
