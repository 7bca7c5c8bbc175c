use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::GeneratedFiles;

/// Applies a proposal's generated file set to a draft's file collection,
/// inside the caller's open transaction so the write is all-or-nothing with
/// whatever else that transaction does (the approve operation).
///
/// Files present on the draft but absent from `generated_files` are left
/// untouched — the engine's output only adds or overwrites, never deletes.
pub async fn apply_generated_files(
    tx: &mut Transaction<'_, Postgres>,
    draft_id: Uuid,
    generated_files: &GeneratedFiles,
) -> Result<(), AppError> {
    for (path, file) in generated_files {
        let content = file.to_text();
        let file_type = infer_file_type(path);

        sqlx::query(
            "INSERT INTO draft_specification_files (draft_id, file_path, content, file_type, updated_at) \
             VALUES ($1, $2, $3, $4, now()) \
             ON CONFLICT (draft_id, file_path) \
             DO UPDATE SET content = excluded.content, file_type = excluded.file_type, updated_at = now()",
        )
        .bind(draft_id)
        .bind(path)
        .bind(&content)
        .bind(file_type)
        .execute(&mut **tx)
        .await?;
    }

    sqlx::query("UPDATE drafts SET updated_at = now() WHERE id = $1")
        .bind(draft_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

fn infer_file_type(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("md") | Some("markdown") => "markdown",
        Some("json") => "json",
        Some("yaml") | Some("yml") => "yaml",
        _ => "text",
    }
}
