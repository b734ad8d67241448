pub mod validation;

use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::reviews::get_review_for_user;
use crate::shared::error::ApiError;
use crate::shared::schema::review_documents;
use crate::shared::state::AppState;
use crate::viewers::can_user_view;
use validation::{file_extension, validate_upload};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = review_documents)]
pub struct ReviewAttachment {
    pub id: Uuid,
    pub review_id: Uuid,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
}

pub async fn list_attachments(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(review_id): Path<Uuid>,
) -> Result<Json<Vec<ReviewAttachment>>, ApiError> {
    user.require_view()?;
    let mut conn = state.conn.get()?;

    get_review_for_user(&mut conn, review_id, &user.email)?;

    let attachments: Vec<ReviewAttachment> = review_documents::table
        .filter(review_documents::review_id.eq(review_id))
        .order(review_documents::uploaded_at.desc())
        .load(&mut conn)?;

    Ok(Json(attachments))
}

pub async fn upload_attachments(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(review_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<Vec<ReviewAttachment>>, ApiError> {
    user.require_edit()?;
    let mut conn = state.conn.get()?;

    get_review_for_user(&mut conn, review_id, &user.email)?;

    let review_dir = state.config.uploads.root.join(review_id.to_string());
    tokio::fs::create_dir_all(&review_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to create upload directory: {e}")))?;

    let mut stored = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Malformed multipart payload: {e}")))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        if file_name.is_empty() {
            continue;
        }
        let content = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("Failed to read upload: {e}")))?;

        validate_upload(&file_name, &content, state.config.uploads.max_size)?;

        let extension = file_extension(&file_name).unwrap_or_default();
        let stored_path = review_dir.join(format!("{}.{extension}", Uuid::new_v4()));
        tokio::fs::write(&stored_path, &content)
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to store upload: {e}")))?;

        let attachment = ReviewAttachment {
            id: Uuid::new_v4(),
            review_id,
            file_name,
            file_path: stored_path.to_string_lossy().into_owned(),
            file_size: content.len() as i64,
            uploaded_by: user.email.clone(),
            uploaded_at: Utc::now(),
        };
        diesel::insert_into(review_documents::table)
            .values(&attachment)
            .execute(&mut conn)?;
        stored.push(attachment);
    }

    if stored.is_empty() {
        return Err(ApiError::Validation("No files in upload".into()));
    }

    Ok(Json(stored))
}

pub async fn download_attachment(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    user.require_view()?;
    let mut conn = state.conn.get()?;

    let attachment: ReviewAttachment = review_documents::table
        .filter(review_documents::id.eq(id))
        .first(&mut conn)
        .map_err(|_| ApiError::NotFound("Attachment not found".into()))?;

    if !user.is_service && !can_user_view(&mut conn, attachment.review_id, &user.email)? {
        return Err(ApiError::Forbidden(
            "No viewer grant for this review".into(),
        ));
    }

    let bytes = tokio::fs::read(&attachment.file_path)
        .await
        .map_err(|_| ApiError::NotFound("Stored file is missing".into()))?;

    let content_type = mime_guess::from_path(&attachment.file_name)
        .first_or_octet_stream()
        .to_string();

    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", attachment.file_name),
        )
        .body(Body::from(bytes))
        .map_err(|e| ApiError::Internal(format!("Failed to build response: {e}")))
}

pub async fn delete_attachment(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    user.require_delete()?;
    let mut conn = state.conn.get()?;

    let attachment: ReviewAttachment = review_documents::table
        .filter(review_documents::id.eq(id))
        .first(&mut conn)
        .map_err(|_| ApiError::NotFound("Attachment not found".into()))?;

    get_review_for_user(&mut conn, attachment.review_id, &user.email)?;

    diesel::delete(review_documents::table.filter(review_documents::id.eq(id)))
        .execute(&mut conn)?;

    if let Err(e) = std::fs::remove_file(&attachment.file_path) {
        warn!("Could not remove stored file {}: {e}", attachment.file_path);
    }

    Ok(StatusCode::NO_CONTENT)
}

pub fn configure_attachments_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/reviews/:id/attachments",
            get(list_attachments).post(upload_attachments),
        )
        .route("/api/attachments/:id/download", get(download_attachment))
        .route(
            "/api/attachments/:id",
            axum::routing::delete(delete_attachment),
        )
}
