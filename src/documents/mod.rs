use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::shared::error::ApiError;
use crate::shared::schema::{documents, review_documents, reviews};
use crate::shared::state::AppState;
use crate::versioning;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    pub description: String,
    pub document_version: i32,
    pub review_version: i32,
    pub risk_version: i32,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(title: String, summary: String, description: String, created_by: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title,
            summary,
            description,
            document_version: 1,
            review_version: 0,
            risk_version: 0,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateDocumentRequest {
    pub title: String,
    pub summary: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDocumentRequest {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DocumentVersions {
    pub document_id: Uuid,
    pub document_version: i32,
    pub review_version: i32,
    pub risk_version: i32,
}

pub async fn create_document(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<CreateDocumentRequest>,
) -> Result<Json<Document>, ApiError> {
    user.require_edit()?;
    if req.title.trim().is_empty() {
        return Err(ApiError::Validation("Title is required".into()));
    }
    let mut conn = state.conn.get()?;

    let document = Document::new(
        req.title.trim().to_string(),
        req.summary.unwrap_or_default(),
        req.description.unwrap_or_default(),
        &user.email,
    );

    diesel::insert_into(documents::table)
        .values(&document)
        .execute(&mut conn)?;

    Ok(Json(document))
}

pub async fn list_documents(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Document>>, ApiError> {
    user.require_view()?;
    let mut conn = state.conn.get()?;

    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);

    let mut q = documents::table.into_boxed();
    if let Some(search) = query.search {
        let pattern = format!("%{search}%");
        q = q.filter(
            documents::title
                .ilike(pattern.clone())
                .or(documents::summary.ilike(pattern)),
        );
    }

    let docs: Vec<Document> = q
        .order(documents::updated_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;

    Ok(Json(docs))
}

pub async fn get_document(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Document>, ApiError> {
    user.require_view()?;
    let mut conn = state.conn.get()?;

    let document: Document = documents::table
        .filter(documents::id.eq(id))
        .first(&mut conn)
        .map_err(|_| ApiError::NotFound("Document not found".into()))?;

    Ok(Json(document))
}

/// Metadata-only edit: bumps the general version counter, nothing else.
pub async fn update_document(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateDocumentRequest>,
) -> Result<Json<Document>, ApiError> {
    user.require_edit()?;
    let mut conn = state.conn.get()?;

    conn.transaction::<_, ApiError, _>(|conn| {
        let now = Utc::now();
        if let Some(title) = req.title {
            if title.trim().is_empty() {
                return Err(ApiError::Validation("Title is required".into()));
            }
            diesel::update(documents::table.filter(documents::id.eq(id)))
                .set((documents::title.eq(title.trim()), documents::updated_at.eq(now)))
                .execute(conn)?;
        }
        if let Some(summary) = req.summary {
            diesel::update(documents::table.filter(documents::id.eq(id)))
                .set((documents::summary.eq(summary), documents::updated_at.eq(now)))
                .execute(conn)?;
        }
        if let Some(description) = req.description {
            diesel::update(documents::table.filter(documents::id.eq(id)))
                .set((
                    documents::description.eq(description),
                    documents::updated_at.eq(now),
                ))
                .execute(conn)?;
        }

        versioning::increment_document_version(conn, id)
            .map_err(|_| ApiError::NotFound("Document not found".into()))?;
        Ok(())
    })?;

    let document: Document = documents::table
        .filter(documents::id.eq(id))
        .first(&mut conn)
        .map_err(|_| ApiError::NotFound("Document not found".into()))?;

    Ok(Json(document))
}

pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    user.require_delete()?;
    let mut conn = state.conn.get()?;

    let file_paths: Vec<String> = review_documents::table
        .inner_join(reviews::table)
        .filter(reviews::document_id.eq(id))
        .select(review_documents::file_path)
        .load(&mut conn)?;

    let deleted =
        diesel::delete(documents::table.filter(documents::id.eq(id))).execute(&mut conn)?;
    if deleted == 0 {
        return Err(ApiError::NotFound("Document not found".into()));
    }

    // Dependent rows are gone via cascade; stored files go best-effort.
    for path in file_paths {
        let _ = std::fs::remove_file(&path);
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_document_versions(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentVersions>, ApiError> {
    user.require_view()?;
    let mut conn = state.conn.get()?;

    let (document_version, review_version, risk_version) = documents::table
        .filter(documents::id.eq(id))
        .select((
            documents::document_version,
            documents::review_version,
            documents::risk_version,
        ))
        .first::<(i32, i32, i32)>(&mut conn)
        .map_err(|_| ApiError::NotFound("Document not found".into()))?;

    Ok(Json(DocumentVersions {
        document_id: id,
        document_version,
        review_version,
        risk_version,
    }))
}

pub fn configure_documents_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/documents", get(list_documents).post(create_document))
        .route(
            "/api/documents/:id",
            get(get_document).put(update_document).delete(delete_document),
        )
        .route("/api/documents/:id/versions", get(get_document_versions))
}
