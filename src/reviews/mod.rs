use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::dsl::{exists, not};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::approvals::ReviewApproval;
use crate::attachments::ReviewAttachment;
use crate::auth::CurrentUser;
use crate::categories::RiskCategory;
use crate::documents::Document;
use crate::shared::error::ApiError;
use crate::shared::schema::{
    documents, review_approvals, review_documents, review_observations, review_risks,
    review_viewers, reviews, risk_categories,
};
use crate::shared::state::AppState;
use crate::versioning;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = reviews)]
pub struct Review {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version: i32,
    pub reviewer_email: String,
    pub reviewer_name: String,
    pub review_date: DateTime<Utc>,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = review_risks)]
pub struct ReviewRisk {
    pub id: Uuid,
    pub review_id: Uuid,
    pub risk_text: String,
    pub legal_suggestion: String,
    pub final_definition: String,
    pub category_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = review_observations)]
pub struct ReviewObservation {
    pub id: Uuid,
    pub review_id: Uuid,
    pub observations: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskPayload {
    pub risk_text: String,
    #[serde(default)]
    pub legal_suggestion: String,
    #[serde(default)]
    pub final_definition: String,
    pub category_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CreateReviewRequest {
    pub document_id: Option<Uuid>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub comments: Option<String>,
    #[serde(default)]
    pub risks: Vec<RiskPayload>,
    pub observations: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateReviewRequest {
    pub title: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub comments: Option<String>,
    #[serde(default)]
    pub risks: Vec<RiskPayload>,
    pub observations: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCommentsRequest {
    pub comments: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub search: Option<String>,
    /// Comma-separated approver emails.
    pub approvers: Option<String>,
    /// Comma-separated reviewer emails.
    pub reviewers: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReviewSummary {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version: i32,
    pub reviewer_email: String,
    pub reviewer_name: String,
    pub review_date: DateTime<Utc>,
    pub comments: Option<String>,
    pub title: String,
    pub summary: String,
    pub pending_approvals: i64,
    pub approved_count: i64,
}

#[derive(Debug, Serialize)]
pub struct RiskDetail {
    #[serde(flatten)]
    pub risk: ReviewRisk,
    pub category_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReviewDetail {
    #[serde(flatten)]
    pub review: Review,
    pub document: Document,
    pub risks: Vec<RiskDetail>,
    pub observations: Option<String>,
    pub approvals: Vec<ReviewApproval>,
    pub attachments: Vec<ReviewAttachment>,
    pub versions: Vec<Review>,
}

#[derive(Debug, Serialize)]
pub struct ReviewExport {
    pub file_name: String,
    pub content_type: String,
    pub review: ReviewExportBody,
}

#[derive(Debug, Serialize)]
pub struct ReviewExportBody {
    #[serde(flatten)]
    pub review: Review,
    pub document: Document,
    pub risks: Vec<RiskDetail>,
    pub observations: Option<String>,
    pub approvals: Vec<ReviewApproval>,
}

fn split_emails(value: &Option<String>) -> Vec<String> {
    value
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Load a review joined to its document, but only when the user holds a
/// viewer grant for it. Everyone else sees not-found.
pub fn get_review_for_user(
    conn: &mut PgConnection,
    review_id: Uuid,
    user_email: &str,
) -> Result<(Review, Document), ApiError> {
    reviews::table
        .inner_join(documents::table)
        .inner_join(review_viewers::table)
        .filter(reviews::id.eq(review_id))
        .filter(review_viewers::user_email.eq(user_email))
        .filter(review_viewers::can_view.eq(true))
        .select((reviews::all_columns, documents::all_columns))
        .first::<(Review, Document)>(conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Review not found or not visible".into()))
}

fn load_risks(conn: &mut PgConnection, review_id: Uuid) -> Result<Vec<RiskDetail>, ApiError> {
    let rows: Vec<(ReviewRisk, Option<RiskCategory>)> = review_risks::table
        .left_join(risk_categories::table)
        .filter(review_risks::review_id.eq(review_id))
        .order(review_risks::created_at.asc())
        .select((
            review_risks::all_columns,
            risk_categories::all_columns.nullable(),
        ))
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|(risk, category)| RiskDetail {
            risk,
            category_name: category.map(|c| c.name),
        })
        .collect())
}

fn load_observations(
    conn: &mut PgConnection,
    review_id: Uuid,
) -> Result<Option<String>, ApiError> {
    Ok(review_observations::table
        .filter(review_observations::review_id.eq(review_id))
        .select(review_observations::observations)
        .first::<String>(conn)
        .optional()?)
}

fn insert_risks(
    conn: &mut PgConnection,
    review_id: Uuid,
    risks: &[RiskPayload],
) -> Result<(), ApiError> {
    for payload in risks {
        if payload.risk_text.trim().is_empty() {
            continue;
        }
        let risk = ReviewRisk {
            id: Uuid::new_v4(),
            review_id,
            risk_text: payload.risk_text.trim().to_string(),
            legal_suggestion: payload.legal_suggestion.trim().to_string(),
            final_definition: payload.final_definition.trim().to_string(),
            category_id: payload.category_id,
            created_at: Utc::now(),
        };
        diesel::insert_into(review_risks::table)
            .values(&risk)
            .execute(conn)?;
    }
    Ok(())
}

fn insert_observation(
    conn: &mut PgConnection,
    review_id: Uuid,
    observations: &Option<String>,
) -> Result<(), ApiError> {
    if let Some(text) = observations {
        if !text.trim().is_empty() {
            diesel::insert_into(review_observations::table)
                .values(&ReviewObservation {
                    id: Uuid::new_v4(),
                    review_id,
                    observations: text.trim().to_string(),
                })
                .execute(conn)?;
        }
    }
    Ok(())
}

fn grant_viewer(conn: &mut PgConnection, review_id: Uuid, email: &str) -> Result<(), ApiError> {
    diesel::insert_into(review_viewers::table)
        .values((
            review_viewers::review_id.eq(review_id),
            review_viewers::user_email.eq(email),
            review_viewers::can_view.eq(true),
            review_viewers::granted_at.eq(Utc::now()),
        ))
        .on_conflict((review_viewers::review_id, review_viewers::user_email))
        .do_update()
        .set(review_viewers::can_view.eq(true))
        .execute(conn)?;
    Ok(())
}

/// New review versions keep the previous version's audience and files.
fn carry_over_from_previous(
    conn: &mut PgConnection,
    previous_review_id: Uuid,
    new_review_id: Uuid,
) -> Result<(), ApiError> {
    let grants: Vec<String> = review_viewers::table
        .filter(review_viewers::review_id.eq(previous_review_id))
        .filter(review_viewers::can_view.eq(true))
        .select(review_viewers::user_email)
        .load(conn)?;
    for email in grants {
        grant_viewer(conn, new_review_id, &email)?;
    }

    let attachments: Vec<ReviewAttachment> = review_documents::table
        .filter(review_documents::review_id.eq(previous_review_id))
        .load(conn)?;
    for attachment in attachments {
        diesel::insert_into(review_documents::table)
            .values(&ReviewAttachment {
                id: Uuid::new_v4(),
                review_id: new_review_id,
                ..attachment
            })
            .execute(conn)?;
    }
    Ok(())
}

pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ReviewSummary>>, ApiError> {
    user.require_view()?;
    let mut conn = state.conn.get()?;

    let mut q = reviews::table
        .inner_join(documents::table)
        .inner_join(review_viewers::table)
        .filter(review_viewers::user_email.eq(user.email.clone()))
        .filter(review_viewers::can_view.eq(true))
        .select((reviews::all_columns, documents::all_columns))
        .into_boxed();

    if let Some(status) = query.status.as_deref() {
        match status {
            "pending" => {
                q = q.filter(exists(
                    review_approvals::table
                        .filter(review_approvals::review_id.eq(reviews::id))
                        .filter(review_approvals::status.eq("pending")),
                ));
            }
            "approved" => {
                q = q.filter(exists(
                    review_approvals::table
                        .filter(review_approvals::review_id.eq(reviews::id))
                        .filter(review_approvals::status.eq("approved")),
                ));
            }
            "in_review" => {
                q = q.filter(not(exists(
                    review_approvals::table.filter(review_approvals::review_id.eq(reviews::id)),
                )));
            }
            _ => {}
        }
    }

    if let Some(search) = query.search.as_deref() {
        let pattern = format!("%{search}%");
        q = q.filter(
            documents::title
                .ilike(pattern.clone())
                .or(documents::summary.ilike(pattern)),
        );
    }

    let approvers = split_emails(&query.approvers);
    if !approvers.is_empty() {
        q = q.filter(exists(
            review_approvals::table
                .filter(review_approvals::review_id.eq(reviews::id))
                .filter(review_approvals::approver_email.eq_any(approvers)),
        ));
    }

    let reviewers = split_emails(&query.reviewers);
    if !reviewers.is_empty() {
        q = q.filter(reviews::reviewer_email.eq_any(reviewers));
    }

    let rows: Vec<(Review, Document)> = q
        .order((reviews::review_date.desc(), reviews::version.desc()))
        .load(&mut conn)?;

    let ids: Vec<Uuid> = rows.iter().map(|(r, _)| r.id).collect();
    let mut pending: HashMap<Uuid, i64> = HashMap::new();
    let mut approved: HashMap<Uuid, i64> = HashMap::new();
    if !ids.is_empty() {
        let statuses: Vec<(Uuid, String)> = review_approvals::table
            .filter(review_approvals::review_id.eq_any(&ids))
            .select((review_approvals::review_id, review_approvals::status))
            .load(&mut conn)?;
        for (review_id, status) in statuses {
            match status.as_str() {
                "pending" => *pending.entry(review_id).or_default() += 1,
                "approved" => *approved.entry(review_id).or_default() += 1,
                _ => {}
            }
        }
    }

    let summaries = rows
        .into_iter()
        .map(|(review, document)| ReviewSummary {
            pending_approvals: pending.get(&review.id).copied().unwrap_or(0),
            approved_count: approved.get(&review.id).copied().unwrap_or(0),
            id: review.id,
            document_id: review.document_id,
            version: review.version,
            reviewer_email: review.reviewer_email,
            reviewer_name: review.reviewer_name,
            review_date: review.review_date,
            comments: review.comments,
            title: document.title,
            summary: document.summary,
        })
        .collect();

    Ok(Json(summaries))
}

pub async fn create_review(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<CreateReviewRequest>,
) -> Result<Json<Review>, ApiError> {
    user.require_edit()?;
    let mut conn = state.conn.get()?;

    let review = conn.transaction::<Review, ApiError, _>(|conn| {
        let document_id = match req.document_id {
            Some(id) => {
                documents::table
                    .filter(documents::id.eq(id))
                    .select(documents::id)
                    .first::<Uuid>(conn)
                    .optional()?
                    .ok_or_else(|| ApiError::NotFound("Document not found".into()))?
            }
            None => {
                let title = req
                    .title
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| ApiError::Validation("Title is required".into()))?;
                let document = Document::new(
                    title.to_string(),
                    req.summary.clone().unwrap_or_default(),
                    req.description.clone().unwrap_or_default(),
                    &user.email,
                );
                diesel::insert_into(documents::table)
                    .values(&document)
                    .execute(conn)?;
                document.id
            }
        };

        let version = versioning::next_review_version(conn, document_id)?;
        let review = Review {
            id: Uuid::new_v4(),
            document_id,
            version,
            reviewer_email: user.email.clone(),
            reviewer_name: user.name.clone(),
            review_date: Utc::now(),
            comments: req.comments.clone().filter(|c| !c.trim().is_empty()),
            created_at: Utc::now(),
        };
        diesel::insert_into(reviews::table).values(&review).execute(conn)?;

        insert_risks(conn, review.id, &req.risks)?;
        insert_observation(conn, review.id, &req.observations)?;
        grant_viewer(conn, review.id, &user.email)?;

        let with_risks = req.risks.iter().any(|r| !r.risk_text.trim().is_empty());
        versioning::record_review_cycle(conn, document_id, with_risks)?;

        Ok(review)
    })?;

    Ok(Json(review))
}

pub async fn get_review(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ReviewDetail>, ApiError> {
    user.require_view()?;
    let mut conn = state.conn.get()?;

    let (review, document) = get_review_for_user(&mut conn, id, &user.email)?;

    let risks = load_risks(&mut conn, id)?;
    let observations = load_observations(&mut conn, id)?;

    let approvals: Vec<ReviewApproval> = review_approvals::table
        .filter(review_approvals::review_id.eq(id))
        .order((
            review_approvals::approved_at.desc().nulls_last(),
            review_approvals::created_at.desc(),
        ))
        .load(&mut conn)?;

    let attachments: Vec<ReviewAttachment> = review_documents::table
        .filter(review_documents::review_id.eq(id))
        .order(review_documents::uploaded_at.desc())
        .load(&mut conn)?;

    let versions: Vec<Review> = reviews::table
        .inner_join(review_viewers::table)
        .filter(reviews::document_id.eq(review.document_id))
        .filter(review_viewers::user_email.eq(&user.email))
        .filter(review_viewers::can_view.eq(true))
        .select(reviews::all_columns)
        .order(reviews::version.desc())
        .load(&mut conn)?;

    Ok(Json(ReviewDetail {
        review,
        document,
        risks,
        observations,
        approvals,
        attachments,
        versions,
    }))
}

/// Editing a review records a fresh version; prior versions stay as they
/// were apart from comment edits.
pub async fn update_review(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateReviewRequest>,
) -> Result<Json<Review>, ApiError> {
    user.require_edit()?;
    let mut conn = state.conn.get()?;

    let (previous, _) = get_review_for_user(&mut conn, id, &user.email)?;

    let review = conn.transaction::<Review, ApiError, _>(|conn| {
        let title = req.title.trim();
        if title.is_empty() {
            return Err(ApiError::Validation("Title is required".into()));
        }
        diesel::update(documents::table.filter(documents::id.eq(previous.document_id)))
            .set((
                documents::title.eq(title),
                documents::summary.eq(req.summary.clone().unwrap_or_default()),
                documents::description.eq(req.description.clone().unwrap_or_default()),
                documents::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;

        let version = versioning::next_review_version(conn, previous.document_id)?;
        let review = Review {
            id: Uuid::new_v4(),
            document_id: previous.document_id,
            version,
            reviewer_email: user.email.clone(),
            reviewer_name: user.name.clone(),
            review_date: Utc::now(),
            comments: req.comments.clone().filter(|c| !c.trim().is_empty()),
            created_at: Utc::now(),
        };
        diesel::insert_into(reviews::table).values(&review).execute(conn)?;

        insert_risks(conn, review.id, &req.risks)?;
        insert_observation(conn, review.id, &req.observations)?;
        carry_over_from_previous(conn, previous.id, review.id)?;
        grant_viewer(conn, review.id, &user.email)?;

        let with_risks = req.risks.iter().any(|r| !r.risk_text.trim().is_empty());
        versioning::record_review_cycle(conn, previous.document_id, with_risks)?;

        Ok(review)
    })?;

    Ok(Json(review))
}

/// Comment text is the one mutable field on an existing review version.
pub async fn update_comments(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCommentsRequest>,
) -> Result<Json<Review>, ApiError> {
    user.require_edit()?;
    let mut conn = state.conn.get()?;

    get_review_for_user(&mut conn, id, &user.email)?;

    let review: Review = diesel::update(reviews::table.filter(reviews::id.eq(id)))
        .set(reviews::comments.eq(Some(req.comments)))
        .returning(reviews::all_columns)
        .get_result(&mut conn)?;

    Ok(Json(review))
}

pub async fn add_risk(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<RiskPayload>,
) -> Result<Json<ReviewRisk>, ApiError> {
    user.require_edit()?;
    let mut conn = state.conn.get()?;

    let (review, _) = get_review_for_user(&mut conn, id, &user.email)?;
    if req.risk_text.trim().is_empty() {
        return Err(ApiError::Validation("Risk text is required".into()));
    }

    let risk = conn.transaction::<ReviewRisk, ApiError, _>(|conn| {
        let risk = ReviewRisk {
            id: Uuid::new_v4(),
            review_id: review.id,
            risk_text: req.risk_text.trim().to_string(),
            legal_suggestion: req.legal_suggestion.trim().to_string(),
            final_definition: req.final_definition.trim().to_string(),
            category_id: req.category_id,
            created_at: Utc::now(),
        };
        diesel::insert_into(review_risks::table).values(&risk).execute(conn)?;
        versioning::increment_risk_version(conn, review.document_id)?;
        Ok(risk)
    })?;

    Ok(Json(risk))
}

pub async fn delete_review(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    user.require_delete()?;
    let mut conn = state.conn.get()?;

    get_review_for_user(&mut conn, id, &user.email)?;

    let file_paths: Vec<String> = review_documents::table
        .filter(review_documents::review_id.eq(id))
        .select(review_documents::file_path)
        .load(&mut conn)?;

    diesel::delete(reviews::table.filter(reviews::id.eq(id))).execute(&mut conn)?;

    for path in file_paths {
        let _ = std::fs::remove_file(&path);
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn export_review(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> Result<Json<ReviewExport>, ApiError> {
    user.require_view()?;
    let mut conn = state.conn.get()?;

    let format = query.format.unwrap_or_else(|| "pdf".to_string()).to_lowercase();
    let content_type = match format.as_str() {
        "pdf" => "application/pdf",
        "docx" => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        other => {
            return Err(ApiError::Validation(format!(
                "Unknown export format '{other}', use pdf or docx"
            )))
        }
    };

    let (review, document) = get_review_for_user(&mut conn, id, &user.email)?;
    let risks = load_risks(&mut conn, id)?;
    let observations = load_observations(&mut conn, id)?;
    let approvals: Vec<ReviewApproval> = review_approvals::table
        .filter(review_approvals::review_id.eq(id))
        .order((
            review_approvals::approved_at.desc().nulls_last(),
            review_approvals::created_at.desc(),
        ))
        .load(&mut conn)?;

    let file_name = format!("review_{}_v{}.{}", review.id, review.version, format);

    Ok(Json(ReviewExport {
        file_name,
        content_type: content_type.to_string(),
        review: ReviewExportBody {
            review,
            document,
            risks,
            observations,
            approvals,
        },
    }))
}

pub fn configure_reviews_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/reviews", get(list_reviews).post(create_review))
        .route(
            "/api/reviews/:id",
            get(get_review).put(update_review).delete(delete_review),
        )
        .route("/api/reviews/:id/comments", put(update_comments))
        .route("/api/reviews/:id/risks", post(add_risk))
        .route("/api/reviews/:id/export", get(export_review))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_emails() {
        assert_eq!(
            split_emails(&Some("a@x.com, b@y.com,,".into())),
            vec!["a@x.com".to_string(), "b@y.com".to_string()]
        );
        assert!(split_emails(&None).is_empty());
    }
}
