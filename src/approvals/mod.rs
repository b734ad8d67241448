use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::reviews::get_review_for_user;
use crate::shared::error::ApiError;
use crate::shared::schema::{review_approval_requests, review_approvals, reviews};
use crate::shared::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = review_approvals)]
pub struct ReviewApproval {
    pub id: Uuid,
    pub review_id: Uuid,
    pub approver_email: String,
    pub approver_name: String,
    pub status: String,
    pub comments: String,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = review_approval_requests)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub review_id: Uuid,
    pub requested_by: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateApprovalRequestBody {
    pub approvers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ApprovalInvite {
    pub approver_email: String,
    pub approver_name: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ApprovalRequestResponse {
    pub request: ApprovalRequest,
    pub invites: Vec<ApprovalInvite>,
}

#[derive(Debug, Deserialize)]
pub struct DecideApprovalRequest {
    pub action: String,
    #[serde(default)]
    pub comments: String,
    /// Approval-link token for unauthenticated approvers.
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApprovalHistory {
    pub approvals: Vec<ReviewApproval>,
    pub pending: i64,
}

pub async fn create_approval_request(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(review_id): Path<Uuid>,
    Json(body): Json<CreateApprovalRequestBody>,
) -> Result<Json<ApprovalRequestResponse>, ApiError> {
    user.require_edit()?;
    let approvers: Vec<String> = body
        .approvers
        .iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect();
    if approvers.is_empty() {
        return Err(ApiError::Validation("Select at least one approver".into()));
    }

    let mut conn = state.conn.get()?;
    get_review_for_user(&mut conn, review_id, &user.email)?;

    // Approver display names come from the Connect directory when it
    // answers; the email stands in otherwise.
    let directory = state.connect.get_users().await;
    let name_of = |email: &str| -> String {
        directory
            .iter()
            .find(|u| u.email == email)
            .map(|u| u.name.clone())
            .unwrap_or_else(|| email.to_string())
    };

    let request = conn.transaction::<ApprovalRequest, ApiError, _>(|conn| {
        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            review_id,
            requested_by: user.email.clone(),
            status: "pending".to_string(),
            created_at: Utc::now(),
        };
        diesel::insert_into(review_approval_requests::table)
            .values(&request)
            .execute(conn)?;

        for email in &approvers {
            let approval = ReviewApproval {
                id: Uuid::new_v4(),
                review_id,
                approver_email: email.clone(),
                approver_name: name_of(email),
                status: "pending".to_string(),
                comments: String::new(),
                approved_at: None,
                created_at: Utc::now(),
            };
            diesel::insert_into(review_approvals::table)
                .values(&approval)
                .execute(conn)?;
        }
        Ok(request)
    })?;

    let mut invites = Vec::with_capacity(approvers.len());
    for email in &approvers {
        let token = state
            .tokens
            .issue_approval_token(review_id, email)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        // Delivery is the mail collaborator's job; the hand-off is logged.
        info!("Approval requested from {email} for review {review_id}");
        invites.push(ApprovalInvite {
            approver_email: email.clone(),
            approver_name: name_of(email),
            token,
        });
    }

    Ok(Json(ApprovalRequestResponse { request, invites }))
}

/// Record an approve/reject decision. The approver is either the signed-in
/// user or the holder of a valid approval-link token for this review.
pub async fn decide_approval(
    State(state): State<Arc<AppState>>,
    user: Option<CurrentUser>,
    Path(review_id): Path<Uuid>,
    Json(req): Json<DecideApprovalRequest>,
) -> Result<Json<ReviewApproval>, ApiError> {
    let approver_email = match &req.token {
        Some(token) => {
            let claims = state
                .tokens
                .verify_approval_token(token)
                .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
            if claims.review_id != review_id {
                return Err(ApiError::Unauthorized(
                    "Approval token does not match this review".into(),
                ));
            }
            claims.approver_email
        }
        None => match &user {
            Some(user) if !user.is_service => user.email.clone(),
            _ => {
                return Err(ApiError::Unauthorized(
                    "Approval requires a session or an approval token".into(),
                ))
            }
        },
    };

    let status = match req.action.as_str() {
        "approve" => "approved",
        "reject" => "rejected",
        other => {
            return Err(ApiError::Validation(format!(
                "Unknown action '{other}', use approve or reject"
            )))
        }
    };
    let comments = req.comments.trim().to_string();
    if comments.is_empty() {
        return Err(ApiError::Validation("A comment is mandatory".into()));
    }

    let mut conn = state.conn.get()?;

    reviews::table
        .filter(reviews::id.eq(review_id))
        .select(reviews::id)
        .first::<Uuid>(&mut conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Review not found".into()))?;

    let approval = conn.transaction::<ReviewApproval, ApiError, _>(|conn| {
        let approval: ReviewApproval = diesel::update(
            review_approvals::table
                .filter(review_approvals::review_id.eq(review_id))
                .filter(review_approvals::approver_email.eq(&approver_email))
                .filter(review_approvals::status.eq("pending")),
        )
        .set((
            review_approvals::status.eq(status),
            review_approvals::comments.eq(&comments),
            review_approvals::approved_at.eq(Some(Utc::now())),
        ))
        .returning(review_approvals::all_columns)
        .get_result(conn)
        .optional()?
        .ok_or_else(|| {
            ApiError::NotFound("No pending approval found for this approver".into())
        })?;

        let pending: i64 = review_approvals::table
            .filter(review_approvals::review_id.eq(review_id))
            .filter(review_approvals::status.eq("pending"))
            .count()
            .get_result(conn)?;
        if pending == 0 {
            diesel::update(
                review_approval_requests::table
                    .filter(review_approval_requests::review_id.eq(review_id))
                    .filter(review_approval_requests::status.eq("pending")),
            )
            .set(review_approval_requests::status.eq("completed"))
            .execute(conn)?;
        }

        Ok(approval)
    })?;

    info!("Review {review_id} {status} by {approver_email}");
    Ok(Json(approval))
}

pub async fn list_approvals(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(review_id): Path<Uuid>,
) -> Result<Json<ApprovalHistory>, ApiError> {
    user.require_view()?;
    let mut conn = state.conn.get()?;

    get_review_for_user(&mut conn, review_id, &user.email)?;

    let approvals: Vec<ReviewApproval> = review_approvals::table
        .filter(review_approvals::review_id.eq(review_id))
        .order((
            review_approvals::approved_at.desc().nulls_last(),
            review_approvals::created_at.desc(),
        ))
        .load(&mut conn)?;

    let pending = approvals.iter().filter(|a| a.status == "pending").count() as i64;

    Ok(Json(ApprovalHistory { approvals, pending }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequestStatusBody {
    pub status: String,
}

pub async fn update_request_status(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(review_id): Path<Uuid>,
    Json(body): Json<UpdateRequestStatusBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    user.require_edit()?;
    if !matches!(body.status.as_str(), "pending" | "completed" | "cancelled") {
        return Err(ApiError::Validation(format!(
            "Unknown request status '{}'",
            body.status
        )));
    }
    let mut conn = state.conn.get()?;

    get_review_for_user(&mut conn, review_id, &user.email)?;

    let updated = diesel::update(
        review_approval_requests::table.filter(review_approval_requests::review_id.eq(review_id)),
    )
    .set(review_approval_requests::status.eq(&body.status))
    .execute(&mut conn)?;
    if updated == 0 {
        return Err(ApiError::NotFound("No approval request for this review".into()));
    }

    Ok(Json(serde_json::json!({ "updated": updated, "status": body.status })))
}

pub fn configure_approvals_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/reviews/:id/approval-requests",
            post(create_approval_request).put(update_request_status),
        )
        .route(
            "/api/reviews/:id/approvals",
            get(list_approvals).post(decide_approval),
        )
}
