use axum::{
    extract::{Path, State},
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
use crate::reviews::get_review_for_user;
use crate::shared::error::ApiError;
use crate::shared::schema::review_viewers;
use crate::shared::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = review_viewers)]
pub struct ReviewViewer {
    pub review_id: Uuid,
    pub user_email: String,
    pub can_view: bool,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AddViewersRequest {
    pub viewers: Vec<String>,
}

/// Presence of a grant row is what makes a review visible to a user.
pub fn can_user_view(
    conn: &mut PgConnection,
    review_id: Uuid,
    user_email: &str,
) -> QueryResult<bool> {
    let found: Option<bool> = review_viewers::table
        .filter(review_viewers::review_id.eq(review_id))
        .filter(review_viewers::user_email.eq(user_email))
        .filter(review_viewers::can_view.eq(true))
        .select(review_viewers::can_view)
        .first(conn)
        .optional()?;
    Ok(found.unwrap_or(false))
}

pub async fn list_viewers(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(review_id): Path<Uuid>,
) -> Result<Json<Vec<ReviewViewer>>, ApiError> {
    user.require_view()?;
    let mut conn = state.conn.get()?;

    get_review_for_user(&mut conn, review_id, &user.email)?;

    let viewers: Vec<ReviewViewer> = review_viewers::table
        .filter(review_viewers::review_id.eq(review_id))
        .filter(review_viewers::can_view.eq(true))
        .order(review_viewers::granted_at.asc())
        .load(&mut conn)?;

    Ok(Json(viewers))
}

pub async fn add_viewers(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(review_id): Path<Uuid>,
    Json(req): Json<AddViewersRequest>,
) -> Result<Json<Vec<ReviewViewer>>, ApiError> {
    user.require_edit()?;
    if req.viewers.is_empty() {
        return Err(ApiError::Validation("Select at least one viewer".into()));
    }
    let mut conn = state.conn.get()?;

    get_review_for_user(&mut conn, review_id, &user.email)?;

    conn.transaction::<_, ApiError, _>(|conn| {
        for email in &req.viewers {
            let email = email.trim();
            if email.is_empty() {
                continue;
            }
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
        }
        Ok(())
    })?;

    let viewers: Vec<ReviewViewer> = review_viewers::table
        .filter(review_viewers::review_id.eq(review_id))
        .filter(review_viewers::can_view.eq(true))
        .order(review_viewers::granted_at.asc())
        .load(&mut conn)?;

    Ok(Json(viewers))
}

pub async fn remove_viewer(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path((review_id, email)): Path<(Uuid, String)>,
) -> Result<StatusCode, ApiError> {
    user.require_edit()?;
    let mut conn = state.conn.get()?;

    get_review_for_user(&mut conn, review_id, &user.email)?;

    let deleted = diesel::delete(
        review_viewers::table
            .filter(review_viewers::review_id.eq(review_id))
            .filter(review_viewers::user_email.eq(&email)),
    )
    .execute(&mut conn)?;
    if deleted == 0 {
        return Err(ApiError::NotFound("Viewer grant not found".into()));
    }

    Ok(StatusCode::NO_CONTENT)
}

pub fn configure_viewers_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/reviews/:id/viewers",
            get(list_viewers).post(add_viewers),
        )
        .route(
            "/api/reviews/:id/viewers/:email",
            axum::routing::delete(remove_viewer),
        )
}
