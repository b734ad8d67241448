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
use crate::shared::error::ApiError;
use crate::shared::schema::{review_risks, risk_categories};
use crate::shared::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = risk_categories)]
pub struct RiskCategory {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCategoryRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct CategoryUsage {
    pub total_risks: i64,
    pub risk_ids: Vec<Uuid>,
}

pub const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    ("Contratual", "Riscos de obrigações e cláusulas contratuais"),
    ("Regulatório", "Riscos de conformidade com órgãos reguladores"),
    ("Trabalhista", "Riscos de natureza trabalhista"),
    ("Tributário", "Riscos fiscais e tributários"),
    ("Propriedade Intelectual", "Riscos sobre marcas, patentes e direitos autorais"),
    ("Proteção de Dados", "Riscos de privacidade e tratamento de dados pessoais"),
];

/// Seed the default categories; names already present are left untouched.
pub fn seed_default_categories(conn: &mut PgConnection) -> QueryResult<usize> {
    let now = Utc::now();
    let rows: Vec<RiskCategory> = DEFAULT_CATEGORIES
        .iter()
        .map(|(name, description)| RiskCategory {
            id: Uuid::new_v4(),
            name: (*name).to_string(),
            description: (*description).to_string(),
            created_by: "system".to_string(),
            created_at: now,
            updated_at: now,
        })
        .collect();
    diesel::insert_into(risk_categories::table)
        .values(&rows)
        .on_conflict(risk_categories::name)
        .do_nothing()
        .execute(conn)
}

pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<Vec<RiskCategory>>, ApiError> {
    user.require_view()?;
    let mut conn = state.conn.get()?;

    let categories: Vec<RiskCategory> = risk_categories::table
        .order(risk_categories::name.asc())
        .load(&mut conn)?;

    Ok(Json(categories))
}

pub async fn create_category(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<CreateCategoryRequest>,
) -> Result<Json<RiskCategory>, ApiError> {
    user.require_edit()?;
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("Category name is required".into()));
    }
    let mut conn = state.conn.get()?;

    let now = Utc::now();
    let category = RiskCategory {
        id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        description: req.description.trim().to_string(),
        created_by: user.email,
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(risk_categories::table)
        .values(&category)
        .execute(&mut conn)
        .map_err(|e| match e {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => ApiError::Conflict(format!("A category named '{}' already exists", category.name)),
            other => other.into(),
        })?;

    Ok(Json(category))
}

pub async fn update_category(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCategoryRequest>,
) -> Result<Json<RiskCategory>, ApiError> {
    user.require_edit()?;
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("Category name is required".into()));
    }
    let mut conn = state.conn.get()?;

    let category: RiskCategory =
        diesel::update(risk_categories::table.filter(risk_categories::id.eq(id)))
            .set((
                risk_categories::name.eq(req.name.trim()),
                risk_categories::description.eq(req.description.trim()),
                risk_categories::updated_at.eq(Utc::now()),
            ))
            .returning(risk_categories::all_columns)
            .get_result(&mut conn)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => {
                    ApiError::NotFound("Category not found".into())
                }
                diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    _,
                ) => ApiError::Conflict(format!(
                    "A category named '{}' already exists",
                    req.name.trim()
                )),
                other => other.into(),
            })?;

    Ok(Json(category))
}

/// Hard delete. Risks referencing the category survive with a null
/// category reference.
pub async fn delete_category(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    user.require_edit()?;
    let mut conn = state.conn.get()?;

    let deleted = diesel::delete(risk_categories::table.filter(risk_categories::id.eq(id)))
        .execute(&mut conn)?;
    if deleted == 0 {
        return Err(ApiError::NotFound("Category not found".into()));
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn category_usage(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<CategoryUsage>, ApiError> {
    user.require_view()?;
    let mut conn = state.conn.get()?;

    let total_risks: i64 = review_risks::table
        .filter(review_risks::category_id.eq(id))
        .count()
        .get_result(&mut conn)?;

    let risk_ids: Vec<Uuid> = review_risks::table
        .filter(review_risks::category_id.eq(id))
        .order(review_risks::created_at.desc())
        .select(review_risks::id)
        .limit(5)
        .load(&mut conn)?;

    Ok(Json(CategoryUsage {
        total_risks,
        risk_ids,
    }))
}

pub fn configure_categories_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/categories", get(list_categories).post(create_category))
        .route(
            "/api/categories/:id",
            axum::routing::put(update_category).delete(delete_category),
        )
        .route("/api/categories/:id/usage", get(category_usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::utils::{create_conn, run_migrations, DbPool};

    fn test_pool() -> Option<DbPool> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_conn(&url).ok()?;
        run_migrations(&pool).ok()?;
        Some(pool)
    }

    #[test]
    fn test_seed_is_idempotent() {
        let Some(pool) = test_pool() else { return };
        let mut conn = pool.get().expect("pool");

        seed_default_categories(&mut conn).expect("seed");
        let first: i64 = risk_categories::table.count().get_result(&mut conn).expect("count");

        seed_default_categories(&mut conn).expect("seed again");
        let second: i64 = risk_categories::table.count().get_result(&mut conn).expect("count");

        assert_eq!(first, second);
        assert!(second >= DEFAULT_CATEGORIES.len() as i64);
    }
}
