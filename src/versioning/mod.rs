//! Per-document version counters.
//!
//! Every document carries three monotonic counters: `document_version`
//! counts every edit, `review_version` counts edit cycles that recorded
//! review comments and `risk_version` counts edit cycles that recorded
//! risks. Counters move only through the operations below, each a single
//! atomic UPDATE scoped to one document row. A missing document matches
//! zero rows and surfaces as `NotFound` from the RETURNING clause.

use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::shared::schema::documents;

/// Bump the general counter only. Used for metadata-only edits.
pub fn increment_document_version(conn: &mut PgConnection, document_id: Uuid) -> QueryResult<i32> {
    diesel::update(documents::table.filter(documents::id.eq(document_id)))
        .set((
            documents::document_version.eq(documents::document_version + 1),
            documents::updated_at.eq(Utc::now()),
        ))
        .returning(documents::document_version)
        .get_result(conn)
}

/// Bump the review counter and the general counter in one statement.
/// Returns the new review counter.
pub fn increment_review_version(conn: &mut PgConnection, document_id: Uuid) -> QueryResult<i32> {
    diesel::update(documents::table.filter(documents::id.eq(document_id)))
        .set((
            documents::document_version.eq(documents::document_version + 1),
            documents::review_version.eq(documents::review_version + 1),
            documents::updated_at.eq(Utc::now()),
        ))
        .returning(documents::review_version)
        .get_result(conn)
}

/// Bump the risk counter and the general counter in one statement.
/// Returns the new risk counter.
pub fn increment_risk_version(conn: &mut PgConnection, document_id: Uuid) -> QueryResult<i32> {
    diesel::update(documents::table.filter(documents::id.eq(document_id)))
        .set((
            documents::document_version.eq(documents::document_version + 1),
            documents::risk_version.eq(documents::risk_version + 1),
            documents::updated_at.eq(Utc::now()),
        ))
        .returning(documents::risk_version)
        .get_result(conn)
}

/// One edit cycle that recorded comments and, possibly, risks: the general
/// counter moves once while the review counter and (when risks were
/// recorded) the risk counter each move once. Returns the new review
/// counter.
pub fn record_review_cycle(
    conn: &mut PgConnection,
    document_id: Uuid,
    with_risks: bool,
) -> QueryResult<i32> {
    if with_risks {
        diesel::update(documents::table.filter(documents::id.eq(document_id)))
            .set((
                documents::document_version.eq(documents::document_version + 1),
                documents::review_version.eq(documents::review_version + 1),
                documents::risk_version.eq(documents::risk_version + 1),
                documents::updated_at.eq(Utc::now()),
            ))
            .returning(documents::review_version)
            .get_result(conn)
    } else {
        increment_review_version(conn, document_id)
    }
}

/// Next sequential review version for a document: 1 when no reviews exist,
/// max + 1 otherwise. Callers must run this and the subsequent insert in
/// the same transaction so the unique (document_id, version) constraint is
/// the only arbiter of races.
pub fn next_review_version(conn: &mut PgConnection, document_id: Uuid) -> QueryResult<i32> {
    use crate::shared::schema::reviews;

    let current: Option<i32> = reviews::table
        .filter(reviews::document_id.eq(document_id))
        .select(diesel::dsl::max(reviews::version))
        .first(conn)?;
    Ok(current.unwrap_or(0) + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::utils::{create_conn, run_migrations, DbPool};
    use chrono::Utc;

    fn test_pool() -> Option<DbPool> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_conn(&url).ok()?;
        run_migrations(&pool).ok()?;
        Some(pool)
    }

    fn insert_document(conn: &mut PgConnection) -> Uuid {
        let id = Uuid::new_v4();
        diesel::insert_into(documents::table)
            .values((
                documents::id.eq(id),
                documents::title.eq("Master services agreement"),
                documents::summary.eq("MSA with vendor"),
                documents::description.eq(""),
                documents::created_by.eq("ana@example.com"),
            ))
            .execute(conn)
            .expect("insert document");
        id
    }

    fn counters(conn: &mut PgConnection, id: Uuid) -> (i32, i32, i32) {
        documents::table
            .filter(documents::id.eq(id))
            .select((
                documents::document_version,
                documents::review_version,
                documents::risk_version,
            ))
            .first(conn)
            .expect("load counters")
    }

    fn insert_review(conn: &mut PgConnection, document_id: Uuid, version: i32) {
        use crate::shared::schema::reviews;
        diesel::insert_into(reviews::table)
            .values((
                reviews::id.eq(Uuid::new_v4()),
                reviews::document_id.eq(document_id),
                reviews::version.eq(version),
                reviews::reviewer_email.eq("ana@example.com"),
                reviews::reviewer_name.eq("Ana Souza"),
                reviews::review_date.eq(Utc::now()),
            ))
            .execute(conn)
            .expect("insert review");
    }

    #[test]
    fn test_counter_scenario() {
        let Some(pool) = test_pool() else { return };
        let mut conn = pool.get().expect("pool");
        let id = insert_document(&mut conn);
        assert_eq!(counters(&mut conn, id), (1, 0, 0));

        // Add a comment.
        record_review_cycle(&mut conn, id, false).expect("cycle");
        assert_eq!(counters(&mut conn, id), (2, 1, 0));

        // Edit the title.
        increment_document_version(&mut conn, id).expect("edit");
        assert_eq!(counters(&mut conn, id), (3, 1, 0));

        // Add a risk.
        increment_risk_version(&mut conn, id).expect("risk");
        assert_eq!(counters(&mut conn, id), (4, 1, 1));

        // Add a comment and a risk in the same cycle.
        record_review_cycle(&mut conn, id, true).expect("cycle");
        assert_eq!(counters(&mut conn, id), (5, 2, 2));
    }

    #[test]
    fn test_general_counter_dominates() {
        let Some(pool) = test_pool() else { return };
        let mut conn = pool.get().expect("pool");
        let id = insert_document(&mut conn);

        increment_review_version(&mut conn, id).expect("review");
        increment_risk_version(&mut conn, id).expect("risk");
        increment_risk_version(&mut conn, id).expect("risk");
        increment_document_version(&mut conn, id).expect("edit");

        let (dv, rv, kv) = counters(&mut conn, id);
        assert!(dv >= rv.max(kv));
        assert_eq!((dv, rv, kv), (5, 1, 2));
    }

    #[test]
    fn test_increment_review_version_leaves_risk_counter() {
        let Some(pool) = test_pool() else { return };
        let mut conn = pool.get().expect("pool");
        let id = insert_document(&mut conn);

        let new_review = increment_review_version(&mut conn, id).expect("review");
        assert_eq!(new_review, 1);
        assert_eq!(counters(&mut conn, id), (2, 1, 0));
    }

    #[test]
    fn test_missing_document_is_not_found() {
        let Some(pool) = test_pool() else { return };
        let mut conn = pool.get().expect("pool");
        let result = increment_document_version(&mut conn, Uuid::new_v4());
        assert!(matches!(result, Err(diesel::result::Error::NotFound)));
    }

    #[test]
    fn test_next_review_version_starts_at_one() {
        let Some(pool) = test_pool() else { return };
        let mut conn = pool.get().expect("pool");
        let id = insert_document(&mut conn);

        assert_eq!(next_review_version(&mut conn, id).expect("next"), 1);
        insert_review(&mut conn, id, 1);
        insert_review(&mut conn, id, 2);
        assert_eq!(next_review_version(&mut conn, id).expect("next"), 3);

        // Numbering is per document, not global.
        let other = insert_document(&mut conn);
        assert_eq!(next_review_version(&mut conn, other).expect("next"), 1);
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let Some(pool) = test_pool() else { return };
        let mut conn = pool.get().expect("pool");
        let id = insert_document(&mut conn);
        insert_review(&mut conn, id, 1);

        use crate::shared::schema::reviews;
        let result = diesel::insert_into(reviews::table)
            .values((
                reviews::id.eq(Uuid::new_v4()),
                reviews::document_id.eq(id),
                reviews::version.eq(1),
                reviews::reviewer_email.eq("bob@example.com"),
                reviews::reviewer_name.eq("Bob Lima"),
                reviews::review_date.eq(Utc::now()),
            ))
            .execute(&mut conn);
        assert!(matches!(
            result,
            Err(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _
            ))
        ));
    }
}
