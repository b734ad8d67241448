//! One-shot administrative repairs, run from the command line rather than
//! the request path.

use diesel::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

use crate::attachments::ReviewAttachment;
use crate::shared::schema::{documents, review_documents, reviews};
use crate::shared::utils::DbPool;

#[derive(Debug, Default, Serialize)]
pub struct BackfillReport {
    pub documents_scanned: usize,
    pub attachments_copied: usize,
}

/// Repair documents whose attachments were not carried across review
/// versions: every attachment of a document's first review version is
/// copied to each later version missing a same-named file. Safe to run
/// repeatedly; existing (review, file name) pairs are never duplicated.
pub fn backfill_attachments(pool: &DbPool) -> anyhow::Result<BackfillReport> {
    let mut conn = pool.get()?;
    let mut report = BackfillReport::default();

    let document_ids: Vec<Uuid> = documents::table.select(documents::id).load(&mut conn)?;

    for document_id in document_ids {
        report.documents_scanned += 1;

        let versions: Vec<(Uuid, i32)> = reviews::table
            .filter(reviews::document_id.eq(document_id))
            .order(reviews::version.asc())
            .select((reviews::id, reviews::version))
            .load(&mut conn)?;
        let Some(((first_review_id, _), later)) = versions.split_first().map(|(f, l)| (*f, l))
        else {
            continue;
        };
        if later.is_empty() {
            continue;
        }

        let source: Vec<ReviewAttachment> = review_documents::table
            .filter(review_documents::review_id.eq(first_review_id))
            .load(&mut conn)?;
        if source.is_empty() {
            continue;
        }

        for (review_id, _) in later {
            let existing: HashSet<String> = review_documents::table
                .filter(review_documents::review_id.eq(review_id))
                .select(review_documents::file_name)
                .load::<String>(&mut conn)?
                .into_iter()
                .collect();

            for attachment in &source {
                if existing.contains(&attachment.file_name) {
                    continue;
                }
                diesel::insert_into(review_documents::table)
                    .values(&ReviewAttachment {
                        id: Uuid::new_v4(),
                        review_id: *review_id,
                        ..attachment.clone()
                    })
                    .execute(&mut conn)?;
                report.attachments_copied += 1;
            }
        }
    }

    info!(
        "Attachment backfill scanned {} documents, copied {} rows",
        report.documents_scanned, report.attachments_copied
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::utils::{create_conn, run_migrations};
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
                documents::title.eq("Sponsorship agreement"),
                documents::created_by.eq("ana@example.com"),
            ))
            .execute(conn)
            .expect("insert document");
        id
    }

    fn insert_review(conn: &mut PgConnection, document_id: Uuid, version: i32) -> Uuid {
        let id = Uuid::new_v4();
        diesel::insert_into(reviews::table)
            .values((
                reviews::id.eq(id),
                reviews::document_id.eq(document_id),
                reviews::version.eq(version),
                reviews::reviewer_email.eq("ana@example.com"),
                reviews::reviewer_name.eq("Ana Souza"),
                reviews::review_date.eq(Utc::now()),
            ))
            .execute(conn)
            .expect("insert review");
        id
    }

    fn insert_attachment(conn: &mut PgConnection, review_id: Uuid, file_name: &str) {
        diesel::insert_into(review_documents::table)
            .values(&ReviewAttachment {
                id: Uuid::new_v4(),
                review_id,
                file_name: file_name.to_string(),
                file_path: format!("/tmp/{file_name}"),
                file_size: 42,
                uploaded_by: "ana@example.com".to_string(),
                uploaded_at: Utc::now(),
            })
            .execute(conn)
            .expect("insert attachment");
    }

    fn attachment_names(conn: &mut PgConnection, review_id: Uuid) -> Vec<String> {
        let mut names: Vec<String> = review_documents::table
            .filter(review_documents::review_id.eq(review_id))
            .select(review_documents::file_name)
            .load(conn)
            .expect("load names");
        names.sort();
        names
    }

    #[test]
    fn test_backfill_copies_first_version_files_and_is_idempotent() {
        let Some(pool) = test_pool() else { return };
        let mut conn = pool.get().expect("pool");

        let document_id = insert_document(&mut conn);
        let v1 = insert_review(&mut conn, document_id, 1);
        let v2 = insert_review(&mut conn, document_id, 2);
        let v3 = insert_review(&mut conn, document_id, 3);

        insert_attachment(&mut conn, v1, "contract.pdf");
        insert_attachment(&mut conn, v1, "annex.docx");
        // v2 already holds one of the files under the same name.
        insert_attachment(&mut conn, v2, "contract.pdf");
        drop(conn);

        let first = backfill_attachments(&pool).expect("backfill");
        assert!(first.attachments_copied >= 3);

        let mut conn = pool.get().expect("pool");
        assert_eq!(
            attachment_names(&mut conn, v2),
            vec!["annex.docx".to_string(), "contract.pdf".to_string()]
        );
        assert_eq!(
            attachment_names(&mut conn, v3),
            vec!["annex.docx".to_string(), "contract.pdf".to_string()]
        );
        drop(conn);

        let second = backfill_attachments(&pool).expect("backfill again");
        assert_eq!(second.attachments_copied, 0);

        let mut conn = pool.get().expect("pool");
        assert_eq!(attachment_names(&mut conn, v2).len(), 2);
        assert_eq!(attachment_names(&mut conn, v3).len(), 2);
    }

    #[test]
    fn test_backfill_skips_single_version_documents() {
        let Some(pool) = test_pool() else { return };
        let mut conn = pool.get().expect("pool");

        let document_id = insert_document(&mut conn);
        let only = insert_review(&mut conn, document_id, 1);
        insert_attachment(&mut conn, only, "contract.pdf");
        drop(conn);

        backfill_attachments(&pool).expect("backfill");

        let mut conn = pool.get().expect("pool");
        assert_eq!(attachment_names(&mut conn, only).len(), 1);
    }
}
