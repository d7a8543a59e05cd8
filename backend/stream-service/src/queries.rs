//! Read-only queries against the backing relational store.
//!
//! The fan-out engine never writes to the source of truth; everything here is
//! a point lookup or a candidate-set fetch that audience predicates and
//! population jobs compose in application code. The trait seam keeps the
//! engine testable against an in-memory graph.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{BookList, Curation, Privacy, Status, User};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GraphQueries: Send + Sync {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;
    async fn get_status(&self, id: Uuid) -> Result<Option<Status>>;
    async fn get_list(&self, id: Uuid) -> Result<Option<BookList>>;

    /// Every local, active user id. Only these users own cached streams.
    async fn local_user_ids(&self) -> Result<Vec<Uuid>>;

    /// Subset of `ids` that are local and active.
    async fn local_active_among(&self, ids: &[Uuid]) -> Result<Vec<Uuid>>;

    /// Local, active followers of a user.
    async fn follower_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    /// Users with a block in either direction against `user_id`.
    async fn blocked_either_way(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    /// Whether `subject` currently blocks `object` (directed).
    async fn block_exists(&self, subject: Uuid, object: Uuid) -> Result<bool>;

    /// Local users who shelved any edition sharing a work with the given
    /// editions. Work linkage is resolved here, at query time, so edition
    /// reshuffles between works are picked up immediately.
    async fn local_shelvers_of(&self, edition_ids: &[Uuid]) -> Result<Vec<Uuid>>;

    async fn group_member_ids(&self, group_id: Uuid) -> Result<Vec<Uuid>>;

    /// All status ids authored by a user, including ones the viewer could
    /// never see. Removal paths are unconditional.
    async fn status_ids_by_user(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    async fn list_ids_by_user(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    async fn lists_curated_by_group(&self, group_id: Uuid) -> Result<Vec<BookList>>;

    /// Statuses that belong in `viewer`'s home stream right now, newest
    /// first, optionally restricted to one author.
    async fn home_statuses_for(
        &self,
        viewer: Uuid,
        from_author: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Status>>;

    /// Statuses that belong in `viewer`'s local stream right now.
    async fn local_statuses_for(
        &self,
        viewer: Uuid,
        from_author: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Status>>;

    /// Statuses about books `viewer` has shelved.
    async fn books_statuses_for(
        &self,
        viewer: Uuid,
        from_author: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Status>>;

    /// Book lists visible to `viewer`, optionally restricted to one owner.
    async fn lists_for(
        &self,
        viewer: Uuid,
        from_owner: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<BookList>>;
}

/// Postgres implementation over the application schema.
#[derive(Clone)]
pub struct PgGraphQueries {
    pool: PgPool,
}

impl PgGraphQueries {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct StatusRow {
    id: Uuid,
    user_id: Uuid,
    privacy: String,
    deleted: bool,
    published_date: DateTime<Utc>,
    created_date: DateTime<Utc>,
    mention_user_ids: Vec<Uuid>,
    book_ids: Vec<Uuid>,
}

impl TryFrom<StatusRow> for Status {
    type Error = crate::error::StreamError;

    fn try_from(row: StatusRow) -> Result<Status> {
        Ok(Status {
            id: row.id,
            user_id: row.user_id,
            privacy: Privacy::from_str(&row.privacy)?,
            deleted: row.deleted,
            published_date: row.published_date,
            created_date: row.created_date,
            mention_user_ids: row.mention_user_ids,
            book_ids: row.book_ids,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ListRow {
    id: Uuid,
    user_id: Uuid,
    privacy: String,
    curation: String,
    group_id: Option<Uuid>,
    updated_date: DateTime<Utc>,
}

impl TryFrom<ListRow> for BookList {
    type Error = crate::error::StreamError;

    fn try_from(row: ListRow) -> Result<BookList> {
        Ok(BookList {
            id: row.id,
            user_id: row.user_id,
            privacy: Privacy::from_str(&row.privacy)?,
            curation: Curation::from_str(&row.curation)?,
            group_id: row.group_id,
            updated_date: row.updated_date,
        })
    }
}

/// Shared SELECT head for statuses with mention/book id arrays.
const STATUS_SELECT: &str = r#"
    SELECT s.id, s.user_id, s.privacy, s.deleted, s.published_date, s.created_date,
           COALESCE(array_agg(DISTINCT m.user_id) FILTER (WHERE m.user_id IS NOT NULL), '{}') AS mention_user_ids,
           COALESCE(array_agg(DISTINCT sb.edition_id) FILTER (WHERE sb.edition_id IS NOT NULL), '{}') AS book_ids
    FROM statuses s
    LEFT JOIN status_mentions m ON m.status_id = s.id
    LEFT JOIN status_books sb ON sb.status_id = s.id
"#;

/// Predicate fragment: no block in either direction between $1 and the author.
const NOT_BLOCKED: &str = r#"
    NOT EXISTS (
        SELECT 1 FROM user_blocks b
        WHERE (b.blocker_id = $1 AND b.blocked_id = s.user_id)
           OR (b.blocker_id = s.user_id AND b.blocked_id = $1)
    )
"#;

#[async_trait]
impl GraphQueries for PgGraphQueries {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let row: Option<(Uuid, bool, bool)> =
            sqlx::query_as("SELECT id, local, is_active FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, local, active)| User { id, local, active }))
    }

    async fn get_status(&self, id: Uuid) -> Result<Option<Status>> {
        let sql = format!("{STATUS_SELECT} WHERE s.id = $1 GROUP BY s.id");
        let row: Option<StatusRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Status::try_from).transpose()
    }

    async fn get_list(&self, id: Uuid) -> Result<Option<BookList>> {
        let row: Option<ListRow> = sqlx::query_as(
            "SELECT id, user_id, privacy, curation, group_id, updated_date
             FROM book_lists WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(BookList::try_from).transpose()
    }

    async fn local_user_ids(&self) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar("SELECT id FROM users WHERE local AND is_active")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn local_active_among(&self, ids: &[Uuid]) -> Result<Vec<Uuid>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = sqlx::query_scalar(
            "SELECT id FROM users WHERE local AND is_active AND id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn follower_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar(
            "SELECT u.id FROM users u
             JOIN user_follows f ON f.follower_id = u.id
             WHERE f.followed_id = $1 AND u.local AND u.is_active",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn blocked_either_way(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar(
            "SELECT blocked_id FROM user_blocks WHERE blocker_id = $1
             UNION
             SELECT blocker_id FROM user_blocks WHERE blocked_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn block_exists(&self, subject: Uuid, object: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM user_blocks WHERE blocker_id = $1 AND blocked_id = $2
            )",
        )
        .bind(subject)
        .bind(object)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn local_shelvers_of(&self, edition_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        if edition_ids.is_empty() {
            return Ok(Vec::new());
        }
        // Join editions back through their parent work so every edition of
        // the same work counts.
        let ids = sqlx::query_scalar(
            "SELECT DISTINCT u.id FROM users u
             JOIN shelf_books sh ON sh.user_id = u.id
             JOIN editions shelved ON shelved.id = sh.edition_id
             JOIN editions referenced ON referenced.work_id = shelved.work_id
             WHERE referenced.id = ANY($1) AND u.local AND u.is_active",
        )
        .bind(edition_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn group_member_ids(&self, group_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar(
            "SELECT u.id FROM users u
             JOIN group_members gm ON gm.user_id = u.id
             WHERE gm.group_id = $1 AND u.local AND u.is_active",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn status_ids_by_user(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar("SELECT id FROM statuses WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn list_ids_by_user(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar("SELECT id FROM book_lists WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn lists_curated_by_group(&self, group_id: Uuid) -> Result<Vec<BookList>> {
        let rows: Vec<ListRow> = sqlx::query_as(
            "SELECT id, user_id, privacy, curation, group_id, updated_date
             FROM book_lists
             WHERE curation = 'group' AND group_id = $1",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(BookList::try_from).collect()
    }

    async fn home_statuses_for(
        &self,
        viewer: Uuid,
        from_author: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Status>> {
        let sql = format!(
            r#"{STATUS_SELECT}
            WHERE NOT s.deleted
              AND ($2::uuid IS NULL OR s.user_id = $2)
              AND (
                -- own statuses and followed authors, gated by privacy
                (
                    (s.user_id = $1 OR EXISTS (
                        SELECT 1 FROM user_follows f
                        WHERE f.follower_id = $1 AND f.followed_id = s.user_id
                    ))
                    AND (s.privacy IN ('public', 'followers') OR s.user_id = $1)
                )
                -- or the viewer is explicitly mentioned
                OR (s.privacy <> 'unlisted' AND EXISTS (
                    SELECT 1 FROM status_mentions m2
                    WHERE m2.status_id = s.id AND m2.user_id = $1
                ))
              )
              AND {NOT_BLOCKED}
            GROUP BY s.id
            ORDER BY s.published_date DESC
            LIMIT $3"#
        );
        let rows: Vec<StatusRow> = sqlx::query_as(&sql)
            .bind(viewer)
            .bind(from_author)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Status::try_from).collect()
    }

    async fn local_statuses_for(
        &self,
        viewer: Uuid,
        from_author: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Status>> {
        let sql = format!(
            r#"{STATUS_SELECT}
            JOIN users author ON author.id = s.user_id
            WHERE NOT s.deleted
              AND author.local AND author.is_active
              AND ($2::uuid IS NULL OR s.user_id = $2)
              AND (s.privacy = 'public' OR (s.user_id = $1 AND s.privacy = 'unlisted'))
              AND {NOT_BLOCKED}
            GROUP BY s.id
            ORDER BY s.published_date DESC
            LIMIT $3"#
        );
        let rows: Vec<StatusRow> = sqlx::query_as(&sql)
            .bind(viewer)
            .bind(from_author)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Status::try_from).collect()
    }

    async fn books_statuses_for(
        &self,
        viewer: Uuid,
        from_author: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Status>> {
        let sql = format!(
            r#"{STATUS_SELECT}
            WHERE NOT s.deleted
              AND ($2::uuid IS NULL OR s.user_id = $2)
              -- about a book the viewer shelved, via the shared work
              AND EXISTS (
                SELECT 1 FROM status_books ref
                JOIN editions referenced ON referenced.id = ref.edition_id
                JOIN editions shelved ON shelved.work_id = referenced.work_id
                JOIN shelf_books sh ON sh.edition_id = shelved.id AND sh.user_id = $1
                WHERE ref.status_id = s.id
              )
              AND (
                s.privacy = 'public'
                OR s.user_id = $1
                OR (s.privacy = 'followers' AND EXISTS (
                    SELECT 1 FROM user_follows f
                    WHERE f.follower_id = $1 AND f.followed_id = s.user_id
                ))
                OR (s.privacy IN ('followers', 'direct') AND EXISTS (
                    SELECT 1 FROM status_mentions m2
                    WHERE m2.status_id = s.id AND m2.user_id = $1
                ))
              )
              AND {NOT_BLOCKED}
            GROUP BY s.id
            ORDER BY s.published_date DESC
            LIMIT $3"#
        );
        let rows: Vec<StatusRow> = sqlx::query_as(&sql)
            .bind(viewer)
            .bind(from_author)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Status::try_from).collect()
    }

    async fn lists_for(
        &self,
        viewer: Uuid,
        from_owner: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<BookList>> {
        let rows: Vec<ListRow> = sqlx::query_as(
            r#"
            SELECT l.id, l.user_id, l.privacy, l.curation, l.group_id, l.updated_date
            FROM book_lists l
            WHERE l.privacy <> 'unlisted'
              AND ($2::uuid IS NULL OR l.user_id = $2)
              AND (l.privacy <> 'direct' OR l.user_id = $1)
              AND (
                -- an attached group replaces the follower gate
                (l.curation = 'group' AND l.group_id IS NOT NULL AND (
                    l.user_id = $1 OR EXISTS (
                        SELECT 1 FROM group_members gm
                        WHERE gm.group_id = l.group_id AND gm.user_id = $1
                    )
                ))
                OR (NOT (l.curation = 'group' AND l.group_id IS NOT NULL) AND (
                    l.privacy = 'public'
                    OR l.user_id = $1
                    OR (l.privacy = 'followers' AND EXISTS (
                        SELECT 1 FROM user_follows f
                        WHERE f.follower_id = $1 AND f.followed_id = l.user_id
                    ))
                ))
              )
              AND NOT EXISTS (
                SELECT 1 FROM user_blocks b
                WHERE (b.blocker_id = $1 AND b.blocked_id = l.user_id)
                   OR (b.blocker_id = l.user_id AND b.blocked_id = $1)
              )
            ORDER BY l.updated_date DESC
            LIMIT $3
            "#,
        )
        .bind(viewer)
        .bind(from_owner)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(BookList::try_from).collect()
    }
}
