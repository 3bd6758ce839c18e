//! SQLite-based post storage implementation.

use std::str::FromStr as _;

use anyhow::{Context as _, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    FromRow, SqliteConnection, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use uuid::Uuid;

use super::{ContentBackend, Counter, StoreError};
use crate::models::{NewPost, Post, PostFields, PostStatus};

/// Raw `posts` row as SQLite returns it.
#[derive(Debug, FromRow)]
struct PostRow {
    id: String,
    author_id: String,
    author_display_name: String,
    title: String,
    description: String,
    url: String,
    category: String,
    language: String,
    status: String,
    likes_count: i64,
    views_count: i64,
    created_at: String,
}

impl TryFrom<PostRow> for Post {
    type Error = StoreError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        let corrupt = |e: &dyn std::fmt::Display| StoreError::Corrupt(format!("{}: {e}", row.id));

        let category = row.category.parse().map_err(|e| corrupt(&e))?;
        let status = row.status.parse().map_err(|e| corrupt(&e))?;
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|e| corrupt(&e))?
            .with_timezone(&Utc);

        Ok(Self {
            id: row.id,
            author_id: row.author_id,
            author_display_name: row.author_display_name,
            title: row.title,
            description: row.description,
            url: row.url,
            category,
            language: row.language,
            status,
            likes_count: row.likes_count,
            views_count: row.views_count,
            created_at,
        })
    }
}

/// Fixed-width timestamp encoding, so that text order equals time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Move a counter by one in a single statement. Decrements stop at zero.
async fn step_counter(
    conn: &mut SqliteConnection,
    post_id: &str,
    counter: Counter,
    up: bool,
) -> Result<i64, StoreError> {
    let col = counter.column();
    let sql = if up {
        format!("UPDATE posts SET {col} = {col} + 1 WHERE id = ? RETURNING {col}")
    } else {
        format!("UPDATE posts SET {col} = MAX({col} - 1, 0) WHERE id = ? RETURNING {col}")
    };

    sqlx::query_scalar(&sql)
        .bind(post_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StoreError::NotFound(post_id.to_owned()))
}

/// SQLite-backed [`ContentBackend`].
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to (creating if needed) the database at `url` and apply migrations.
    pub async fn open(url: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)
            .context("failed to parse database options")?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .context("failed to connect to SQLite database")?;

        Self::with_pool(pool).await
    }

    /// A private in-memory database. Limited to one connection, since every
    /// connection to `:memory:` would otherwise see its own empty database.
    pub async fn memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("failed to parse database options")?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .context("failed to open in-memory database")?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to apply migrations")?;

        Ok(Self { pool })
    }
}

impl ContentBackend for SqliteStore {
    async fn insert(&self, record: &NewPost) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();

        _ = sqlx::query(
            r#"
            INSERT INTO posts
                (id, author_id, author_display_name, title, description, url,
                 category, language, status, likes_count, views_count, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?)
            "#,
        )
        .bind(&id)
        .bind(&record.author_id)
        .bind(&record.author_display_name)
        .bind(&record.fields.title)
        .bind(&record.fields.description)
        .bind(&record.fields.url)
        .bind(record.fields.category.as_str())
        .bind(&record.fields.language)
        .bind(record.status.as_str())
        .bind(timestamp(record.created_at))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<Post>, StoreError> {
        sqlx::query_as::<_, PostRow>(r#"SELECT * FROM posts WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Post::try_from)
            .transpose()
    }

    async fn update_fields(&self, id: &str, fields: &PostFields) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE posts
                SET title = ?, description = ?, url = ?, category = ?, language = ?
                WHERE id = ?
            "#,
        )
        .bind(&fields.title)
        .bind(&fields.description)
        .bind(&fields.url)
        .bind(fields.category.as_str())
        .bind(&fields.language)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_owned()));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: PostStatus,
        from: &[PostStatus],
    ) -> Result<bool, StoreError> {
        if from.is_empty() {
            return Ok(false);
        }

        let sql = format!(
            "UPDATE posts SET status = ? WHERE id = ? AND status IN ({})",
            vec!["?"; from.len()].join(", ")
        );
        let mut query = sqlx::query(&sql).bind(status.as_str()).bind(id);
        for s in from {
            query = query.bind(s.as_str());
        }

        Ok(query.execute(&self.pool).await?.rows_affected() == 1)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        // Unless committed, the transaction is rolled back on drop.
        let mut tx = self.pool.begin().await?;

        _ = sqlx::query(r#"DELETE FROM likes WHERE post_id = ?"#)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let res = sqlx::query(r#"DELETE FROM posts WHERE id = ?"#)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_owned()));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query_by_status(&self, status: PostStatus) -> Result<Vec<Post>, StoreError> {
        sqlx::query_as::<_, PostRow>(
            r#"SELECT * FROM posts WHERE status = ? ORDER BY created_at DESC, id DESC"#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Post::try_from)
        .collect()
    }

    async fn like_exists(&self, post_id: &str, actor_id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> =
            sqlx::query_scalar(r#"SELECT 1 FROM likes WHERE post_id = ? AND actor_id = ?"#)
                .bind(post_id)
                .bind(actor_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(found.is_some())
    }

    async fn insert_like(&self, post_id: &str, actor_id: &str) -> Result<Option<i64>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            r#"INSERT OR IGNORE INTO likes (post_id, actor_id, created_at) VALUES (?, ?, ?)"#,
        )
        .bind(post_id)
        .bind(actor_id)
        .bind(timestamp(Utc::now()))
        .execute(&mut *tx)
        .await;

        let inserted = match res {
            Ok(res) => res.rows_affected() == 1,
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                return Err(StoreError::NotFound(post_id.to_owned()));
            }
            Err(e) => return Err(e.into()),
        };
        if !inserted {
            return Ok(None);
        }

        let count = step_counter(&mut tx, post_id, Counter::Likes, true).await?;
        tx.commit().await?;
        Ok(Some(count))
    }

    async fn delete_like(&self, post_id: &str, actor_id: &str) -> Result<Option<i64>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(r#"DELETE FROM likes WHERE post_id = ? AND actor_id = ?"#)
            .bind(post_id)
            .bind(actor_id)
            .execute(&mut *tx)
            .await?;
        if res.rows_affected() == 0 {
            return Ok(None);
        }

        let count = step_counter(&mut tx, post_id, Counter::Likes, false).await?;
        tx.commit().await?;
        Ok(Some(count))
    }

    async fn increment_counter(&self, post_id: &str, counter: Counter) -> Result<i64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        step_counter(&mut conn, post_id, counter, true).await
    }

    async fn decrement_counter(&self, post_id: &str, counter: Counter) -> Result<i64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        step_counter(&mut conn, post_id, counter, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;

    fn record(author: &str, created: i64) -> NewPost {
        NewPost {
            author_id: author.to_owned(),
            author_display_name: author.to_owned(),
            fields: fixtures::fields("Title", "https://example.com"),
            status: PostStatus::Pending,
            created_at: fixtures::at(created),
        }
    }

    #[tokio::test]
    async fn query_by_status_is_newest_first() {
        let store = SqliteStore::memory().await.unwrap();
        let old = store.insert(&record("a", 1)).await.unwrap();
        let new = store.insert(&record("b", 50)).await.unwrap();
        let mid = store.insert(&record("c", 10)).await.unwrap();
        assert!(store
            .update_status(&mid, PostStatus::Approved, &[PostStatus::Pending])
            .await
            .unwrap());

        let pending: Vec<_> = store
            .query_by_status(PostStatus::Pending)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(pending, vec![new, old]);

        let approved = store.query_approved().await.unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].id, mid);
    }

    #[tokio::test]
    async fn status_updates_only_from_allowed_states() {
        let store = SqliteStore::memory().await.unwrap();
        let id = store.insert(&record("a", 0)).await.unwrap();

        assert!(!store
            .update_status(&id, PostStatus::Pending, &[PostStatus::Rejected])
            .await
            .unwrap());
        assert!(!store
            .update_status(&id, PostStatus::Approved, &[])
            .await
            .unwrap());
        assert!(!store
            .update_status("missing", PostStatus::Approved, &PostStatus::ALL)
            .await
            .unwrap());
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().status,
            PostStatus::Pending
        );

        assert!(store
            .update_status(
                &id,
                PostStatus::Rejected,
                &[PostStatus::Pending, PostStatus::Approved]
            )
            .await
            .unwrap());
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().status,
            PostStatus::Rejected
        );
    }

    #[tokio::test]
    async fn counters_floor_at_zero() {
        let store = SqliteStore::memory().await.unwrap();
        let id = store.insert(&record("a", 0)).await.unwrap();

        assert_eq!(store.decrement_counter(&id, Counter::Likes).await.unwrap(), 0);
        assert_eq!(store.increment_counter(&id, Counter::Likes).await.unwrap(), 1);
        assert_eq!(store.increment_counter(&id, Counter::Views).await.unwrap(), 1);
        assert_eq!(store.decrement_counter(&id, Counter::Likes).await.unwrap(), 0);
        assert!(matches!(
            store.increment_counter("missing", Counter::Views).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn likes_are_unique_per_actor() {
        let store = SqliteStore::memory().await.unwrap();
        let id = store.insert(&record("a", 0)).await.unwrap();

        assert_eq!(store.insert_like(&id, "alice").await.unwrap(), Some(1));
        assert_eq!(store.insert_like(&id, "alice").await.unwrap(), None);
        assert_eq!(store.insert_like(&id, "bob").await.unwrap(), Some(2));
        assert!(store.like_exists(&id, "alice").await.unwrap());
        assert!(!store.like_exists(&id, "carol").await.unwrap());
        assert_eq!(store.delete_like(&id, "alice").await.unwrap(), Some(1));
        assert_eq!(store.delete_like(&id, "alice").await.unwrap(), None);
    }

    #[tokio::test]
    async fn like_on_missing_post_is_not_found() {
        let store = SqliteStore::memory().await.unwrap();
        assert!(matches!(
            store.insert_like("missing", "alice").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_likes() {
        let store = SqliteStore::memory().await.unwrap();
        let id = store.insert(&record("a", 0)).await.unwrap();
        assert_eq!(store.insert_like(&id, "alice").await.unwrap(), Some(1));

        store.delete(&id).await.unwrap();

        assert!(store.get(&id).await.unwrap().is_none());
        assert!(!store.like_exists(&id, "alice").await.unwrap());
        assert!(matches!(store.delete(&id).await, Err(StoreError::NotFound(_))));
    }
}
