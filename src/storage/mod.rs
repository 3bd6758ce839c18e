//! Post datastore functionality.
//!
//! [`ContentBackend`] is the narrow set of operations the core needs from a
//! persistence layer. [`ContentStore`] layers post creation and editing on top
//! of it and is what the rest of the crate holds on to.

mod sqlite;

use std::future::Future;

use chrono::{SubsecRound as _, Utc};
use thiserror::Error;
use tracing::debug;

use crate::models::{Actor, NewPost, Post, PostFields, PostStatus};

pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
/// A persistence failure. Always reported, never swallowed.
pub enum StoreError {
    #[error("post {0} not found")]
    NotFound(String),
    #[error("stored row is malformed: {0}")]
    Corrupt(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

/// Engagement counters that may only move through atomic increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Likes,
    Views,
}

impl Counter {
    pub(crate) const fn column(self) -> &'static str {
        match self {
            Self::Likes => "likes_count",
            Self::Views => "views_count",
        }
    }
}

/// Operations consumed from the backing store.
pub trait ContentBackend: Clone + Send + Sync + 'static {
    /// Persist a new post, returning its assigned id.
    fn insert(&self, record: &NewPost) -> impl Future<Output = Result<String, StoreError>> + Send;

    fn get(&self, id: &str) -> impl Future<Output = Result<Option<Post>, StoreError>> + Send;

    /// Overwrite the content fields of a post. Status and counters are untouched.
    fn update_fields(
        &self,
        id: &str,
        fields: &PostFields,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Set the status of a post that is currently in one of `from`.
    /// Returns false, without writing, if no such post exists.
    fn update_status(
        &self,
        id: &str,
        status: PostStatus,
        from: &[PostStatus],
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Permanently remove a post together with its likes.
    fn delete(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Posts in `status`, newest first.
    fn query_by_status(
        &self,
        status: PostStatus,
    ) -> impl Future<Output = Result<Vec<Post>, StoreError>> + Send;

    fn query_approved(&self) -> impl Future<Output = Result<Vec<Post>, StoreError>> + Send {
        self.query_by_status(PostStatus::Approved)
    }

    fn like_exists(
        &self,
        post_id: &str,
        actor_id: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Insert a like if none exists, bumping `likes_count` in the same
    /// transaction. Returns the new count, or `None` if the like was already there.
    fn insert_like(
        &self,
        post_id: &str,
        actor_id: &str,
    ) -> impl Future<Output = Result<Option<i64>, StoreError>> + Send;

    /// Remove a like, lowering `likes_count` in the same transaction.
    /// Returns the new count, or `None` if there was nothing to remove.
    fn delete_like(
        &self,
        post_id: &str,
        actor_id: &str,
    ) -> impl Future<Output = Result<Option<i64>, StoreError>> + Send;

    /// Atomically add one to a counter, returning the new value.
    fn increment_counter(
        &self,
        post_id: &str,
        counter: Counter,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// Atomically subtract one from a counter (never below zero), returning the new value.
    fn decrement_counter(
        &self,
        post_id: &str,
        counter: Counter,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;
}

/// Post collection with creation and editing semantics.
#[derive(Clone, Debug)]
pub struct ContentStore<B> {
    backend: B,
}

impl<B: ContentBackend> ContentStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Create a pending post with zeroed counters on behalf of `author`.
    pub async fn create(&self, fields: PostFields, author: &Actor) -> Result<Post, StoreError> {
        let record = NewPost {
            author_id: author.id.clone(),
            author_display_name: author.display_name.clone(),
            fields,
            status: PostStatus::Pending,
            // Stored with microsecond precision.
            created_at: Utc::now().trunc_subsecs(6),
        };

        let id = self.backend.insert(&record).await?;
        debug!(post = %id, author = %author.id, "post created");

        let NewPost {
            author_id,
            author_display_name,
            fields,
            status,
            created_at,
        } = record;
        Ok(Post {
            id,
            author_id,
            author_display_name,
            title: fields.title,
            description: fields.description,
            url: fields.url,
            category: fields.category,
            language: fields.language,
            status,
            likes_count: 0,
            views_count: 0,
            created_at,
        })
    }

    /// Replace the content fields of an existing post and return the result.
    pub async fn update(&self, id: &str, fields: PostFields) -> Result<Post, StoreError> {
        self.backend.update_fields(id, &fields).await?;
        self.get(id).await
    }

    /// Fetch a post that must exist.
    pub async fn get(&self, id: &str) -> Result<Post, StoreError> {
        self.backend
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))
    }

    pub async fn find(&self, id: &str) -> Result<Option<Post>, StoreError> {
        self.backend.get(id).await
    }

    pub async fn list_by_status(&self, status: PostStatus) -> Result<Vec<Post>, StoreError> {
        self.backend.query_by_status(status).await
    }

    pub async fn list_approved(&self) -> Result<Vec<Post>, StoreError> {
        self.backend.query_approved().await
    }

    pub async fn set_status(&self, id: &str, status: PostStatus) -> Result<(), StoreError> {
        if self.backend.update_status(id, status, &PostStatus::ALL).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(id.to_owned()))
        }
    }

    /// Move a post from one of `from` to `to` in a single write.
    ///
    /// If the post is no longer in one of `from`, nothing is written and its
    /// current status is returned instead.
    pub async fn transition(
        &self,
        id: &str,
        from: &[PostStatus],
        to: PostStatus,
    ) -> Result<Result<(), PostStatus>, StoreError> {
        if self.backend.update_status(id, to, from).await? {
            return Ok(Ok(()));
        }
        Ok(Err(self.get(id).await?.status))
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.backend.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;

    #[tokio::test]
    async fn create_starts_pending_with_zero_counters() {
        let store = ContentStore::new(SqliteStore::memory().await.unwrap());
        let author = Actor::new("pioneer", "Pioneer");

        let post = store
            .create(fixtures::fields("Hello", "https://example.com"), &author)
            .await
            .unwrap();

        assert_eq!(post.status, PostStatus::Pending);
        assert_eq!((post.likes_count, post.views_count), (0, 0));
        assert_eq!(post.author_display_name, "Pioneer");
        assert_eq!(store.get(&post.id).await.unwrap(), post);
    }

    #[tokio::test]
    async fn update_keeps_status_and_counters() {
        let store = ContentStore::new(SqliteStore::memory().await.unwrap());
        let author = Actor::new("pioneer", "Pioneer");
        let post = store
            .create(fixtures::fields("Hello", "https://example.com"), &author)
            .await
            .unwrap();
        store
            .set_status(&post.id, PostStatus::Approved)
            .await
            .unwrap();
        store
            .backend()
            .increment_counter(&post.id, Counter::Views)
            .await
            .unwrap();

        let updated = store
            .update(&post.id, fixtures::fields("Renamed", "https://example.org"))
            .await
            .unwrap();

        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.url, "https://example.org");
        assert_eq!(updated.status, PostStatus::Approved);
        assert_eq!(updated.views_count, 1);
        assert_eq!(updated.created_at, post.created_at);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = ContentStore::new(SqliteStore::memory().await.unwrap());
        assert!(matches!(
            store.get("nope").await,
            Err(StoreError::NotFound(id)) if id == "nope"
        ));
    }
}
