//! Per-actor likes and view counting.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    metrics::{ENGAGEMENT_LIKES, ENGAGEMENT_VIEWS},
    storage::{ContentBackend, Counter, StoreError},
};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// Like state of a post for one actor, after a toggle.
pub struct LikeState {
    pub liked: bool,
    pub likes_count: i64,
}

/// Like and view bookkeeping over the post store.
#[derive(Clone, Debug)]
pub struct EngagementTracker<B> {
    backend: B,
}

impl<B: ContentBackend> EngagementTracker<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Whether a like record exists. A missing post simply has no likes.
    pub async fn has_liked(&self, post_id: &str, actor_id: &str) -> Result<bool, StoreError> {
        self.backend.like_exists(post_id, actor_id).await
    }

    /// Flip the actor's like on a post.
    ///
    /// The counter only moves together with the like record it accounts for,
    /// so racing toggles from the same actor cannot double count.
    pub async fn toggle_like(
        &self,
        post_id: &str,
        actor_id: &str,
    ) -> Result<LikeState, StoreError> {
        if self.backend.like_exists(post_id, actor_id).await? {
            return match self.backend.delete_like(post_id, actor_id).await? {
                Some(likes_count) => {
                    counter!(ENGAGEMENT_LIKES, "op" => "unlike").increment(1);
                    Ok(LikeState {
                        liked: false,
                        likes_count,
                    })
                }
                None => {
                    debug!(post = post_id, actor = actor_id, "like already removed");
                    self.current(post_id, false).await
                }
            };
        }

        match self.backend.insert_like(post_id, actor_id).await? {
            Some(likes_count) => {
                counter!(ENGAGEMENT_LIKES, "op" => "like").increment(1);
                Ok(LikeState {
                    liked: true,
                    likes_count,
                })
            }
            None => {
                debug!(post = post_id, actor = actor_id, "like already present");
                self.current(post_id, true).await
            }
        }
    }

    async fn current(&self, post_id: &str, liked: bool) -> Result<LikeState, StoreError> {
        let post = self
            .backend
            .get(post_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(post_id.to_owned()))?;

        Ok(LikeState {
            liked,
            likes_count: post.likes_count,
        })
    }

    /// Count a view. Failures are logged and otherwise ignored.
    pub async fn record_view(&self, post_id: &str) {
        match self.backend.increment_counter(post_id, Counter::Views).await {
            Ok(_) => counter!(ENGAGEMENT_VIEWS).increment(1),
            Err(e) => warn!(post = post_id, "failed to record view: {e:?}"),
        }
    }
}

/// Posts already counted during one viewing session.
#[derive(Debug, Default)]
pub struct ViewSession {
    seen: HashSet<String>,
}

impl ViewSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a view unless this session already counted `post_id`.
    /// Returns whether a view was recorded.
    pub async fn view<B: ContentBackend>(
        &mut self,
        tracker: &EngagementTracker<B>,
        post_id: &str,
    ) -> bool {
        if !self.claim(post_id) {
            return false;
        }
        tracker.record_view(post_id).await;
        true
    }

    fn claim(&mut self, post_id: &str) -> bool {
        self.seen.insert(post_id.to_owned())
    }
}

/// A viewing session ends after this long without a view.
pub const VIEW_SESSION_IDLE: Duration = Duration::from_secs(30 * 60);

/// Viewing sessions of remote clients, keyed by whatever identifies the client.
#[derive(Clone, Debug, Default)]
pub struct ViewSessions {
    sessions: Arc<Mutex<HashMap<String, (Instant, ViewSession)>>>,
}

impl ViewSessions {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, (Instant, ViewSession)>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a view of `post_id` by `client` unless its session already counted it.
    /// Returns whether a view was recorded.
    pub async fn view<B: ContentBackend>(
        &self,
        tracker: &EngagementTracker<B>,
        client: &str,
        post_id: &str,
    ) -> bool {
        let first = {
            let mut sessions = self.sessions();
            let now = Instant::now();
            sessions.retain(|_, (last, _)| now.duration_since(*last) < VIEW_SESSION_IDLE);

            let (last, session) = sessions
                .entry(client.to_owned())
                .or_insert_with(|| (now, ViewSession::new()));
            *last = now;
            session.claim(post_id)
        };

        if first {
            tracker.record_view(post_id).await;
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;

    use super::*;
    use crate::{
        models::{Actor, fixtures},
        storage::{ContentStore, SqliteStore},
    };

    async fn setup() -> (ContentStore<SqliteStore>, EngagementTracker<SqliteStore>, String) {
        let backend = SqliteStore::memory().await.unwrap();
        let store = ContentStore::new(backend.clone());
        let post = store
            .create(
                fixtures::fields("Pi Wallet Guide", "https://example.com"),
                &Actor::new("author", "Author"),
            )
            .await
            .unwrap();
        (store, EngagementTracker::new(backend), post.id)
    }

    #[tokio::test]
    async fn toggling_twice_restores_state() {
        let (store, tracker, id) = setup().await;

        assert!(!tracker.has_liked(&id, "alice").await.unwrap());
        let liked = tracker.toggle_like(&id, "alice").await.unwrap();
        assert_eq!(
            liked,
            LikeState {
                liked: true,
                likes_count: 1
            }
        );
        assert!(tracker.has_liked(&id, "alice").await.unwrap());

        let unliked = tracker.toggle_like(&id, "alice").await.unwrap();
        assert_eq!(
            unliked,
            LikeState {
                liked: false,
                likes_count: 0
            }
        );
        assert!(!tracker.has_liked(&id, "alice").await.unwrap());
        assert_eq!(store.get(&id).await.unwrap().likes_count, 0);
    }

    #[tokio::test]
    async fn likes_from_different_actors_accumulate() {
        let (store, tracker, id) = setup().await;

        tracker.toggle_like(&id, "alice").await.unwrap();
        tracker.toggle_like(&id, "bob").await.unwrap();

        assert_eq!(store.get(&id).await.unwrap().likes_count, 2);
    }

    #[tokio::test]
    async fn concurrent_toggles_never_double_count() {
        let (store, tracker, id) = setup().await;

        let results = join_all((0..4).map(|_| tracker.toggle_like(&id, "alice"))).await;
        for r in results {
            r.unwrap();
        }

        let post = store.get(&id).await.unwrap();
        let liked = tracker.has_liked(&id, "alice").await.unwrap();
        assert_eq!(post.likes_count, i64::from(liked));
    }

    #[tokio::test]
    async fn deleted_post_has_no_likes() {
        let (store, tracker, id) = setup().await;
        tracker.toggle_like(&id, "alice").await.unwrap();

        store.delete(&id).await.unwrap();

        assert!(!tracker.has_liked(&id, "alice").await.unwrap());
        assert!(matches!(
            tracker.toggle_like(&id, "alice").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn views_count_once_per_session() {
        let (store, tracker, id) = setup().await;
        let mut session = ViewSession::new();

        assert!(session.view(&tracker, &id).await);
        assert!(!session.view(&tracker, &id).await);
        assert_eq!(store.get(&id).await.unwrap().views_count, 1);

        // Another session counts again.
        assert!(ViewSession::new().view(&tracker, &id).await);
        assert_eq!(store.get(&id).await.unwrap().views_count, 2);
    }

    #[tokio::test]
    async fn clients_count_once_each() {
        let (store, tracker, id) = setup().await;
        let sessions = ViewSessions::new();

        assert!(sessions.view(&tracker, "10.0.0.1", &id).await);
        assert!(!sessions.view(&tracker, "10.0.0.1", &id).await);
        assert!(sessions.view(&tracker, "10.0.0.2", &id).await);
        assert!(!sessions.clone().view(&tracker, "10.0.0.2", &id).await);

        assert_eq!(store.get(&id).await.unwrap().views_count, 2);
    }

    #[tokio::test]
    async fn view_of_missing_post_is_swallowed() {
        let (_store, tracker, _id) = setup().await;
        tracker.record_view("missing").await;
    }
}
