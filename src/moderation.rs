//! Moderation lifecycle of posts.

use std::{fmt, future::Future};

use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    metrics::MODERATION_ACTIONS,
    models::{Actor, Post, PostStatus},
    storage::{ContentBackend, ContentStore, StoreError},
};

/// A status change a moderator may request.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    /// Publish directly.
    Approve,
    /// Hide from the feed.
    Reject,
    /// Send a rejected post back to the review queue.
    Restore,
}

impl ModerationAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Restore => "restore",
        }
    }

    /// The statuses this action may be applied to.
    pub const fn sources(self) -> &'static [PostStatus] {
        match self {
            Self::Approve => &[PostStatus::Pending, PostStatus::Rejected],
            Self::Reject => &[PostStatus::Pending, PostStatus::Approved],
            Self::Restore => &[PostStatus::Rejected],
        }
    }

    /// Whether this action may be applied to a post in `from`.
    pub fn permits(self, from: PostStatus) -> bool {
        self.sources().contains(&from)
    }

    pub const fn target(self) -> PostStatus {
        match self {
            Self::Approve => PostStatus::Approved,
            Self::Reject => PostStatus::Rejected,
            Self::Restore => PostStatus::Pending,
        }
    }
}

impl fmt::Display for ModerationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ModerationError {
    #[error("access denied")]
    Unauthorized,
    #[error("post {0} not found")]
    NotFound(String),
    #[error("cannot {action} a post that is {from}")]
    InvalidTransition {
        from: PostStatus,
        action: ModerationAction,
    },
    #[error("failed to update post")]
    Store(#[source] StoreError),
}

impl From<StoreError> for ModerationError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => Self::NotFound(id),
            e => Self::Store(e),
        }
    }
}

/// Administrative control over post status.
#[derive(Clone, Debug)]
pub struct ModerationEngine<B> {
    store: ContentStore<B>,
}

impl<B: ContentBackend> ModerationEngine<B> {
    pub fn new(store: ContentStore<B>) -> Self {
        Self { store }
    }

    fn authorize(actor: &Actor) -> Result<(), ModerationError> {
        if actor.is_privileged {
            Ok(())
        } else {
            warn!(actor = %actor.id, "unprivileged moderation attempt");
            Err(ModerationError::Unauthorized)
        }
    }

    /// Posts in `status`, newest first.
    pub async fn list_by_status(
        &self,
        actor: &Actor,
        status: PostStatus,
    ) -> Result<Vec<Post>, ModerationError> {
        Self::authorize(actor)?;
        Ok(self.store.list_by_status(status).await?)
    }

    /// Move a post through the state machine, returning it in its new state.
    pub async fn apply(
        &self,
        actor: &Actor,
        id: &str,
        action: ModerationAction,
    ) -> Result<Post, ModerationError> {
        Self::authorize(actor)?;

        let mut post = self.store.get(id).await?;
        if !action.permits(post.status) {
            return Err(ModerationError::InvalidTransition {
                from: post.status,
                action,
            });
        }

        // Another moderator may have moved the post since it was read.
        let target = action.target();
        if let Err(now) = self.store.transition(id, action.sources(), target).await? {
            return Err(ModerationError::InvalidTransition { from: now, action });
        }
        counter!(MODERATION_ACTIONS, "action" => action.as_str()).increment(1);
        info!(
            post = id,
            moderator = %actor.id,
            from = %post.status,
            to = %target,
            "moderated post"
        );

        post.status = target;
        Ok(post)
    }

    pub async fn approve(&self, actor: &Actor, id: &str) -> Result<Post, ModerationError> {
        self.apply(actor, id, ModerationAction::Approve).await
    }

    pub async fn reject(&self, actor: &Actor, id: &str) -> Result<Post, ModerationError> {
        self.apply(actor, id, ModerationAction::Reject).await
    }

    pub async fn restore(&self, actor: &Actor, id: &str) -> Result<Post, ModerationError> {
        self.apply(actor, id, ModerationAction::Restore).await
    }

    /// Permanently remove a post and its likes, whatever its status.
    pub async fn delete(&self, actor: &Actor, id: &str) -> Result<(), ModerationError> {
        Self::authorize(actor)?;
        self.store.delete(id).await?;
        counter!(MODERATION_ACTIONS, "action" => "delete").increment(1);
        info!(post = id, moderator = %actor.id, "deleted post");
        Ok(())
    }
}

/// Apply a change to a local view, then confirm it remotely.
///
/// `apply` returns whatever `revert` needs to take the change back. If
/// `confirm` fails the view is reverted before the error is returned.
pub async fn optimistic<V, U, T, E>(
    view: &mut V,
    apply: impl FnOnce(&mut V) -> U,
    revert: impl FnOnce(&mut V, U),
    confirm: impl Future<Output = Result<T, E>>,
) -> Result<T, E> {
    let undo = apply(view);
    match confirm.await {
        Ok(v) => Ok(v),
        Err(e) => {
            revert(view, undo);
            Err(e)
        }
    }
}

/// A moderator's local list of posts in one status.
#[derive(Debug, Clone)]
pub struct ModerationQueue {
    status: PostStatus,
    posts: Vec<Post>,
}

impl ModerationQueue {
    pub async fn load<B: ContentBackend>(
        engine: &ModerationEngine<B>,
        actor: &Actor,
        status: PostStatus,
    ) -> Result<Self, ModerationError> {
        Ok(Self {
            status,
            posts: engine.list_by_status(actor, status).await?,
        })
    }

    pub fn status(&self) -> PostStatus {
        self.status
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    fn take(&mut self, id: &str) -> Option<(usize, Post)> {
        let idx = self.posts.iter().position(|p| p.id == id)?;
        Some((idx, self.posts.remove(idx)))
    }

    fn put_back(&mut self, taken: Option<(usize, Post)>) {
        if let Some((idx, post)) = taken {
            self.posts.insert(idx.min(self.posts.len()), post);
        }
    }

    /// Move a post out of this list, restoring it if the engine refuses.
    pub async fn moderate<B: ContentBackend>(
        &mut self,
        engine: &ModerationEngine<B>,
        actor: &Actor,
        id: &str,
        action: ModerationAction,
    ) -> Result<Post, ModerationError> {
        optimistic(
            self,
            |q| q.take(id),
            Self::put_back,
            engine.apply(actor, id, action),
        )
        .await
    }

    pub async fn delete<B: ContentBackend>(
        &mut self,
        engine: &ModerationEngine<B>,
        actor: &Actor,
        id: &str,
    ) -> Result<(), ModerationError> {
        optimistic(
            self,
            |q| q.take(id),
            Self::put_back,
            engine.delete(actor, id),
        )
        .await
    }
}
