//! Feed ranking over a snapshot of approved posts.

use std::cmp::Ordering;

use serde::Serialize;

use crate::models::{Category, Post};

/// Length of the best-of section.
pub const BEST_OF_LEN: usize = 5;
/// Length of the most-viewed section.
pub const MOST_VIEWED_LEN: usize = 10;

/// The three feed sections, each sorted independently from the same posts.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    pub best_of: Vec<Post>,
    pub most_viewed: Vec<Post>,
    pub most_recent: Vec<Post>,
}

fn by_likes(a: &Post, b: &Post) -> Ordering {
    b.likes_count.cmp(&a.likes_count)
}

fn by_views(a: &Post, b: &Post) -> Ordering {
    b.views_count.cmp(&a.views_count)
}

fn by_recency(a: &Post, b: &Post) -> Ordering {
    b.created_at.cmp(&a.created_at)
}

/// Last resort, so that equal keys can never come out in input order.
fn by_id(a: &Post, b: &Post) -> Ordering {
    a.id.cmp(&b.id)
}

fn best_of_order(a: &Post, b: &Post) -> Ordering {
    by_likes(a, b)
        .then_with(|| by_views(a, b))
        .then_with(|| by_recency(a, b))
        .then_with(|| by_id(a, b))
}

fn most_viewed_order(a: &Post, b: &Post) -> Ordering {
    by_views(a, b)
        .then_with(|| by_likes(a, b))
        .then_with(|| by_recency(a, b))
        .then_with(|| by_id(a, b))
}

fn most_recent_order(a: &Post, b: &Post) -> Ordering {
    by_recency(a, b)
        .then_with(|| by_likes(a, b))
        .then_with(|| by_id(a, b))
}

fn ranked(posts: &[&Post], order: fn(&Post, &Post) -> Ordering, limit: Option<usize>) -> Vec<Post> {
    let mut sorted = posts.to_vec();
    sorted.sort_by(|a, b| order(a, b));
    if let Some(limit) = limit {
        sorted.truncate(limit);
    }
    sorted.into_iter().cloned().collect()
}

/// Rank `posts`, keeping only `category` if one is given.
pub fn rank(posts: &[Post], category: Option<Category>) -> Feed {
    let filtered: Vec<&Post> = posts
        .iter()
        .filter(|p| category.is_none_or(|c| p.category == c))
        .collect();

    Feed {
        best_of: ranked(&filtered, best_of_order, Some(BEST_OF_LEN)),
        most_viewed: ranked(&filtered, most_viewed_order, Some(MOST_VIEWED_LEN)),
        most_recent: ranked(&filtered, most_recent_order, None),
    }
}
