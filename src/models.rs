//! Core data model shared by every layer.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a post title, in characters.
pub const MAX_TITLE_LEN: usize = 60;
/// Maximum length of a post description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 200;
/// Maximum length of a language tag.
pub const MAX_LANGUAGE_LEN: usize = 16;
/// Language assumed when a draft does not carry one.
pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} `{value}`")]
/// Failure to parse one of the closed enums from its stored form.
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
/// The kind of content a link points at.
pub enum Category {
    Video,
    ShortFormSocial,
    ThreadedSocial,
    PhotoSocial,
    Article,
    Other,
}

impl Category {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::ShortFormSocial => "short-form-social",
            Self::ThreadedSocial => "threaded-social",
            Self::PhotoSocial => "photo-social",
            Self::Article => "article",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(Self::Video),
            "short-form-social" => Ok(Self::ShortFormSocial),
            "threaded-social" => Ok(Self::ThreadedSocial),
            "photo-social" => Ok(Self::PhotoSocial),
            "article" => Ok(Self::Article),
            "other" => Ok(Self::Other),
            _ => Err(ParseEnumError {
                kind: "category",
                value: s.to_owned(),
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
/// Moderation state of a post.
pub enum PostStatus {
    /// Waiting for review. Every new post starts here.
    Pending,
    /// Publicly visible in the feed.
    Approved,
    /// Hidden; can be restored to the queue or approved directly.
    Rejected,
}

impl PostStatus {
    pub const ALL: [Self; 3] = [Self::Pending, Self::Approved, Self::Rejected];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(ParseEnumError {
                kind: "status",
                value: s.to_owned(),
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// A submitted link.
pub struct Post {
    pub id: String,
    pub author_id: String,
    /// Display name captured when the post was created.
    pub author_display_name: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub category: Category,
    pub language: String,
    pub status: PostStatus,
    pub likes_count: i64,
    pub views_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// An authenticated caller, as supplied by the identity collaborator.
pub struct Actor {
    pub id: String,
    pub display_name: String,
    pub is_privileged: bool,
}

impl Actor {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_privileged: false,
        }
    }

    pub fn privileged(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            is_privileged: true,
            ..Self::new(id, display_name)
        }
    }

    /// Whether this actor may change the content of `post`.
    pub fn can_edit(&self, post: &Post) -> bool {
        self.is_privileged || self.id == post.author_id
    }
}

/// Mutable content fields of a post. Status and counters are never part of this set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostFields {
    pub title: String,
    pub description: String,
    pub url: String,
    pub category: Category,
    pub language: String,
}

/// A post ready to be written, before the store has assigned an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub author_id: String,
    pub author_display_name: String,
    pub fields: PostFields,
    pub status: PostStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, TimeZone as _, Utc};

    use super::*;

    /// Build a post with the given engagement numbers and creation time (seconds).
    pub(crate) fn post(id: &str, likes: i64, views: i64, created: i64) -> Post {
        Post {
            id: id.to_owned(),
            author_id: "author".to_owned(),
            author_display_name: "Author".to_owned(),
            title: format!("Post {id}"),
            description: String::new(),
            url: format!("https://example.com/{id}"),
            category: Category::Other,
            language: DEFAULT_LANGUAGE.to_owned(),
            status: PostStatus::Approved,
            likes_count: likes,
            views_count: views,
            created_at: at(created),
        }
    }

    pub(crate) fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    pub(crate) fn fields(title: &str, url: &str) -> PostFields {
        PostFields {
            title: title.to_owned(),
            description: "A short summary".to_owned(),
            url: url.to_owned(),
            category: Category::Other,
            language: DEFAULT_LANGUAGE.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_round_trip_through_storage_form() {
        for c in [
            Category::Video,
            Category::ShortFormSocial,
            Category::ThreadedSocial,
            Category::PhotoSocial,
            Category::Article,
            Category::Other,
        ] {
            assert_eq!(c.as_str().parse::<Category>(), Ok(c));
        }
        assert_eq!("rejected".parse::<PostStatus>(), Ok(PostStatus::Rejected));
        assert!("deleted".parse::<PostStatus>().is_err());
    }

    #[test]
    fn serde_names_match_storage_names() {
        let json = serde_json::to_string(&Category::ShortFormSocial).unwrap();
        assert_eq!(json, "\"short-form-social\"");
        let json = serde_json::to_string(&PostStatus::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
    }

    #[test]
    fn only_owner_or_privileged_can_edit() {
        let post = fixtures::post("a", 0, 0, 0);
        assert!(Actor::new("author", "Author").can_edit(&post));
        assert!(Actor::privileged("admin", "Admin").can_edit(&post));
        assert!(!Actor::new("someone", "Someone").can_edit(&post));
    }
}
