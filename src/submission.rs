//! Payment-gated link submission.
//!
//! A new post is only ever written after its fee payment reached the completion
//! phase. Edits and privileged submissions skip the gate entirely.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info};
use url::Url;

use crate::{
    metrics::{POST_CREATED, POST_EDITED, POST_UNSAVED},
    models::{
        Actor, Category, DEFAULT_LANGUAGE, MAX_DESCRIPTION_LEN, MAX_LANGUAGE_LEN, MAX_TITLE_LEN,
        Post, PostFields,
    },
    payment::{PaymentBackend, PaymentError, PaymentGateway, PaymentRequest, Wallet},
    storage::{ContentBackend, ContentStore, StoreError},
};

/// Number of title characters carried into the payment memo.
const MEMO_TITLE_CHARS: usize = 20;
/// How long a settled outcome stays queryable.
const OUTCOME_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Host patterns recognised by [`detect_category`], checked in order.
const CATEGORY_HOSTS: &[(&str, Category)] = &[
    ("youtube.com", Category::Video),
    ("youtu.be", Category::Video),
    ("twitter.com", Category::ShortFormSocial),
    ("x.com", Category::ShortFormSocial),
    ("threads.net", Category::ThreadedSocial),
    ("instagram.com", Category::PhotoSocial),
    ("medium.com", Category::Article),
];

/// Best-effort classification of a link by where it points.
///
/// Known hosts are matched on the host when the link parses. A link that
/// mentions a blog anywhere is an article.
pub fn detect_category(url: &str) -> Category {
    let raw = url.trim().to_ascii_lowercase();
    let host = Url::parse(&raw)
        .ok()
        .and_then(|u| u.host_str().map(ToOwned::to_owned));

    let known = match &host {
        Some(host) => classify(|pattern| {
            host == pattern
                || host
                    .strip_suffix(pattern)
                    .is_some_and(|rest| rest.ends_with('.'))
        }),
        None => classify(|pattern| raw.contains(pattern)),
    };

    match known {
        Some(category) => category,
        None if raw.contains("blog") => Category::Article,
        None => Category::Other,
    }
}

fn classify(matches: impl Fn(&str) -> bool) -> Option<Category> {
    CATEGORY_HOSTS
        .iter()
        .find(|&&(pattern, _)| matches(pattern))
        .map(|&(_, category)| category)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("a title is required")]
    MissingTitle,
    #[error("the title may be at most {} characters", MAX_TITLE_LEN)]
    TitleTooLong,
    #[error("the description may be at most {} characters", MAX_DESCRIPTION_LEN)]
    DescriptionTooLong,
    #[error("a link is required")]
    MissingUrl,
    #[error("`{0}` is not an absolute http(s) link")]
    InvalidUrl(String),
    #[error("the language tag may be at most {} characters", MAX_LANGUAGE_LEN)]
    LanguageTooLong,
}

/// A link as entered by the pioneer.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    /// Overrides the detected category.
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub language: Option<String>,
}

impl Draft {
    /// Check the draft and normalise it into storable fields.
    pub fn validate(&self) -> Result<PostFields, ValidationError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ValidationError::MissingTitle);
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(ValidationError::TitleTooLong);
        }

        let description = self.description.trim();
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(ValidationError::DescriptionTooLong);
        }

        let url = self.url.trim();
        if url.is_empty() {
            return Err(ValidationError::MissingUrl);
        }
        match Url::parse(url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") && u.has_host() => {}
            _ => return Err(ValidationError::InvalidUrl(url.to_owned())),
        }

        let language = match self.language.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_LANGUAGE.to_owned(),
            Some(l) if l.chars().count() > MAX_LANGUAGE_LEN => {
                return Err(ValidationError::LanguageTooLong);
            }
            Some(l) => l.to_owned(),
        };

        Ok(PostFields {
            title: title.to_owned(),
            description: description.to_owned(),
            url: url.to_owned(),
            category: self.category.unwrap_or_else(|| detect_category(url)),
            language,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Create,
    Edit { post_id: String },
}

/// Progress of one submission, for display.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SubmissionPhase {
    #[default]
    Idle,
    /// Waiting on the wallet handshake.
    AwaitingAuthorization,
    /// Payment settled; writing the post.
    Saving,
}

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("invalid draft: {0}")]
    Validation(#[from] ValidationError),
    #[error("access denied")]
    Unauthorized,
    #[error("post {0} not found")]
    NotFound(String),
    #[error("payment cancelled")]
    PaymentCancelled,
    #[error("payment failed: {0}")]
    PaymentFailed(String),
    /// The write failed. If `payment` is set the fee was already collected.
    #[error("failed to save post")]
    PersistenceFailed {
        payment: Option<String>,
        #[source]
        source: StoreError,
    },
    #[error("submission ended unexpectedly")]
    Interrupted,
}

impl From<PaymentError> for SubmissionError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::Cancelled => Self::PaymentCancelled,
            PaymentError::Failed(reason) => Self::PaymentFailed(reason),
        }
    }
}

impl SubmissionError {
    /// Stable machine-readable name.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation-failed",
            Self::Unauthorized => "unauthorized",
            Self::NotFound(_) => "not-found",
            Self::PaymentCancelled => "payment-cancelled",
            Self::PaymentFailed(_) => "payment-failed",
            Self::PersistenceFailed { .. } => "persistence-failed",
            Self::Interrupted => "interrupted",
        }
    }

    pub const fn title(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Check your link",
            Self::Unauthorized => "Access denied",
            Self::NotFound(_) => "Post not found",
            Self::PaymentCancelled => "Payment cancelled",
            Self::PaymentFailed(_) => "Payment failed",
            Self::PersistenceFailed { payment: Some(_), .. } => "Payment received, post not saved",
            Self::PersistenceFailed { payment: None, .. } => "Could not save your post",
            Self::Interrupted => "Something went wrong",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Validation(e) => format!("Please fix your submission: {e}."),
            Self::Unauthorized => "access denied".to_owned(),
            Self::NotFound(_) => "That post no longer exists.".to_owned(),
            Self::PaymentCancelled => {
                "You cancelled the payment. Nothing was charged and your link was not submitted."
                    .to_owned()
            }
            Self::PaymentFailed(_) => {
                "The payment could not be completed and your link was not submitted. \
                 You can try again."
                    .to_owned()
            }
            Self::PersistenceFailed {
                payment: Some(reference),
                ..
            } => format!(
                "Your payment succeeded but we could not save your post. \
                 Please contact support with payment reference {reference}."
            ),
            Self::PersistenceFailed { payment: None, .. } => {
                "We could not save your post. Please try again.".to_owned()
            }
            Self::Interrupted => "Your submission was interrupted. Please try again.".to_owned(),
        }
    }

    /// The user-facing rendition of this failure.
    pub fn failure(&self) -> Failure {
        Failure {
            kind: self.kind(),
            title: self.title(),
            message: self.message(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: &'static str,
    pub title: &'static str,
    pub message: String,
}

/// Resets the displayed phase once a submission is over, however it ended.
struct PhaseGuard<'a>(&'a watch::Sender<SubmissionPhase>);

impl PhaseGuard<'_> {
    fn set(&self, phase: SubmissionPhase) {
        _ = self.0.send_replace(phase);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.set(SubmissionPhase::Idle);
    }
}

/// Gate payment, then persist.
#[derive(Clone, Debug)]
pub struct SubmissionWorkflow<W, P, B> {
    gateway: PaymentGateway<W, P>,
    store: ContentStore<B>,
    fee: f64,
}

impl<W: Wallet, P: PaymentBackend, B: ContentBackend> SubmissionWorkflow<W, P, B> {
    pub fn new(gateway: PaymentGateway<W, P>, store: ContentStore<B>, fee: f64) -> Self {
        Self {
            gateway,
            store,
            fee,
        }
    }

    pub fn store(&self) -> &ContentStore<B> {
        &self.store
    }

    /// The fee request for a draft.
    pub fn payment_request(&self, fields: &PostFields, draft_ref: &str) -> PaymentRequest {
        let short: String = fields.title.chars().take(MEMO_TITLE_CHARS).collect();
        PaymentRequest {
            draft_ref: draft_ref.to_owned(),
            amount: self.fee,
            memo: format!("Curation Fee: {short}"),
            metadata: json!({ "draftRef": draft_ref, "type": "post_fee" }),
        }
    }

    /// Submit `draft` on behalf of `actor`, reporting progress through `phase`.
    pub async fn submit(
        &self,
        actor: &Actor,
        draft: &Draft,
        intent: Intent,
        draft_ref: &str,
        phase: &watch::Sender<SubmissionPhase>,
    ) -> Result<Post, SubmissionError> {
        let fields = draft.validate()?;
        let phase = PhaseGuard(phase);

        if let Intent::Edit { post_id } = intent {
            return self.edit(actor, &post_id, fields).await;
        }

        let payment = if actor.is_privileged {
            info!(actor = %actor.id, "privileged submission, skipping fee");
            None
        } else {
            let pending = self
                .gateway
                .begin(self.payment_request(&fields, draft_ref))
                .await?;
            phase.set(SubmissionPhase::AwaitingAuthorization);

            let receipt = pending.settle().await?;
            Some(receipt.reference)
        };

        phase.set(SubmissionPhase::Saving);
        match self.store.create(fields, actor).await {
            Ok(post) => {
                counter!(POST_CREATED).increment(1);
                info!(post = %post.id, actor = %actor.id, "post submitted");
                Ok(post)
            }
            Err(source) => {
                if let Some(reference) = &payment {
                    counter!(POST_UNSAVED).increment(1);
                    error!(
                        draft = draft_ref,
                        payment = %reference,
                        actor = %actor.id,
                        "paid post could not be saved: {source:?}"
                    );
                } else {
                    error!(draft = draft_ref, actor = %actor.id, "failed to save post: {source:?}");
                }
                Err(SubmissionError::PersistenceFailed { payment, source })
            }
        }
    }

    async fn edit(
        &self,
        actor: &Actor,
        post_id: &str,
        fields: PostFields,
    ) -> Result<Post, SubmissionError> {
        let existing = self
            .store
            .find(post_id)
            .await
            .map_err(|source| SubmissionError::PersistenceFailed {
                payment: None,
                source,
            })?
            .ok_or_else(|| SubmissionError::NotFound(post_id.to_owned()))?;
        if !actor.can_edit(&existing) {
            return Err(SubmissionError::Unauthorized);
        }

        match self.store.update(post_id, fields).await {
            Ok(post) => {
                counter!(POST_EDITED).increment(1);
                info!(post = %post.id, actor = %actor.id, "post edited");
                Ok(post)
            }
            Err(StoreError::NotFound(id)) => Err(SubmissionError::NotFound(id)),
            Err(source) => {
                error!(post = post_id, "failed to update post: {source:?}");
                Err(SubmissionError::PersistenceFailed {
                    payment: None,
                    source,
                })
            }
        }
    }

    /// Run a submission in the background.
    pub fn start(
        &self,
        actor: Actor,
        draft: Draft,
        intent: Intent,
        draft_ref: String,
    ) -> Submission {
        let (tx, rx) = watch::channel(SubmissionPhase::Idle);
        let workflow = self.clone();
        let task_ref = draft_ref.clone();

        let task = tokio::spawn(async move {
            workflow
                .submit(&actor, &draft, intent, &task_ref, &tx)
                .await
        });

        Submission {
            draft_ref,
            phase: rx,
            task,
        }
    }
}

/// A submission running in the background, together with its live phase.
#[derive(Debug)]
pub struct Submission {
    draft_ref: String,
    phase: watch::Receiver<SubmissionPhase>,
    task: JoinHandle<Result<Post, SubmissionError>>,
}

impl Submission {
    pub fn phase(&self) -> SubmissionPhase {
        *self.phase.borrow()
    }

    /// Wait until the submission leaves `idle`, or ends without ever doing so.
    pub async fn started(&mut self) -> SubmissionPhase {
        match self
            .phase
            .wait_for(|p| *p != SubmissionPhase::Idle)
            .await
        {
            Ok(p) => *p,
            Err(_) => SubmissionPhase::Idle,
        }
    }

    pub async fn outcome(self) -> Result<Post, SubmissionError> {
        self.task.await.unwrap_or_else(|e| {
            error!(draft = %self.draft_ref, "submission task failed: {e}");
            Err(SubmissionError::Interrupted)
        })
    }
}

/// How a tracked submission ended.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum Outcome {
    Saved { post: Post },
    Failed(Failure),
}

impl From<Result<Post, SubmissionError>> for Outcome {
    fn from(r: Result<Post, SubmissionError>) -> Self {
        match r {
            Ok(post) => Self::Saved { post },
            Err(e) => Self::Failed(e.failure()),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionStatus {
    pub draft_ref: String,
    pub phase: SubmissionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

#[derive(Debug)]
struct Tracked {
    actor_id: String,
    /// `None` while the draft reference is only reserved.
    phase: Option<watch::Receiver<SubmissionPhase>>,
    outcome: Option<(Instant, Outcome)>,
}

/// Submissions handed off to the background, by draft reference.
#[derive(Clone, Debug, Default)]
pub struct SubmissionTracker {
    entries: Arc<Mutex<HashMap<String, Tracked>>>,
}

impl SubmissionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Tracked>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hold `draft_ref` for `actor_id` ahead of starting a submission.
    ///
    /// Refused while another actor owns the reference, or while a submission
    /// on it has not settled. A settled reference may be reused by its owner.
    pub fn reserve(&self, draft_ref: &str, actor_id: &str) -> Option<Reservation> {
        let mut entries = self.entries();
        entries.retain(|_, t| {
            t.outcome
                .as_ref()
                .is_none_or(|(at, _)| at.elapsed() < OUTCOME_RETENTION)
        });

        if let Some(t) = entries.get(draft_ref) {
            if t.actor_id != actor_id || t.outcome.is_none() {
                return None;
            }
        }

        _ = entries.insert(
            draft_ref.to_owned(),
            Tracked {
                actor_id: actor_id.to_owned(),
                phase: None,
                outcome: None,
            },
        );
        Some(Reservation {
            tracker: self.clone(),
            draft_ref: draft_ref.to_owned(),
            tracked: false,
        })
    }

    /// Keep track of `submission` until it settles, and for a while after.
    fn track(&self, submission: Submission) {
        let draft_ref = submission.draft_ref.clone();
        if let Some(t) = self.entries().get_mut(&draft_ref) {
            t.phase = Some(submission.phase.clone());
        }

        let tracker = self.clone();
        drop(tokio::spawn(async move {
            let outcome = Outcome::from(submission.outcome().await);
            if let Some(t) = tracker.entries().get_mut(&draft_ref) {
                t.outcome = Some((Instant::now(), outcome));
            }
        }));
    }

    /// Whether `draft_ref` belongs to `actor_id`.
    pub fn is_owned_by(&self, draft_ref: &str, actor_id: &str) -> bool {
        self.entries()
            .get(draft_ref)
            .is_some_and(|t| t.actor_id == actor_id)
    }

    pub fn status(&self, draft_ref: &str) -> Option<SubmissionStatus> {
        self.entries().get(draft_ref).map(|t| SubmissionStatus {
            draft_ref: draft_ref.to_owned(),
            phase: t
                .phase
                .as_ref()
                .map_or(SubmissionPhase::Idle, |p| *p.borrow()),
            outcome: t.outcome.as_ref().map(|(_, o)| o.clone()),
        })
    }
}

/// A draft reference held in a [`SubmissionTracker`].
///
/// Dropped without [tracking](Reservation::track) a submission, it gives the
/// reference up again.
#[derive(Debug)]
pub struct Reservation {
    tracker: SubmissionTracker,
    draft_ref: String,
    tracked: bool,
}

impl Reservation {
    /// Follow `submission`, which must have been started on the reserved reference.
    pub fn track(mut self, submission: Submission) {
        debug_assert_eq!(submission.draft_ref, self.draft_ref);
        self.tracked = true;
        self.tracker.track(submission);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.tracked {
            return;
        }
        let mut entries = self.tracker.entries();
        if entries.get(&self.draft_ref).is_some_and(|t| t.phase.is_none()) {
            _ = entries.remove(&self.draft_ref);
        }
    }
}
