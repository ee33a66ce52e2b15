use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::timestamp::{TimestampError, TimestampNormalizer};
use crate::types::ActivityRecord;

const EVENT_PUSH: &str = "push";
const EVENT_PULL_REQUEST: &str = "pull_request";
const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// Head-commit message prefix of the push the host emits after a pull-request
/// merge. Those pushes are already represented by the MERGE record.
///
/// This is a heuristic: an ordinary commit starting with the same text is
/// dropped too, and merges whose commit message differs (squash, rebase,
/// custom titles) are not filtered.
pub const MERGE_ECHO_PREFIX: &str = "Merge pull request #";

/// Result of classifying one inbound notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Record(ActivityRecord),
    Drop(DropReason),
}

/// Why an authenticated notification did not produce a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Push generated by the host for a merged pull request.
    MergeEcho,
    /// Event kind other than `push` / `pull_request`, or no event kind at all.
    UnsupportedEvent(Option<String>),
    /// `pull_request` action other than `opened` / `closed`.
    UnsupportedAction(String),
}

impl DropReason {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::MergeEcho => "merge_echo",
            Self::UnsupportedEvent(_) => "unsupported_event",
            Self::UnsupportedAction(_) => "unsupported_action",
        }
    }
}

/// Errors for authenticated payloads that lack the fields their event needs.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("failed to parse payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid timestamp in field '{field}': {source}")]
    Timestamp {
        field: &'static str,
        source: TimestampError,
    },
}

/// Maps GitHub `push` and `pull_request` notifications onto activity records.
pub struct EventClassifier;

impl EventClassifier {
    pub fn classify(
        event_kind: Option<&str>,
        payload: &Value,
        normalizer: &TimestampNormalizer,
    ) -> Result<Classification, ClassifyError> {
        match event_kind {
            Some(EVENT_PUSH) => Self::classify_push(payload, normalizer),
            Some(EVENT_PULL_REQUEST) => Self::classify_pull_request(payload, normalizer),
            other => Ok(Classification::Drop(DropReason::UnsupportedEvent(
                other.map(str::to_string),
            ))),
        }
    }

    fn classify_push(
        payload: &Value,
        normalizer: &TimestampNormalizer,
    ) -> Result<Classification, ClassifyError> {
        let push = PushPayload::deserialize(payload)?;
        let created = push.created.ok_or(ClassifyError::MissingField("created"))?;
        let head_commit = push
            .head_commit
            .ok_or(ClassifyError::MissingField("head_commit"))?;

        let timestamp = if created {
            // The host sends no creation time for new branches.
            normalizer.now()
        } else {
            let message = head_commit
                .message
                .ok_or(ClassifyError::MissingField("head_commit.message"))?;
            if message.starts_with(MERGE_ECHO_PREFIX) {
                return Ok(Classification::Drop(DropReason::MergeEcho));
            }
            let raw = head_commit
                .timestamp
                .ok_or(ClassifyError::MissingField("head_commit.timestamp"))?;
            normalize_field(normalizer, "head_commit.timestamp", &raw)?
        };

        let author = head_commit
            .author
            .and_then(|author| author.username)
            .ok_or(ClassifyError::MissingField("head_commit.author.username"))?;
        let request_id = push.after.ok_or(ClassifyError::MissingField("after"))?;
        let branch_ref = push.branch_ref.ok_or(ClassifyError::MissingField("ref"))?;

        Ok(Classification::Record(ActivityRecord::push(
            request_id,
            author,
            strip_branch_prefix(&branch_ref),
            timestamp,
        )))
    }

    fn classify_pull_request(
        payload: &Value,
        normalizer: &TimestampNormalizer,
    ) -> Result<Classification, ClassifyError> {
        let action = payload
            .get("action")
            .and_then(Value::as_str)
            .ok_or(ClassifyError::MissingField("action"))?;
        match action {
            "opened" => {
                let pull = PullRequestPayload::from_value(payload)?;
                let author = pull
                    .user
                    .ok_or(ClassifyError::MissingField("pull_request.user.login"))?
                    .login;
                let raw = pull
                    .created_at
                    .ok_or(ClassifyError::MissingField("pull_request.created_at"))?;
                let timestamp = normalize_field(normalizer, "pull_request.created_at", &raw)?;

                Ok(Classification::Record(ActivityRecord::pull_request(
                    pull.id.to_string(),
                    author,
                    pull.head.branch_ref,
                    pull.base.branch_ref,
                    timestamp,
                )))
            }
            "closed" => {
                // Closed-without-merge is not distinguished here: such a pull
                // request has no `merged_by` and fails below.
                let pull = PullRequestPayload::from_value(payload)?;
                let merger = pull
                    .merged_by
                    .ok_or(ClassifyError::MissingField("pull_request.merged_by"))?
                    .login;
                let raw = pull
                    .merged_at
                    .ok_or(ClassifyError::MissingField("pull_request.merged_at"))?;
                let timestamp = normalize_field(normalizer, "pull_request.merged_at", &raw)?;

                Ok(Classification::Record(ActivityRecord::merge(
                    pull.id.to_string(),
                    merger,
                    pull.head.branch_ref,
                    pull.base.branch_ref,
                    timestamp,
                )))
            }
            other => Ok(Classification::Drop(DropReason::UnsupportedAction(other.to_string()))),
        }
    }
}

fn normalize_field(
    normalizer: &TimestampNormalizer,
    field: &'static str,
    raw: &str,
) -> Result<String, ClassifyError> {
    normalizer
        .normalize(raw)
        .map_err(|source| ClassifyError::Timestamp { field, source })
}

fn strip_branch_prefix(branch_ref: &str) -> String {
    branch_ref.replace(BRANCH_REF_PREFIX, "")
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(default)]
    after: Option<String>,
    #[serde(rename = "ref", default)]
    branch_ref: Option<String>,
    #[serde(default)]
    created: Option<bool>,
    #[serde(default)]
    head_commit: Option<HeadCommit>,
}

#[derive(Debug, Deserialize)]
struct HeadCommit {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullRequestEnvelope {
    #[serde(default)]
    pull_request: Option<PullRequestPayload>,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    id: u64,
    #[serde(default)]
    user: Option<GitUser>,
    #[serde(default)]
    merged_by: Option<GitUser>,
    head: BranchPointer,
    base: BranchPointer,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    merged_at: Option<String>,
}

impl PullRequestPayload {
    fn from_value(payload: &Value) -> Result<Self, ClassifyError> {
        let envelope = PullRequestEnvelope::deserialize(payload)?;
        envelope
            .pull_request
            .ok_or(ClassifyError::MissingField("pull_request"))
    }
}

#[derive(Debug, Deserialize)]
struct GitUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct BranchPointer {
    #[serde(rename = "ref")]
    branch_ref: String,
}
