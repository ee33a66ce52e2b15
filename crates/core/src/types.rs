use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of repository activity captured by an [`ActivityRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityAction {
    Push,
    PullRequest,
    Merge,
}

impl ActivityAction {
    /// Returns the canonical representation used in storage and on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "PUSH",
            Self::PullRequest => "PULL_REQUEST",
            Self::Merge => "MERGE",
        }
    }

    /// Returns `true` when records of this kind carry a source branch.
    pub fn has_source_branch(self) -> bool {
        !matches!(self, Self::Push)
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityAction {
    type Err = RecordError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PUSH" => Ok(Self::Push),
            "PULL_REQUEST" => Ok(Self::PullRequest),
            "MERGE" => Ok(Self::Merge),
            other => Err(RecordError::UnknownAction(other.to_string())),
        }
    }
}

/// Canonical, immutable summary of one relevant repository event.
///
/// Records built by the classifier go through [`ActivityRecord::push`],
/// [`ActivityRecord::pull_request`] or [`ActivityRecord::merge`], which keep
/// `from_branch` present exactly when `action` is not [`ActivityAction::Push`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub request_id: String,
    pub author: String,
    pub action: ActivityAction,
    pub from_branch: Option<String>,
    pub to_branch: String,
    pub timestamp: String,
}

impl ActivityRecord {
    pub fn push(
        request_id: impl Into<String>,
        author: impl Into<String>,
        to_branch: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            author: author.into(),
            action: ActivityAction::Push,
            from_branch: None,
            to_branch: to_branch.into(),
            timestamp: timestamp.into(),
        }
    }

    pub fn pull_request(
        request_id: impl Into<String>,
        author: impl Into<String>,
        from_branch: impl Into<String>,
        to_branch: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            author: author.into(),
            action: ActivityAction::PullRequest,
            from_branch: Some(from_branch.into()),
            to_branch: to_branch.into(),
            timestamp: timestamp.into(),
        }
    }

    /// `author` is the user who performed the merge, not the pull-request author.
    pub fn merge(
        request_id: impl Into<String>,
        author: impl Into<String>,
        from_branch: impl Into<String>,
        to_branch: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            author: author.into(),
            action: ActivityAction::Merge,
            from_branch: Some(from_branch.into()),
            to_branch: to_branch.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Checks the shape invariants of a record that did not come from one of
    /// the constructors, e.g. a row read back from storage.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.action.has_source_branch() != self.from_branch.is_some() {
            return Err(RecordError::BranchShape(self.action));
        }
        if !self.timestamp.ends_with('Z') {
            return Err(RecordError::TimestampNotUtc(self.timestamp.clone()));
        }
        Ok(())
    }
}

/// A record together with the identifier assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredActivity {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub record: ActivityRecord,
}

/// Errors raised when an [`ActivityRecord`] violates its shape invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("unknown activity action: {0}")]
    UnknownAction(String),
    #[error("from_branch must be present exactly when action is not PUSH (action {0})")]
    BranchShape(ActivityAction),
    #[error("timestamp is not normalized UTC: {0}")]
    TimestampNotUtc(String),
}
