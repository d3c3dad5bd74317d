//! The outcome of a moderation check.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum ModerationStatus {
    Approved,
    Rejected,
    PendingReview,
}

/// Status plus a human-readable reason. The reason is always present when
/// the status is not `Approved`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ModerationDecision {
    pub status: ModerationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ModerationDecision {
    pub fn approved() -> Self {
        Self {
            status: ModerationStatus::Approved,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: ModerationStatus::Rejected,
            reason: Some(reason.into()),
        }
    }

    pub fn pending_review(reason: impl Into<String>) -> Self {
        Self {
            status: ModerationStatus::PendingReview,
            reason: Some(reason.into()),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == ModerationStatus::Approved
    }

    /// Reason shown to the end user; falls back to a generic text if an engine
    /// returned a non-approval without one.
    pub fn reason_or_default(&self) -> String {
        self.reason.clone().unwrap_or_else(|| match self.status {
            ModerationStatus::Approved => "approved".into(),
            ModerationStatus::Rejected => "image was rejected by moderation".into(),
            ModerationStatus::PendingReview => "moderation is unavailable, retry later".into(),
        })
    }
}
