//! Moderation decision engine.
//!
//! The decision algorithm itself lives elsewhere (an image classifier, a
//! review queue); this module only fixes the seam the pipeline calls through.

use async_trait::async_trait;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{entity::EntityType, moderation::ModerationDecision};

#[derive(Debug, Error)]
pub enum ModerationError {
    /// Raised by engines backed by a remote classifier.
    #[cfg_attr(not(test), allow(dead_code))]
    #[error("moderation backend failed: {0}")]
    Backend(String),
}

/// Decides whether an uploaded payload may be stored.
///
/// `PendingReview` is for "could not decide right now"; callers surface it
/// as retry-later and nothing is kept.
#[async_trait]
pub trait ModerationEngine: Send + Sync {
    async fn decide(
        &self,
        owner_user_id: Uuid,
        entity_type: EntityType,
        bytes: &[u8],
    ) -> Result<ModerationDecision, ModerationError>;
}

/// Engine that answers every request with the same decision.
#[derive(Clone, Debug)]
pub struct StaticModeration {
    decision: ModerationDecision,
}

impl StaticModeration {
    pub fn new(decision: ModerationDecision) -> Self {
        Self { decision }
    }
}

#[async_trait]
impl ModerationEngine for StaticModeration {
    async fn decide(
        &self,
        owner_user_id: Uuid,
        entity_type: EntityType,
        bytes: &[u8],
    ) -> Result<ModerationDecision, ModerationError> {
        tracing::debug!(
            %owner_user_id,
            %entity_type,
            size = bytes.len(),
            status = ?self.decision.status,
            "static moderation decision"
        );
        Ok(self.decision.clone())
    }
}

/// Selects the built-in engine from configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModerationMode {
    Approve,
    Reject,
    Review,
}

impl ModerationMode {
    pub fn engine(self) -> StaticModeration {
        let decision = match self {
            ModerationMode::Approve => ModerationDecision::approved(),
            ModerationMode::Reject => {
                ModerationDecision::rejected("uploads are currently not accepted")
            }
            ModerationMode::Review => {
                ModerationDecision::pending_review("moderation service unavailable, retry later")
            }
        };
        StaticModeration::new(decision)
    }
}

impl FromStr for ModerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "approve" => Ok(ModerationMode::Approve),
            "reject" => Ok(ModerationMode::Reject),
            "review" => Ok(ModerationMode::Review),
            other => Err(format!(
                "unknown moderation mode `{}` (expected approve, reject or review)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::moderation::ModerationStatus;

    #[tokio::test]
    async fn modes_map_to_fixed_decisions() {
        let owner = Uuid::new_v4();
        let approve = ModerationMode::Approve.engine();
        let reject = "reject".parse::<ModerationMode>().unwrap().engine();
        let review = "REVIEW".parse::<ModerationMode>().unwrap().engine();

        let d = approve.decide(owner, EntityType::Avatar, b"x").await.unwrap();
        assert!(d.is_approved());
        assert!(d.reason.is_none());

        let d = reject.decide(owner, EntityType::Gear, b"x").await.unwrap();
        assert_eq!(d.status, ModerationStatus::Rejected);
        assert!(d.reason.is_some());

        let d = review.decide(owner, EntityType::Build, b"x").await.unwrap();
        assert_eq!(d.status, ModerationStatus::PendingReview);
        assert!(d.reason.is_some());
    }

    #[test]
    fn unknown_mode_is_an_error() {
        assert!("maybe".parse::<ModerationMode>().is_err());
    }
}
