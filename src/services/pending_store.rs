//! PendingStore: moderated uploads parked behind single-use, expiring tokens.
//!
//! Redemption is a single conditional `UPDATE ... RETURNING` keyed on
//! `consumed = 0`, so concurrent redeemers of one token race inside SQLite
//! and exactly one of them gets the row back.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    asset::ImageType,
    entity::EntityType,
    moderation::{ModerationDecision, ModerationStatus},
    pending::{PendingUpload, RedeemedUpload},
};

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum PendingError {
    /// Unknown, expired, or already consumed. Deliberately one variant.
    #[error("upload token not found")]
    NotFound,
    #[error("pending upload was not approved by moderation")]
    NotApproved,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type PendingResult<T> = Result<T, PendingError>;

#[derive(Clone)]
pub struct PendingStore {
    db: Arc<SqlitePool>,
    ttl: Duration,
}

impl PendingStore {
    pub fn new(db: Arc<SqlitePool>, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    /// Park approved bytes and return the stored record, token included.
    pub async fn create(
        &self,
        owner_user_id: Uuid,
        entity_type: EntityType,
        content_type: ImageType,
        bytes: &[u8],
        decision: &ModerationDecision,
    ) -> PendingResult<PendingUpload> {
        if !decision.is_approved() {
            return Err(PendingError::NotApproved);
        }

        let token = generate_token();
        let created_at = Utc::now();
        let expires_at = created_at + self.ttl;

        let record = sqlx::query_as::<_, PendingUpload>(
            r#"
            INSERT INTO pending_uploads (
                token, owner_user_id, entity_type, content_type, bytes,
                decision_status, decision_reason, created_at, expires_at, consumed
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            RETURNING token, owner_user_id, entity_type, content_type,
                      length(bytes) AS size_bytes, decision_status, decision_reason,
                      created_at, expires_at, consumed
            "#,
        )
        .bind(&token)
        .bind(owner_user_id)
        .bind(entity_type)
        .bind(content_type)
        .bind(bytes)
        .bind(decision.status)
        .bind(decision.reason.clone())
        .bind(created_at)
        .bind(expires_at)
        .fetch_one(&*self.db)
        .await?;

        debug!(%owner_user_id, %entity_type, size = bytes.len(), %expires_at, "pending upload stored");
        Ok(record)
    }

    /// Read a live record without consuming it.
    ///
    /// Expired and consumed records answer `NotFound`, same as unknown ones.
    pub async fn peek(&self, token: &str) -> PendingResult<PendingUpload> {
        sqlx::query_as::<_, PendingUpload>(
            "SELECT token, owner_user_id, entity_type, content_type,
                    length(bytes) AS size_bytes, decision_status, decision_reason,
                    created_at, expires_at, consumed
             FROM pending_uploads
             WHERE token = ? AND consumed = 0 AND expires_at > ?",
        )
        .bind(token)
        .bind(Utc::now())
        .fetch_optional(&*self.db)
        .await?
        .ok_or(PendingError::NotFound)
    }

    /// Consume `token` and hand back its bytes.
    ///
    /// Owner identity is not checked here; some redemption paths are an
    /// administrator acting on another user's upload.
    pub async fn redeem(&self, token: &str, redeemer: Uuid) -> PendingResult<RedeemedUpload> {
        self.redeem_at(token, redeemer, Utc::now()).await
    }

    pub(crate) async fn redeem_at(
        &self,
        token: &str,
        redeemer: Uuid,
        now: DateTime<Utc>,
    ) -> PendingResult<RedeemedUpload> {
        let row = sqlx::query_as::<_, (Uuid, EntityType, ImageType, Vec<u8>, ModerationStatus)>(
            r#"
            UPDATE pending_uploads SET consumed = 1
            WHERE token = ? AND consumed = 0 AND expires_at > ?
            RETURNING owner_user_id, entity_type, content_type, bytes, decision_status
            "#,
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&*self.db)
        .await?;

        let Some((owner_user_id, entity_type, content_type, bytes, status)) = row else {
            debug!(%redeemer, "pending upload redemption missed");
            return Err(PendingError::NotFound);
        };

        if status != ModerationStatus::Approved {
            return Err(PendingError::NotApproved);
        }

        debug!(%redeemer, %owner_user_id, %entity_type, "pending upload redeemed");
        Ok(RedeemedUpload {
            owner_user_id,
            content_type,
            bytes,
        })
    }

    /// Physically remove expired and consumed records. Returns rows removed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> PendingResult<u64> {
        let result =
            sqlx::query("DELETE FROM pending_uploads WHERE expires_at <= ? OR consumed = 1")
                .bind(now)
                .execute(&*self.db)
                .await?;
        Ok(result.rows_affected())
    }
}

/// 32 bytes from the thread-local CSPRNG, base64url without padding.
fn generate_token() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{png_bytes, test_pool};

    async fn store() -> PendingStore {
        PendingStore::new(test_pool().await, Duration::minutes(15))
    }

    #[tokio::test]
    async fn create_then_redeem_returns_bytes_once() {
        let store = store().await;
        let owner = Uuid::new_v4();
        let bytes = png_bytes(512);
        let pending = store
            .create(owner, EntityType::Gear, ImageType::Png, &bytes, &ModerationDecision::approved())
            .await
            .unwrap();
        assert!(!pending.consumed);
        assert!(pending.expires_at > pending.created_at);
        assert_eq!(pending.size_bytes, 512);
        assert_eq!(store.peek(&pending.token).await.unwrap().size_bytes, 512);

        let redeemed = store.redeem(&pending.token, owner).await.unwrap();
        assert_eq!(redeemed.bytes, bytes);
        assert_eq!(redeemed.content_type, ImageType::Png);
        assert_eq!(redeemed.owner_user_id, owner);

        let again = store.redeem(&pending.token, owner).await;
        assert!(matches!(again, Err(PendingError::NotFound)));
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let store = store().await;
        let res = store.redeem("does-not-exist", Uuid::new_v4()).await;
        assert!(matches!(res, Err(PendingError::NotFound)));
        assert!(matches!(store.peek("does-not-exist").await, Err(PendingError::NotFound)));
    }

    #[tokio::test]
    async fn refuses_to_park_unapproved_bytes() {
        let store = store().await;
        let res = store
            .create(
                Uuid::new_v4(),
                EntityType::Avatar,
                ImageType::Png,
                &png_bytes(64),
                &ModerationDecision::rejected("nope"),
            )
            .await;
        assert!(matches!(res, Err(PendingError::NotApproved)));
    }

    #[tokio::test]
    async fn expired_token_is_not_found_before_sweep() {
        let store = store().await;
        let owner = Uuid::new_v4();
        let pending = store
            .create(owner, EntityType::Build, ImageType::Png, &png_bytes(64), &ModerationDecision::approved())
            .await
            .unwrap();

        let later = pending.expires_at + Duration::seconds(1);
        let res = store.redeem_at(&pending.token, owner, later).await;
        assert!(matches!(res, Err(PendingError::NotFound)));

        // Still physically present and unconsumed; the sweeper removes it.
        let (consumed,): (bool,) =
            sqlx::query_as("SELECT consumed FROM pending_uploads WHERE token = ?")
                .bind(&pending.token)
                .fetch_one(&*store.db)
                .await
                .unwrap();
        assert!(!consumed);
        assert_eq!(store.sweep(later).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_redemptions_have_one_winner() {
        let store = store().await;
        let owner = Uuid::new_v4();
        let pending = store
            .create(owner, EntityType::Gear, ImageType::Png, &png_bytes(64), &ModerationDecision::approved())
            .await
            .unwrap();

        let attempts = (0..16).map(|_| {
            let store = store.clone();
            let token = pending.token.clone();
            tokio::spawn(async move { store.redeem(&token, Uuid::new_v4()).await })
        });
        let results = futures::future::join_all(attempts).await;

        let winners = results
            .iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();
        let losers = results
            .iter()
            .filter(|r| matches!(r, Ok(Err(PendingError::NotFound))))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(losers, 15);
    }

    #[tokio::test]
    async fn sweep_removes_consumed_and_keeps_live() {
        let store = store().await;
        let owner = Uuid::new_v4();
        let approved = ModerationDecision::approved();
        let live = store
            .create(owner, EntityType::Other, ImageType::Png, &png_bytes(64), &approved)
            .await
            .unwrap();
        let used = store
            .create(owner, EntityType::Other, ImageType::Png, &png_bytes(64), &approved)
            .await
            .unwrap();
        store.redeem(&used.token, owner).await.unwrap();

        assert_eq!(store.sweep(Utc::now()).await.unwrap(), 1);
        assert_eq!(store.peek(&live.token).await.unwrap().owner_user_id, owner);
    }

    #[test]
    fn tokens_are_unique_and_opaque() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
