//! Background removal of expired and consumed pending uploads.
//!
//! Redemption already treats expired records as absent; this only reclaims
//! storage.

use chrono::Utc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::pending_store::PendingStore;

/// Run the sweeper until the task is dropped.
pub async fn run_pending_sweeper(pending: PendingStore, every: Duration) {
    info!(interval_secs = every.as_secs(), "Starting pending upload sweeper");

    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_once(&pending).await;
    }
}

async fn sweep_once(pending: &PendingStore) -> u64 {
    match pending.sweep(Utc::now()).await {
        Ok(0) => 0,
        Ok(removed) => {
            debug!(removed, "swept pending uploads");
            removed
        }
        Err(e) => {
            error!(error = %e, "Pending upload sweep failed");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{asset::ImageType, entity::EntityType, moderation::ModerationDecision},
        test_support::{png_bytes, test_pool},
    };
    use uuid::Uuid;

    #[tokio::test]
    async fn sweeps_records_that_can_no_longer_be_redeemed() {
        let db = test_pool().await;
        let expired = PendingStore::new(db.clone(), chrono::Duration::seconds(-1));
        let live = PendingStore::new(db, chrono::Duration::minutes(15));
        let owner = Uuid::new_v4();
        let approved = ModerationDecision::approved();

        expired
            .create(owner, EntityType::Avatar, ImageType::Png, &png_bytes(64), &approved)
            .await
            .unwrap();
        let kept = live
            .create(owner, EntityType::Avatar, ImageType::Png, &png_bytes(64), &approved)
            .await
            .unwrap();

        assert_eq!(sweep_once(&live).await, 1);
        assert_eq!(sweep_once(&live).await, 0);
        assert!(live.peek(&kept.token).await.is_ok());
    }

    #[tokio::test]
    async fn loop_runs_in_background() {
        let db = test_pool().await;
        let expired = PendingStore::new(db.clone(), chrono::Duration::seconds(-1));
        let token = expired
            .create(
                Uuid::new_v4(),
                EntityType::Build,
                ImageType::Png,
                &png_bytes(64),
                &ModerationDecision::approved(),
            )
            .await
            .unwrap()
            .token;

        let handle = tokio::spawn(run_pending_sweeper(expired, Duration::from_millis(20)));
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pending_uploads WHERE token = ?")
                .bind(&token)
                .fetch_one(&*db)
                .await
                .unwrap();
        assert_eq!(remaining, 0);
    }
}
