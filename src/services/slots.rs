//! Entity image slots.
//!
//! Domain entities (users, aircraft, builds, gear rows) are owned by other
//! stores; the pipeline only needs to read and re-point their single image
//! slot. `SqliteImageSlots` backs that with the `entity_images` table.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::entity::EntityRef;

#[derive(Debug, Error)]
pub enum SlotError {
    #[error("entity `{0}` not found")]
    EntityNotFound(EntityRef),
    #[error("entity `{0}` is already registered to another owner")]
    AlreadyRegistered(EntityRef),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type SlotResult<T> = Result<T, SlotError>;

/// Snapshot of one entity's slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntitySlot {
    pub owner_user_id: Uuid,
    pub asset_id: Option<Uuid>,
}

#[async_trait]
pub trait ImageSlots: Send + Sync {
    /// Make `entity` known with `owner_user_id` as its owner. Registering an
    /// existing entity to the same owner is a no-op.
    async fn register(&self, entity: &EntityRef, owner_user_id: Uuid) -> SlotResult<EntitySlot>;

    async fn lookup(&self, entity: &EntityRef) -> SlotResult<EntitySlot>;

    /// Point the slot at `asset_id`, replacing whatever was there.
    async fn set(&self, entity: &EntityRef, asset_id: Uuid) -> SlotResult<()>;

    /// Empty the slot and return what it held.
    async fn clear(&self, entity: &EntityRef) -> SlotResult<Option<Uuid>>;
}

#[derive(Clone)]
pub struct SqliteImageSlots {
    db: Arc<SqlitePool>,
}

impl SqliteImageSlots {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ImageSlots for SqliteImageSlots {
    async fn register(&self, entity: &EntityRef, owner_user_id: Uuid) -> SlotResult<EntitySlot> {
        sqlx::query(
            "INSERT INTO entity_images (entity_type, entity_id, owner_user_id, asset_id, updated_at)
             VALUES (?, ?, ?, NULL, ?)
             ON CONFLICT(entity_type, entity_id) DO NOTHING",
        )
        .bind(entity.entity_type)
        .bind(&entity.entity_id)
        .bind(owner_user_id)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        let slot = self.lookup(entity).await?;
        if slot.owner_user_id != owner_user_id {
            return Err(SlotError::AlreadyRegistered(entity.clone()));
        }
        Ok(slot)
    }

    async fn lookup(&self, entity: &EntityRef) -> SlotResult<EntitySlot> {
        let row = sqlx::query_as::<_, (Uuid, Option<Uuid>)>(
            "SELECT owner_user_id, asset_id FROM entity_images
             WHERE entity_type = ? AND entity_id = ?",
        )
        .bind(entity.entity_type)
        .bind(&entity.entity_id)
        .fetch_optional(&*self.db)
        .await?;

        row.map(|(owner_user_id, asset_id)| EntitySlot {
            owner_user_id,
            asset_id,
        })
        .ok_or_else(|| SlotError::EntityNotFound(entity.clone()))
    }

    async fn set(&self, entity: &EntityRef, asset_id: Uuid) -> SlotResult<()> {
        let result = sqlx::query(
            "UPDATE entity_images SET asset_id = ?, updated_at = ?
             WHERE entity_type = ? AND entity_id = ?",
        )
        .bind(asset_id)
        .bind(Utc::now())
        .bind(entity.entity_type)
        .bind(&entity.entity_id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SlotError::EntityNotFound(entity.clone()));
        }
        Ok(())
    }

    async fn clear(&self, entity: &EntityRef) -> SlotResult<Option<Uuid>> {
        let mut tx = self.db.begin().await?;
        let previous = sqlx::query_scalar::<_, Option<Uuid>>(
            "SELECT asset_id FROM entity_images WHERE entity_type = ? AND entity_id = ?",
        )
        .bind(entity.entity_type)
        .bind(&entity.entity_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| SlotError::EntityNotFound(entity.clone()))?;

        sqlx::query(
            "UPDATE entity_images SET asset_id = NULL, updated_at = ?
             WHERE entity_type = ? AND entity_id = ?",
        )
        .bind(Utc::now())
        .bind(entity.entity_type)
        .bind(&entity.entity_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::entity::EntityType;
    use crate::test_support::test_pool;

    #[tokio::test]
    async fn register_set_clear() {
        let slots = SqliteImageSlots::new(test_pool().await);
        let entity = EntityRef::new(EntityType::Avatar, "u1");
        let owner = Uuid::new_v4();

        let slot = slots.register(&entity, owner).await.unwrap();
        assert_eq!(slot.asset_id, None);
        // Same owner again is fine.
        slots.register(&entity, owner).await.unwrap();

        let asset = Uuid::new_v4();
        slots.set(&entity, asset).await.unwrap();
        assert_eq!(slots.lookup(&entity).await.unwrap().asset_id, Some(asset));

        assert_eq!(slots.clear(&entity).await.unwrap(), Some(asset));
        assert_eq!(slots.clear(&entity).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_entity() {
        let slots = SqliteImageSlots::new(test_pool().await);
        let entity = EntityRef::new(EntityType::Gear, "missing");
        assert!(matches!(slots.lookup(&entity).await, Err(SlotError::EntityNotFound(_))));
        assert!(matches!(
            slots.set(&entity, Uuid::new_v4()).await,
            Err(SlotError::EntityNotFound(_))
        ));
        assert!(matches!(slots.clear(&entity).await, Err(SlotError::EntityNotFound(_))));
    }

    #[tokio::test]
    async fn register_conflict_with_other_owner() {
        let slots = SqliteImageSlots::new(test_pool().await);
        let entity = EntityRef::new(EntityType::Build, "b1");
        slots.register(&entity, Uuid::new_v4()).await.unwrap();
        let res = slots.register(&entity, Uuid::new_v4()).await;
        assert!(matches!(res, Err(SlotError::AlreadyRegistered(_))));
    }
}
