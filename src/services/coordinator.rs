//! Attach/replace coordinator.
//!
//! Two ways in:
//! - inline: `upload_and_attach` sniffs, moderates and binds in one call;
//! - deferred: `upload_pending` sniffs, moderates and parks the bytes behind
//!   a token, and `attach_from_token` later redeems and binds them, possibly
//!   as a different actor.
//!
//! Binding is create-then-point-then-compensate. The slot update is the
//! commit point: if it fails and the slot does not hold the new asset, the
//! new asset is deleted. The previous asset is only deleted after the slot
//! points at the new one.

use std::{future::Future, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::UploadLimits,
    extractors::caller::Caller,
    models::{
        asset::{ImageAsset, ImageType},
        entity::{EntityRef, EntityType},
        moderation::{ModerationDecision, ModerationStatus},
        pending::PendingUpload,
    },
    services::{
        asset_store::{AssetError, AssetResult, AssetStore, NewAsset},
        moderation::{ModerationEngine, ModerationError},
        pending_store::{PendingError, PendingStore},
        sniffer,
        slots::{EntitySlot, ImageSlots, SlotError},
    },
};

/// Every outcome a caller of the coordinator can see besides success.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("image exceeds the {max_bytes} byte limit")]
    TooLarge { max_bytes: usize },
    #[error("unsupported image type")]
    UnsupportedType,
    #[error("image rejected: {0}")]
    Rejected(String),
    #[error("image pending review: {0}")]
    PendingReview(String),
    #[error("upload token is invalid or expired")]
    TokenInvalidOrExpired,
    #[error("entity `{0}` not found")]
    EntityNotFound(EntityRef),
    #[error("entity `{0}` is already registered")]
    AlreadyRegistered(EntityRef),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("internal failure: {0}")]
    Internal(String),
}

impl From<SlotError> for AttachError {
    fn from(err: SlotError) -> Self {
        match err {
            SlotError::EntityNotFound(entity) => AttachError::EntityNotFound(entity),
            SlotError::AlreadyRegistered(entity) => AttachError::AlreadyRegistered(entity),
            other => AttachError::Internal(other.to_string()),
        }
    }
}

impl From<PendingError> for AttachError {
    fn from(err: PendingError) -> Self {
        match err {
            PendingError::NotFound => AttachError::TokenInvalidOrExpired,
            other => AttachError::Internal(other.to_string()),
        }
    }
}

impl From<AssetError> for AttachError {
    fn from(err: AssetError) -> Self {
        AttachError::Internal(err.to_string())
    }
}

impl From<ModerationError> for AttachError {
    fn from(err: ModerationError) -> Self {
        AttachError::Internal(err.to_string())
    }
}

/// Result of a successful bind.
#[derive(Debug, Clone)]
pub struct Attached {
    pub asset: ImageAsset,
    /// Asset the new one superseded, already scheduled for deletion.
    pub replaced: Option<Uuid>,
}

/// Result of moderating an upload for the deferred flow.
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    Approved(PendingUpload),
    NotApproved(ModerationDecision),
}

#[derive(Clone)]
pub struct Coordinator {
    assets: AssetStore,
    pending: PendingStore,
    slots: Arc<dyn ImageSlots>,
    moderation: Arc<dyn ModerationEngine>,
    limits: UploadLimits,
    timeout: Duration,
}

impl Coordinator {
    pub fn new(
        assets: AssetStore,
        pending: PendingStore,
        slots: Arc<dyn ImageSlots>,
        moderation: Arc<dyn ModerationEngine>,
        limits: UploadLimits,
        timeout: Duration,
    ) -> Self {
        Self {
            assets,
            pending,
            slots,
            moderation,
            limits,
            timeout,
        }
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    /// Moderate `bytes` and park them behind a fresh upload token.
    ///
    /// Rejection and pending review are returned as `NotApproved`, not as
    /// errors; nothing is stored for them.
    pub async fn upload_pending(
        &self,
        caller: Caller,
        entity_type: EntityType,
        bytes: &[u8],
        claimed_type: Option<&str>,
    ) -> Result<UploadOutcome, AttachError> {
        let content_type = self.screen(entity_type, bytes, claimed_type)?;
        let decision = self.decide(caller.user_id, entity_type, bytes).await?;
        if !decision.is_approved() {
            info!(owner = %caller.user_id, %entity_type, status = ?decision.status, "upload not approved");
            return Ok(UploadOutcome::NotApproved(decision));
        }

        let pending = self
            .bounded(
                "pending upload create",
                self.pending
                    .create(caller.user_id, entity_type, content_type, bytes, &decision),
            )
            .await??;
        info!(owner = %caller.user_id, %entity_type, %content_type, "upload parked for attachment");
        Ok(UploadOutcome::Approved(pending))
    }

    /// Inline flow: size check, sniff, moderate, then bind to `entity`.
    pub async fn upload_and_attach(
        &self,
        caller: Caller,
        entity: &EntityRef,
        bytes: &[u8],
        claimed_type: Option<&str>,
    ) -> Result<Attached, AttachError> {
        let content_type = self.screen(entity.entity_type, bytes, claimed_type)?;
        self.authorize_entity(caller, entity).await?;

        let decision = self.decide(caller.user_id, entity.entity_type, bytes).await?;
        match decision.status {
            ModerationStatus::Approved => {}
            ModerationStatus::Rejected => {
                info!(owner = %caller.user_id, %entity, "inline upload rejected");
                return Err(AttachError::Rejected(decision.reason_or_default()));
            }
            ModerationStatus::PendingReview => {
                info!(owner = %caller.user_id, %entity, "inline upload pending review");
                return Err(AttachError::PendingReview(decision.reason_or_default()));
            }
        }

        self.bind(entity, caller.user_id, content_type, bytes, None)
            .await
    }

    /// Deferred flow: redeem `token` and bind its bytes to `entity`.
    ///
    /// Policy: the caller must own the upload and the entity, unless they are
    /// an administrator. Ownership is read before redemption so a refused
    /// attempt leaves the token usable.
    pub async fn attach_from_token(
        &self,
        caller: Caller,
        entity: &EntityRef,
        token: &str,
    ) -> Result<Attached, AttachError> {
        let parked = self.bounded("pending upload lookup", self.pending.peek(token)).await??;
        if !caller.may_act_for(parked.owner_user_id) {
            return Err(AttachError::Forbidden("upload belongs to another user"));
        }
        self.authorize_entity(caller, entity).await?;

        // The bytes may have been moderated for a different entity type.
        // Input errors are caught here, before the token is spent.
        if !entity.entity_type.allowed_types().contains(&parked.content_type) {
            return Err(AttachError::UnsupportedType);
        }
        let max_bytes = self.limits.max_bytes(entity.entity_type);
        if parked.size_bytes > max_bytes as i64 {
            return Err(AttachError::TooLarge { max_bytes });
        }

        let redeemed = self
            .bounded(
                "pending upload redeem",
                self.pending.redeem(token, caller.user_id),
            )
            .await??;

        if sniffer::sniff(&redeemed.bytes) != Some(redeemed.content_type) {
            warn!(%entity, stored = %redeemed.content_type, "redeemed bytes failed re-sniff");
            return Err(AttachError::UnsupportedType);
        }

        let curated_by = (redeemed.owner_user_id != caller.user_id).then_some(caller.user_id);
        self.bind(
            entity,
            redeemed.owner_user_id,
            redeemed.content_type,
            &redeemed.bytes,
            curated_by,
        )
        .await
    }

    /// Empty the entity's slot and delete the asset it held.
    pub async fn clear_image(
        &self,
        caller: Caller,
        entity: &EntityRef,
    ) -> Result<Option<Uuid>, AttachError> {
        self.authorize_entity(caller, entity).await?;
        let previous = self.bounded("slot clear", self.slots.clear(entity)).await??;
        if let Some(asset_id) = previous {
            self.delete_best_effort(asset_id, "cleared").await;
            info!(%entity, %asset_id, "image slot cleared");
        }
        Ok(previous)
    }

    /// Asset currently bound to `entity`, if any.
    pub async fn current_asset(&self, entity: &EntityRef) -> Result<Option<Uuid>, AttachError> {
        let slot = self.bounded("slot lookup", self.slots.lookup(entity)).await??;
        Ok(slot.asset_id)
    }

    /// Make an entity known to the slot store.
    ///
    /// Callers register entities for themselves; administrators may name
    /// another owner and are the only ones who may register catalog entities.
    pub async fn register_entity(
        &self,
        caller: Caller,
        entity: &EntityRef,
        owner: Option<Uuid>,
    ) -> Result<EntitySlot, AttachError> {
        let owner = owner.unwrap_or(caller.user_id);
        if !caller.may_act_for(owner) {
            return Err(AttachError::Forbidden("cannot register entities for another user"));
        }
        if entity.entity_type.is_curated() && !caller.is_admin {
            return Err(AttachError::Forbidden("catalog entities are managed by administrators"));
        }
        let slot = self
            .bounded("entity register", self.slots.register(entity, owner))
            .await??;
        Ok(slot)
    }

    /// Size ceiling then sniffing; both run before anything costly.
    fn screen(
        &self,
        entity_type: EntityType,
        bytes: &[u8],
        claimed_type: Option<&str>,
    ) -> Result<ImageType, AttachError> {
        let max_bytes = self.limits.max_bytes(entity_type);
        if bytes.len() > max_bytes {
            debug!(%entity_type, size = bytes.len(), max_bytes, "upload too large");
            return Err(AttachError::TooLarge { max_bytes });
        }

        let Some(content_type) = sniffer::sniff(bytes) else {
            debug!(
                %entity_type,
                claimed = claimed_type.unwrap_or("-"),
                detected = sniffer::detect(bytes).unwrap_or("-"),
                "upload failed sniffing"
            );
            return Err(AttachError::UnsupportedType);
        };
        if !entity_type.allowed_types().contains(&content_type) {
            return Err(AttachError::UnsupportedType);
        }
        if let Some(claimed) = claimed_type {
            if !claimed.eq_ignore_ascii_case(content_type.mime()) {
                debug!(claimed, sniffed = %content_type, "ignoring client-declared content type");
            }
        }
        Ok(content_type)
    }

    async fn decide(
        &self,
        owner: Uuid,
        entity_type: EntityType,
        bytes: &[u8],
    ) -> Result<ModerationDecision, AttachError> {
        let decision = self
            .bounded(
                "moderation",
                self.moderation.decide(owner, entity_type, bytes),
            )
            .await??;
        Ok(decision)
    }

    /// Entity must exist; callers act on their own entities unless admin, and
    /// catalog entities are admin-only.
    async fn authorize_entity(&self, caller: Caller, entity: &EntityRef) -> Result<(), AttachError> {
        let slot = self.bounded("slot lookup", self.slots.lookup(entity)).await??;
        if entity.entity_type.is_curated() && !caller.is_admin {
            return Err(AttachError::Forbidden("catalog images are curated by administrators"));
        }
        if !caller.may_act_for(slot.owner_user_id) {
            return Err(AttachError::Forbidden("entity belongs to another user"));
        }
        Ok(())
    }

    /// Create the asset, point the slot at it, then retire the previous one.
    async fn bind(
        &self,
        entity: &EntityRef,
        owner: Uuid,
        content_type: ImageType,
        bytes: &[u8],
        curated_by: Option<Uuid>,
    ) -> Result<Attached, AttachError> {
        let previous = self
            .bounded("slot lookup", self.slots.lookup(entity))
            .await??
            .asset_id;

        let asset_id = Uuid::new_v4();
        let mut creating = self.spawn_create(asset_id, entity, owner, content_type, bytes, curated_by);
        let asset = match tokio::time::timeout(self.timeout, &mut creating).await {
            Ok(Ok(Ok(asset))) => asset,
            Ok(Ok(Err(err))) => {
                self.compensate(asset_id, entity).await;
                return Err(err.into());
            }
            Ok(Err(join_err)) => {
                self.compensate(asset_id, entity).await;
                return Err(AttachError::Internal(format!("asset create task failed: {}", join_err)));
            }
            Err(_) => {
                error!(%entity, %asset_id, timeout_ms = self.timeout.as_millis() as u64, "asset create timed out");
                self.reap_abandoned_create(asset_id, entity.clone(), creating);
                return Err(AttachError::Internal("asset create timed out".into()));
            }
        };

        let pointed = self
            .bounded("slot update", self.slots.set(entity, asset.id))
            .await
            .and_then(|res| res.map_err(AttachError::from));
        if let Err(err) = pointed {
            // A write can commit even though its reply failed or arrived late.
            let current = self
                .bounded("slot recheck", self.slots.lookup(entity))
                .await
                .and_then(|res| res.map_err(AttachError::from));
            match current {
                Ok(slot) if slot.asset_id == Some(asset.id) => {
                    warn!(%entity, asset_id = %asset.id, error = %err, "slot update reported failure but committed");
                }
                Ok(_) => {
                    self.compensate(asset.id, entity).await;
                    return Err(err);
                }
                Err(recheck) => {
                    error!(
                        %entity,
                        asset_id = %asset.id,
                        error = %err,
                        recheck = %recheck,
                        "slot state unknown after failed update, new asset kept"
                    );
                    return Err(err);
                }
            }
        }

        let replaced = previous.filter(|prev| *prev != asset.id);
        if let Some(prev) = replaced {
            self.delete_best_effort(prev, "superseded").await;
        }

        info!(
            %entity,
            asset_id = %asset.id,
            owner = %owner,
            curated_by = ?curated_by,
            replaced = ?replaced,
            "image attached"
        );
        Ok(Attached { asset, replaced })
    }

    /// Write the asset on its own task so a caller deadline cannot cut the
    /// write short and leave a half-written payload behind.
    fn spawn_create(
        &self,
        asset_id: Uuid,
        entity: &EntityRef,
        owner: Uuid,
        content_type: ImageType,
        bytes: &[u8],
        curated_by: Option<Uuid>,
    ) -> JoinHandle<AssetResult<ImageAsset>> {
        let assets = self.assets.clone();
        let entity = entity.clone();
        let bytes = bytes.to_vec();
        tokio::spawn(async move {
            assets
                .create(NewAsset {
                    id: asset_id,
                    owner_user_id: owner,
                    entity: &entity,
                    content_type,
                    bytes: &bytes,
                    curated_by_user_id: curated_by,
                })
                .await
        })
    }

    /// Wait out a create the caller gave up on, then delete whatever it wrote.
    /// The slot never saw this asset.
    fn reap_abandoned_create(
        &self,
        asset_id: Uuid,
        entity: EntityRef,
        creating: JoinHandle<AssetResult<ImageAsset>>,
    ) -> JoinHandle<()> {
        let assets = self.assets.clone();
        tokio::spawn(async move {
            let _ = creating.await;
            match assets.delete(asset_id).await {
                Ok(_) => warn!(%entity, %asset_id, "abandoned asset create cleaned up"),
                Err(err) => error!(
                    %entity,
                    %asset_id,
                    error = %err,
                    "abandoned asset create could not be cleaned up"
                ),
            }
        })
    }

    /// Delete an asset that never became reachable from its slot.
    async fn compensate(&self, asset_id: Uuid, entity: &EntityRef) {
        let removed = self
            .bounded("asset compensate", self.assets.delete(asset_id))
            .await
            .and_then(|res| res.map_err(AttachError::from));
        match removed {
            Ok(_) => warn!(%entity, %asset_id, "bind failed, new asset removed"),
            Err(err) => error!(
                %entity,
                %asset_id,
                error = %err,
                "bind failed and new asset could not be removed"
            ),
        }
    }

    async fn delete_best_effort(&self, asset_id: Uuid, why: &'static str) {
        let removed = self
            .bounded("asset delete", self.assets.delete(asset_id))
            .await
            .and_then(|res| res.map_err(AttachError::from));
        match removed {
            Ok(true) => debug!(%asset_id, why, "asset deleted"),
            Ok(false) => debug!(%asset_id, why, "asset already gone"),
            Err(err) => warn!(%asset_id, why, error = %err, "failed to delete asset"),
        }
    }

    /// Run `fut` under the operation deadline.
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, AttachError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            error!(operation, timeout_ms = self.timeout.as_millis() as u64, "operation timed out");
            AttachError::Internal(format!("{} timed out", operation))
        })
    }
}
