//! Represents a moderated upload waiting to be attached.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::{asset::ImageType, entity::EntityType, moderation::ModerationStatus};

/// Row of `pending_uploads`. The token is the only handle to it.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct PendingUpload {
    #[serde(skip)]
    pub token: String,

    /// Who uploaded the bytes.
    pub owner_user_id: Uuid,

    /// Entity type the bytes were moderated for.
    pub entity_type: EntityType,

    pub content_type: ImageType,

    /// Payload length. The payload itself is only read by redemption.
    pub size_bytes: i64,

    pub decision_status: ModerationStatus,

    pub decision_reason: Option<String>,

    pub created_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,

    /// Flips to true once, on redemption.
    pub consumed: bool,
}

/// What a successful redemption hands back to the caller.
#[derive(Clone, Debug)]
pub struct RedeemedUpload {
    pub owner_user_id: Uuid,
    pub content_type: ImageType,
    pub bytes: Vec<u8>,
}
