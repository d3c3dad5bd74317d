//! Represents an approved image bound to an entity's image slot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use crate::models::entity::EntityType;

/// Canonical image content types the sniffer may report.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[sqlx(type_name = "TEXT")]
pub enum ImageType {
    #[serde(rename = "image/jpeg")]
    #[sqlx(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    #[sqlx(rename = "image/png")]
    Png,
}

impl ImageType {
    pub fn mime(&self) -> &'static str {
        match self {
            ImageType::Jpeg => "image/jpeg",
            ImageType::Png => "image/png",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// Assets only ever exist in the approved state.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum AssetStatus {
    Approved,
}

/// A single stored image.
///
/// The struct carries metadata only; the payload lives on disk and is read
/// through `AssetStore::open`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ImageAsset {
    /// Generated on creation, never changes.
    pub id: Uuid,

    /// Account that supplied the bytes.
    pub owner_user_id: Uuid,

    pub entity_type: EntityType,

    /// Owning entity. Only `None` for a loose asset.
    pub entity_id: Option<String>,

    /// Sniffed from the payload, never taken from the client.
    pub content_type: ImageType,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload.
    pub etag: String,

    pub status: AssetStatus,

    pub created_at: DateTime<Utc>,

    /// Administrator who bound someone else's upload.
    pub curated_by_user_id: Option<Uuid>,
}
