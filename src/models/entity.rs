//! Entity types that own an image slot, and the per-type upload policy.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::models::asset::ImageType;

/// The closed set of domain entities that carry a single image slot.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum EntityType {
    Avatar,
    Aircraft,
    Build,
    Gear,
    Other,
}

const PHOTO_TYPES: &[ImageType] = &[ImageType::Jpeg, ImageType::Png];

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Avatar => "avatar",
            EntityType::Aircraft => "aircraft",
            EntityType::Build => "build",
            EntityType::Gear => "gear",
            EntityType::Other => "other",
        }
    }

    /// Content types accepted for this entity's slot.
    pub fn allowed_types(&self) -> &'static [ImageType] {
        match self {
            EntityType::Avatar
            | EntityType::Aircraft
            | EntityType::Build
            | EntityType::Gear
            | EntityType::Other => PHOTO_TYPES,
        }
    }

    /// Catalog entities are curated: only administrators may bind their image.
    pub fn is_curated(&self) -> bool {
        matches!(self, EntityType::Gear)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown entity type `{0}`")]
pub struct UnknownEntityType(pub String);

impl FromStr for EntityType {
    type Err = UnknownEntityType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "avatar" => Ok(EntityType::Avatar),
            "aircraft" => Ok(EntityType::Aircraft),
            "build" => Ok(EntityType::Build),
            "gear" => Ok(EntityType::Gear),
            "other" => Ok(EntityType::Other),
            _ => Err(UnknownEntityType(s.to_string())),
        }
    }
}

/// Address of one entity's image slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_names_case_insensitively() {
        assert_eq!("Gear".parse::<EntityType>().unwrap(), EntityType::Gear);
        assert_eq!("avatar".parse::<EntityType>().unwrap(), EntityType::Avatar);
        assert!("webp".parse::<EntityType>().is_err());
    }

    #[test]
    fn webp_is_never_allowed() {
        for ty in [
            EntityType::Avatar,
            EntityType::Aircraft,
            EntityType::Build,
            EntityType::Gear,
            EntityType::Other,
        ] {
            assert_eq!(ty.allowed_types(), &[ImageType::Jpeg, ImageType::Png]);
        }
    }
}
