//! Core data models for the moderated asset pipeline.
//!
//! These map to the `image_assets`, `pending_uploads` and `entity_images`
//! tables via `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod asset;
pub mod entity;
pub mod moderation;
pub mod pending;
