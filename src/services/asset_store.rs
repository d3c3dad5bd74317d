//! src/services/asset_store.rs
//!
//! AssetStore: approved image assets. Metadata lives in SQLite
//! (`image_assets`); payloads live on disk sharded beneath
//! `base_path/{shard}/{shard}/{asset_id}`.

use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    asset::{AssetStatus, ImageAsset, ImageType},
    entity::EntityRef,
};

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("asset `{0}` not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type AssetResult<T> = Result<T, AssetError>;

/// Input for `AssetStore::create`. Callers only build this from bytes that
/// moderation approved.
///
/// The id is chosen up front so a caller that loses track of a create (for
/// example on a deadline) can still delete whatever it left behind.
#[derive(Debug)]
pub struct NewAsset<'a> {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub entity: &'a EntityRef,
    pub content_type: ImageType,
    pub bytes: &'a [u8],
    pub curated_by_user_id: Option<Uuid>,
}

const ASSET_COLUMNS: &str = "id, owner_user_id, entity_type, entity_id, content_type, size_bytes, \
     etag, status, created_at, curated_by_user_id";

#[derive(Clone)]
pub struct AssetStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where asset payloads are stored.
    pub base_path: PathBuf,
}

impl AssetStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Two-level shard directories from MD5(asset id), 00–ff each.
    fn shards(id: Uuid) -> (String, String) {
        let digest = md5::compute(id.to_string());
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn payload_path(&self, id: Uuid) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(id);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(id.to_string());
        path
    }

    /// Write the payload and insert its metadata row.
    ///
    /// - Writes to a temporary file, fsyncs, then renames into place.
    /// - Removes the payload again if the metadata insert fails.
    pub async fn create(&self, new: NewAsset<'_>) -> AssetResult<ImageAsset> {
        let id = new.id;
        let file_path = self.payload_path(id);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            AssetError::Io(io::Error::new(
                ErrorKind::Other,
                "asset path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        if let Err(err) = write_durably(&tmp_path, new.bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(AssetError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(AssetError::Io(err));
        }

        let etag = format!("{:x}", md5::compute(new.bytes));
        let insert_result = sqlx::query_as::<_, ImageAsset>(&format!(
            "INSERT INTO image_assets ({ASSET_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {ASSET_COLUMNS}"
        ))
        .bind(id)
        .bind(new.owner_user_id)
        .bind(new.entity.entity_type)
        .bind(&new.entity.entity_id)
        .bind(new.content_type)
        .bind(new.bytes.len() as i64)
        .bind(&etag)
        .bind(AssetStatus::Approved)
        .bind(Utc::now())
        .bind(new.curated_by_user_id)
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(asset) => {
                debug!(asset_id = %asset.id, entity = %new.entity, size = asset.size_bytes, "asset created");
                Ok(asset)
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(AssetError::Sqlx(err))
            }
        }
    }

    /// Fetch asset metadata.
    pub async fn get(&self, id: Uuid) -> AssetResult<ImageAsset> {
        sqlx::query_as::<_, ImageAsset>(&format!(
            "SELECT {ASSET_COLUMNS} FROM image_assets WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(AssetError::NotFound(id))
    }

    /// Metadata plus an open payload file ready for streaming out.
    ///
    /// A row whose payload has vanished from disk reads as `NotFound`.
    pub async fn open(&self, id: Uuid) -> AssetResult<(ImageAsset, File)> {
        let asset = self.get(id).await?;
        let file = File::open(self.payload_path(id)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                AssetError::NotFound(id)
            } else {
                AssetError::Io(err)
            }
        })?;
        Ok((asset, file))
    }

    /// Remove an asset's row and payload.
    ///
    /// Idempotent: returns `Ok(false)` if the asset was already gone.
    pub async fn delete(&self, id: Uuid) -> AssetResult<bool> {
        let result = sqlx::query("DELETE FROM image_assets WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;

        let file_path = self.payload_path(id);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => return Err(AssetError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }

        Ok(result.rows_affected() > 0)
    }

    /// Recursively remove empty shard directories up to the base path.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
impl AssetStore {
    /// Metadata plus the whole payload in memory.
    pub async fn read(&self, id: Uuid) -> AssetResult<(ImageAsset, Vec<u8>)> {
        let asset = self.get(id).await?;
        let bytes = fs::read(self.payload_path(id)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                AssetError::NotFound(id)
            } else {
                AssetError::Io(err)
            }
        })?;
        Ok((asset, bytes))
    }

    pub async fn list_for_entity(&self, entity: &EntityRef) -> AssetResult<Vec<ImageAsset>> {
        Ok(sqlx::query_as::<_, ImageAsset>(&format!(
            "SELECT {ASSET_COLUMNS} FROM image_assets
             WHERE entity_type = ? AND entity_id = ? ORDER BY created_at"
        ))
        .bind(entity.entity_type)
        .bind(&entity.entity_id)
        .fetch_all(&*self.db)
        .await?)
    }

    pub async fn count(&self) -> AssetResult<i64> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM image_assets")
            .fetch_one(&*self.db)
            .await?)
    }
}

async fn write_durably(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}
