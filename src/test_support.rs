//! Shared fixtures for unit tests.

use async_trait::async_trait;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use uuid::Uuid;

use crate::{
    config::UploadLimits,
    db,
    models::{entity::EntityRef, entity::EntityType, moderation::ModerationDecision},
    services::{
        asset_store::AssetStore,
        coordinator::Coordinator,
        moderation::{ModerationEngine, ModerationError},
        pending_store::PendingStore,
        slots::{EntitySlot, ImageSlots, SlotError, SlotResult, SqliteImageSlots},
    },
};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Temporary directory removed on drop.
pub struct TestDir(PathBuf);

impl TestDir {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("moderated-assets-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path).expect("create test dir");
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Migrated in-memory database. One connection, so every query sees the
/// same database.
pub async fn test_pool() -> Arc<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").expect("sqlite options");
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("connect in-memory sqlite");
    db::run_migrations(&pool).await.expect("migrate");
    Arc::new(pool)
}

pub async fn test_assets() -> (AssetStore, TestDir) {
    let dir = TestDir::new();
    (AssetStore::new(test_pool().await, dir.path()), dir)
}

fn filler(header: &[u8], len: usize) -> Vec<u8> {
    let mut bytes = header.to_vec();
    let mut i = 0usize;
    while bytes.len() < len {
        bytes.push((i % 251) as u8);
        i += 1;
    }
    bytes
}

pub fn png_bytes(len: usize) -> Vec<u8> {
    filler(
        &[
            0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H',
            b'D', b'R',
        ],
        len,
    )
}

pub fn jpeg_bytes(len: usize) -> Vec<u8> {
    filler(
        &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00],
        len,
    )
}

pub fn webp_bytes(len: usize) -> Vec<u8> {
    filler(b"RIFF\x24\x00\x00\x00WEBPVP8 ", len)
}

/// Fixed decision, counting how often it was asked.
pub struct CountingModeration {
    pub decision: ModerationDecision,
    pub calls: AtomicUsize,
}

impl CountingModeration {
    pub fn new(decision: ModerationDecision) -> Arc<Self> {
        Arc::new(Self {
            decision,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModerationEngine for CountingModeration {
    async fn decide(
        &self,
        _owner_user_id: Uuid,
        _entity_type: EntityType,
        _bytes: &[u8],
    ) -> Result<ModerationDecision, ModerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.decision.clone())
    }
}

/// Never answers within a test deadline.
pub struct SlowModeration(pub Duration);

#[async_trait]
impl ModerationEngine for SlowModeration {
    async fn decide(
        &self,
        _owner_user_id: Uuid,
        _entity_type: EntityType,
        _bytes: &[u8],
    ) -> Result<ModerationDecision, ModerationError> {
        tokio::time::sleep(self.0).await;
        Ok(ModerationDecision::approved())
    }
}

/// Engine whose backend is down.
pub struct FailingModeration;

#[async_trait]
impl ModerationEngine for FailingModeration {
    async fn decide(
        &self,
        _owner_user_id: Uuid,
        _entity_type: EntityType,
        _bytes: &[u8],
    ) -> Result<ModerationDecision, ModerationError> {
        Err(ModerationError::Backend("classifier unreachable".into()))
    }
}

/// Slot store whose `set` fails or stalls; everything else passes through.
///
/// `stall_set` sleeps before writing, `stall_ack` sleeps after the write
/// has committed.
pub struct FaultySlots {
    pub inner: Arc<SqliteImageSlots>,
    pub fail_set: bool,
    pub stall_set: Option<Duration>,
    pub stall_ack: Option<Duration>,
}

#[async_trait]
impl ImageSlots for FaultySlots {
    async fn register(&self, entity: &EntityRef, owner_user_id: Uuid) -> SlotResult<EntitySlot> {
        self.inner.register(entity, owner_user_id).await
    }

    async fn lookup(&self, entity: &EntityRef) -> SlotResult<EntitySlot> {
        self.inner.lookup(entity).await
    }

    async fn set(&self, entity: &EntityRef, asset_id: Uuid) -> SlotResult<()> {
        if let Some(stall) = self.stall_set {
            tokio::time::sleep(stall).await;
        }
        if self.fail_set {
            return Err(SlotError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        self.inner.set(entity, asset_id).await?;
        if let Some(stall) = self.stall_ack {
            tokio::time::sleep(stall).await;
        }
        Ok(())
    }

    async fn clear(&self, entity: &EntityRef) -> SlotResult<Option<Uuid>> {
        self.inner.clear(entity).await
    }
}

/// All stores over one database and one temp dir.
pub struct Harness {
    pub db: Arc<SqlitePool>,
    pub assets: AssetStore,
    pub pending: PendingStore,
    pub slots: Arc<SqliteImageSlots>,
    pub coordinator: Coordinator,
    _dir: TestDir,
}

impl Harness {
    pub async fn new(moderation: Arc<dyn ModerationEngine>) -> Self {
        let dir = TestDir::new();
        let db = test_pool().await;
        let assets = AssetStore::new(db.clone(), dir.path());
        let pending = PendingStore::new(db.clone(), chrono::Duration::minutes(15));
        let slots = Arc::new(SqliteImageSlots::new(db.clone()));
        let coordinator = Coordinator::new(
            assets.clone(),
            pending.clone(),
            slots.clone(),
            moderation,
            UploadLimits::default(),
            TEST_TIMEOUT,
        );
        Self {
            db,
            assets,
            pending,
            slots,
            coordinator,
            _dir: dir,
        }
    }

    pub async fn approving() -> Self {
        Self::new(CountingModeration::new(ModerationDecision::approved())).await
    }

    /// Coordinator over the same stores with other collaborators swapped in.
    pub fn coordinator_with(
        &self,
        moderation: Arc<dyn ModerationEngine>,
        slots: Arc<dyn ImageSlots>,
        timeout: Duration,
    ) -> Coordinator {
        Coordinator::new(
            self.assets.clone(),
            self.pending.clone(),
            slots,
            moderation,
            UploadLimits::default(),
            timeout,
        )
    }

    pub async fn register(&self, entity_type: EntityType, id: &str, owner: Uuid) -> EntityRef {
        let entity = EntityRef::new(entity_type, id);
        self.slots
            .register(&entity, owner)
            .await
            .expect("register entity");
        entity
    }
}
