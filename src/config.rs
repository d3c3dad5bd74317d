use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt::Display, str::FromStr, time::Duration};

use crate::{models::entity::EntityType, services::moderation::ModerationMode};

const MIB: usize = 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Lifetime of an upload token.
    pub pending_ttl: Duration,
    /// Deadline for each moderation call and store operation.
    pub operation_timeout: Duration,
    /// How often expired pending uploads are swept. `None` disables the sweeper.
    pub sweep_interval: Option<Duration>,
    pub limits: UploadLimits,
    pub moderation_mode: ModerationMode,
}

/// Maximum payload size per entity type, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub avatar: usize,
    pub aircraft: usize,
    pub build: usize,
    pub gear: usize,
    pub other: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            avatar: 2 * MIB,
            aircraft: 8 * MIB,
            build: 8 * MIB,
            gear: 2 * MIB,
            other: 8 * MIB,
        }
    }
}

impl UploadLimits {
    pub fn max_bytes(&self, entity_type: EntityType) -> usize {
        match entity_type {
            EntityType::Avatar => self.avatar,
            EntityType::Aircraft => self.aircraft,
            EntityType::Build => self.build,
            EntityType::Gear => self.gear,
            EntityType::Other => self.other,
        }
    }

    /// Ceiling across all entity types; sizes the global request body limit.
    pub fn largest(&self) -> usize {
        [self.avatar, self.aircraft, self.build, self.gear, self.other]
            .into_iter()
            .max()
            .unwrap_or(0)
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Moderated image asset upload service")]
pub struct Args {
    /// Host to bind to (overrides MODERATED_ASSETS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MODERATED_ASSETS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where asset payloads are stored (overrides MODERATED_ASSETS_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides MODERATED_ASSETS_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Upload token lifetime in seconds (overrides MODERATED_ASSETS_PENDING_TTL_SECS)
    #[arg(long)]
    pub pending_ttl_secs: Option<u64>,

    /// Per-operation deadline in milliseconds (overrides MODERATED_ASSETS_OPERATION_TIMEOUT_MS)
    #[arg(long)]
    pub operation_timeout_ms: Option<u64>,

    /// Pending-upload sweep interval in seconds, 0 disables (overrides MODERATED_ASSETS_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Built-in moderation decision: approve, reject or review (overrides MODERATED_ASSETS_MODERATION_MODE)
    #[arg(long)]
    pub moderation_mode: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("MODERATED_ASSETS_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("MODERATED_ASSETS_PORT", 3000u16)?;
        let env_storage = env::var("MODERATED_ASSETS_STORAGE_DIR")
            .unwrap_or_else(|_| "./data/assets".into());
        let env_db = env::var("MODERATED_ASSETS_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/assets.db".into());
        let env_ttl = env_parse("MODERATED_ASSETS_PENDING_TTL_SECS", 900u64)?;
        let env_timeout = env_parse("MODERATED_ASSETS_OPERATION_TIMEOUT_MS", 10_000u64)?;
        let env_sweep = env_parse("MODERATED_ASSETS_SWEEP_INTERVAL_SECS", 60u64)?;
        let env_mode = env::var("MODERATED_ASSETS_MODERATION_MODE")
            .unwrap_or_else(|_| "approve".into());

        let defaults = UploadLimits::default();
        let limits = UploadLimits {
            avatar: env_parse("MODERATED_ASSETS_AVATAR_MAX_BYTES", defaults.avatar)?,
            aircraft: env_parse("MODERATED_ASSETS_AIRCRAFT_MAX_BYTES", defaults.aircraft)?,
            build: env_parse("MODERATED_ASSETS_BUILD_MAX_BYTES", defaults.build)?,
            gear: env_parse("MODERATED_ASSETS_GEAR_MAX_BYTES", defaults.gear)?,
            other: env_parse("MODERATED_ASSETS_OTHER_MAX_BYTES", defaults.other)?,
        };

        // --- Merge ---
        let mode = args.moderation_mode.unwrap_or(env_mode);
        let moderation_mode = mode
            .parse::<ModerationMode>()
            .map_err(anyhow::Error::msg)
            .context("parsing moderation mode")?;
        let sweep_secs = args.sweep_interval_secs.unwrap_or(env_sweep);

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            pending_ttl: Duration::from_secs(args.pending_ttl_secs.unwrap_or(env_ttl)),
            operation_timeout: Duration::from_millis(
                args.operation_timeout_ms.unwrap_or(env_timeout),
            ),
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            limits,
            moderation_mode,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse `key`, falling back to `default` when unset.
fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
