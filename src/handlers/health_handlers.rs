//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness, no I/O
//! - GET /readyz   -> metadata database and payload directory are usable

use crate::services::{asset_store::AssetStore, coordinator::Coordinator};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Runs `SELECT 1` against SQLite and a write/read/delete probe in the asset
/// directory. 200 when both pass, 503 otherwise.
pub async fn readyz(State(coordinator): State<Coordinator>) -> impl IntoResponse {
    let assets = coordinator.assets();

    let mut checks = BTreeMap::new();
    checks.insert("sqlite", check_sqlite(assets).await);
    checks.insert("disk", check_disk(assets).await);

    let ready = checks.values().all(|c| c.ok);
    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn check_sqlite(assets: &AssetStore) -> CheckStatus {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*assets.db)
        .await
    {
        Ok(1) => CheckStatus::pass(),
        Ok(v) => CheckStatus::fail(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::fail(format!("error: {}", e)),
    }
}

async fn check_disk(assets: &AssetStore) -> CheckStatus {
    let probe = assets.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
    let outcome = match fs::write(&probe, b"readyz").await {
        Ok(_) => match fs::read(&probe).await {
            Ok(bytes) if bytes == b"readyz" => CheckStatus::pass(),
            Ok(_) => CheckStatus::fail("file content mismatch"),
            Err(e) => CheckStatus::fail(format!("could not read probe file: {}", e)),
        },
        Err(e) => return CheckStatus::fail(format!("could not write probe file: {}", e)),
    };
    // best-effort cleanup
    let _ = fs::remove_file(&probe).await;
    outcome
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CheckStatus {
    fn pass() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}
