//! HTTP handlers for uploads, entity image slots and asset downloads.
//! Payload bytes are buffered up to the per-type ceiling (sniffing and
//! moderation need the whole image); downloads stream from disk.

use crate::{
    errors::AppError,
    extractors::caller::Caller,
    models::{
        asset::{ImageAsset, ImageType},
        entity::{EntityRef, EntityType},
        moderation::ModerationStatus,
    },
    services::{
        asset_store::AssetError,
        coordinator::{AttachError, Coordinator, UploadOutcome},
    },
};
use axum::{
    Json,
    body::Body,
    extract::{
        FromRequest, Path, Request, State,
        multipart::{Field, Multipart, MultipartError},
    },
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

const MAX_ENTITY_ID_LEN: usize = 256;

/// Response body of `POST /upload`.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: ModerationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ImageType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// JSON body for the deferred attach flow.
#[derive(Debug, Deserialize)]
pub struct AttachTokenRequest {
    pub upload_token: String,
}

/// Response body of a successful attach.
#[derive(Debug, Serialize, Deserialize)]
pub struct AttachResponse {
    pub status: String,
    pub asset_id: Uuid,
    pub content_type: ImageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Optional body of `PUT /entities/{type}/{id}`.
#[derive(Debug, Deserialize)]
pub struct RegisterEntityRequest {
    pub owner_user_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntityResponse {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub owner_user_id: Uuid,
    pub asset_id: Option<Uuid>,
}

/// A `file` part read into memory together with its declared type.
struct FilePart {
    bytes: Bytes,
    claimed_type: Option<String>,
}

/// `POST /upload`: moderate an image and park it behind an upload token.
///
/// Multipart fields: `file` (the image) and `entity_type`.
pub async fn upload_image(
    caller: Caller,
    State(coordinator): State<Coordinator>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let cap = coordinator.limits().largest();
    let mut file: Option<FilePart> = None;
    let mut entity_type: Option<EntityType> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => file = Some(read_file_part(field, cap).await?),
            Some("entity_type") => {
                let text = field.text().await.map_err(multipart_error)?;
                entity_type = Some(
                    text.trim()
                        .parse::<EntityType>()
                        .map_err(|e| AppError::bad_request(e.to_string()))?,
                );
            }
            _ => {} // Ignore unknown fields.
        }
    }

    let file = file.ok_or_else(|| AppError::bad_request("missing 'file' field"))?;
    let entity_type =
        entity_type.ok_or_else(|| AppError::bad_request("missing 'entity_type' field"))?;

    let outcome = coordinator
        .upload_pending(
            caller,
            entity_type,
            &file.bytes,
            file.claimed_type.as_deref(),
        )
        .await?;

    let response = match outcome {
        UploadOutcome::Approved(pending) => UploadResponse {
            status: ModerationStatus::Approved,
            reason: None,
            upload_token: Some(pending.token),
            content_type: Some(pending.content_type),
            expires_at: Some(pending.expires_at),
        },
        UploadOutcome::NotApproved(decision) => UploadResponse {
            status: decision.status,
            reason: Some(decision.reason_or_default()),
            upload_token: None,
            content_type: None,
            expires_at: None,
        },
    };
    Ok(Json(response))
}

/// `POST /entities/{type}/{id}/image`: attach an image to an entity.
///
/// `multipart/form-data` with a `file` part runs the inline flow;
/// `application/json` with `{"upload_token": ...}` redeems a pending upload.
pub async fn attach_image(
    caller: Caller,
    State(coordinator): State<Coordinator>,
    Path((entity_type, entity_id)): Path<(String, String)>,
    request: Request,
) -> Result<Json<AttachResponse>, AppError> {
    let entity = entity_ref(&entity_type, entity_id)?;
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let attached = if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &coordinator)
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?;
        let cap = coordinator.limits().max_bytes(entity.entity_type);
        let mut file = None;
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            if field.name() == Some("file") {
                file = Some(read_file_part(field, cap).await?);
            }
        }
        let file = file.ok_or_else(|| AppError::bad_request("missing 'file' field"))?;
        coordinator
            .upload_and_attach(caller, &entity, &file.bytes, file.claimed_type.as_deref())
            .await?
    } else if content_type.starts_with("application/json") {
        let Json(body) = Json::<AttachTokenRequest>::from_request(request, &coordinator)
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?;
        coordinator
            .attach_from_token(caller, &entity, body.upload_token.trim())
            .await?
    } else {
        return Err(AppError::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "expected multipart/form-data or application/json",
        ));
    };

    let message = attached
        .replaced
        .map(|prev| format!("replaced previous image {}", prev));
    Ok(Json(AttachResponse {
        status: "attached".into(),
        asset_id: attached.asset.id,
        content_type: attached.asset.content_type,
        replaced: attached.replaced,
        message,
    }))
}

/// `GET /entities/{type}/{id}/image`: stream the entity's current image.
pub async fn get_entity_image(
    State(coordinator): State<Coordinator>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let entity = entity_ref(&entity_type, entity_id)?;
    let asset_id = coordinator
        .current_asset(&entity)
        .await?
        .ok_or_else(|| AppError::not_found(format!("entity `{}` has no image", entity)))?;
    stream_asset(&coordinator, asset_id).await
}

/// `DELETE /entities/{type}/{id}/image`: clear the slot and drop the asset.
pub async fn delete_entity_image(
    caller: Caller,
    State(coordinator): State<Coordinator>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let entity = entity_ref(&entity_type, entity_id)?;
    match coordinator.clear_image(caller, &entity).await? {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(AppError::not_found(format!(
            "entity `{}` has no image",
            entity
        ))),
    }
}

/// `PUT /entities/{type}/{id}`: make an entity known to the pipeline.
pub async fn register_entity(
    caller: Caller,
    State(coordinator): State<Coordinator>,
    Path((entity_type, entity_id)): Path<(String, String)>,
    payload: Option<Json<RegisterEntityRequest>>,
) -> Result<Json<EntityResponse>, AppError> {
    let entity = entity_ref(&entity_type, entity_id)?;
    let owner = payload.and_then(|Json(p)| p.owner_user_id);
    let slot = coordinator.register_entity(caller, &entity, owner).await?;
    Ok(Json(EntityResponse {
        entity_type: entity.entity_type,
        entity_id: entity.entity_id,
        owner_user_id: slot.owner_user_id,
        asset_id: slot.asset_id,
    }))
}

/// `GET /assets/{asset_id}`: stream an asset by id.
pub async fn get_asset(
    State(coordinator): State<Coordinator>,
    Path(asset_id): Path<String>,
) -> Result<Response, AppError> {
    let asset_id =
        Uuid::parse_str(&asset_id).map_err(|_| AppError::not_found("asset not found"))?;
    stream_asset(&coordinator, asset_id).await
}

async fn stream_asset(coordinator: &Coordinator, asset_id: Uuid) -> Result<Response, AppError> {
    let (meta, file) = coordinator
        .assets()
        .open(asset_id)
        .await
        .map_err(|err| match err {
            AssetError::NotFound(_) => AppError::not_found("asset not found"),
            other => AppError::from(AttachError::from(other)),
        })?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    set_asset_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// Headers come from stored metadata only; `Content-Type` is the sniffed type.
fn set_asset_headers(headers: &mut HeaderMap, meta: &ImageAsset) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(meta.content_type.mime()),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(meta.size_bytes.max(0) as u64),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, value);
    }
    let last_modified = meta
        .created_at
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
}

fn entity_ref(entity_type: &str, entity_id: String) -> Result<EntityRef, AppError> {
    let entity_type = entity_type
        .parse::<EntityType>()
        .map_err(|e| AppError::not_found(e.to_string()))?;
    if entity_id.trim().is_empty() || entity_id.len() > MAX_ENTITY_ID_LEN {
        return Err(AppError::bad_request("invalid entity id"));
    }
    Ok(EntityRef::new(entity_type, entity_id))
}

/// Buffer a `file` part, refusing to read past `cap` bytes.
async fn read_file_part(mut field: Field<'_>, cap: usize) -> Result<FilePart, AppError> {
    let claimed_type = field.content_type().map(str::to_string);
    let mut bytes = BytesMut::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(multipart_error)?;
        if bytes.len() + chunk.len() > cap {
            return Err(AttachError::TooLarge { max_bytes: cap }.into());
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(FilePart {
        bytes: bytes.freeze(),
        claimed_type,
    })
}

fn multipart_error(err: MultipartError) -> AppError {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::new(status, "request body too large")
    } else {
        AppError::bad_request(format!("multipart error: {}", err.body_text()))
    }
}
