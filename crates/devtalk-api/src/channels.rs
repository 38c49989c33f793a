use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use devtalk_types::api::{Claims, CreateChannelRequest, CreateChannelResponse};
use devtalk_types::models::Channel;

use crate::auth::AppState;
use crate::error::{ApiError, AppJson};
use crate::middleware::require_admin;
use crate::thread::parse_timestamp;
use crate::{blocking, finish_cascade};

const MAX_CHANNEL_NAME: usize = 100;

pub async fn list_channels(State(state): State<AppState>) -> Result<Json<Vec<Channel>>, ApiError> {
    let rows = blocking(&state, |db| db.list_channels()).await?;

    let channels = rows
        .into_iter()
        .map(|row| Channel {
            id: row.id,
            name: row.name,
            created_by: row.created_by,
            created_at: parse_timestamp(&row.created_at),
        })
        .collect();

    Ok(Json(channels))
}

pub async fn create_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppJson(req): AppJson<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() || name.chars().count() > MAX_CHANNEL_NAME {
        return Err(ApiError::BadRequest("Channel name must be 1-100 characters.".into()));
    }

    let user_id = claims.sub;
    let channel_name = name.clone();
    let channel_id = blocking(&state, move |db| db.create_channel(&channel_name, user_id)).await?;

    info!("{} created channel {} ({})", claims.username, name, channel_id);

    Ok((
        StatusCode::CREATED,
        Json(CreateChannelResponse {
            channel_id,
            message: "Channel created successfully.".into(),
        }),
    ))
}

pub async fn delete_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(channel_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&claims)?;

    let report = blocking(&state, move |db| db.delete_channel(channel_id)).await?;
    let body = finish_cascade(
        &state,
        "Channel and all its posts deleted successfully.".into(),
        report,
    )
    .await;

    Ok(Json(body))
}
