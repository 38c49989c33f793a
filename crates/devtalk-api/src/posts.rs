use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, info};

use devtalk_types::api::{
    Claims, CreatePostRequest, CreatePostResponse, CreateReplyRequest, CreateReplyResponse,
    PostThread,
};

use crate::auth::AppState;
use crate::error::{ApiError, AppJson};
use crate::middleware::{require_admin, viewer_id};
use crate::thread::build_threads;
use crate::{blocking, finish_cascade};

/// `channel_id` is taken as a raw string so a missing or non-numeric value
/// gets our own 400 body instead of the extractor's rejection.
#[derive(Debug, Deserialize)]
pub struct PostsQuery {
    pub channel_id: Option<String>,
}

pub async fn get_posts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PostsQuery>,
) -> Result<Json<Vec<PostThread>>, ApiError> {
    let channel_id: i64 = query
        .channel_id
        .as_deref()
        .map(str::trim)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| ApiError::BadRequest("Valid channel_id is required.".into()))?;

    let viewer = viewer_id(&headers, &state.jwt_secret);

    let snapshot = blocking(&state, move |db| db.channel_snapshot(channel_id, viewer)).await?;

    debug!(
        "Channel {}: {} posts, {} replies",
        channel_id,
        snapshot.posts.len(),
        snapshot.replies.len()
    );

    Ok(Json(build_threads(
        snapshot.posts,
        snapshot.replies,
        snapshot.votes.as_ref(),
    )))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppJson(req): AppJson<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = required_content(&req.content)?;
    let image_url = store_image(&state, req.image.as_deref()).await?;

    let user_id = claims.sub;
    let channel_id = req.channel_id;
    let stored = image_url.clone();
    let result = blocking(&state, move |db| {
        db.create_post(channel_id, user_id, &content, stored.as_deref())
    })
    .await;

    let post_id = match result {
        Ok(id) => id,
        Err(e) => {
            discard_image(&state, image_url).await;
            return Err(e);
        }
    };

    info!("{} posted {} in channel {}", claims.username, post_id, channel_id);

    Ok((
        StatusCode::CREATED,
        Json(CreatePostResponse {
            post_id,
            image_url,
            message: "Post created successfully.".into(),
        }),
    ))
}

pub async fn create_reply(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppJson(req): AppJson<CreateReplyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = required_content(&req.content)?;
    let image_url = store_image(&state, req.image.as_deref()).await?;

    let user_id = claims.sub;
    let post_id = req.post_id;
    let parent_reply_id = req.parent_reply_id;
    let stored = image_url.clone();
    let result = blocking(&state, move |db| {
        db.create_reply(post_id, parent_reply_id, user_id, &content, stored.as_deref())
    })
    .await;

    let reply_id = match result {
        Ok(id) => id,
        Err(e) => {
            discard_image(&state, image_url).await;
            return Err(e);
        }
    };

    info!(
        "{} replied {} on post {} (parent {:?})",
        claims.username, reply_id, post_id, parent_reply_id
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateReplyResponse {
            reply_id,
            image_url,
            message: "Reply created successfully.".into(),
        }),
    ))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&claims)?;

    let report = blocking(&state, move |db| db.delete_post(post_id)).await?;
    let body = finish_cascade(
        &state,
        "Post and its replies deleted successfully.".into(),
        report,
    )
    .await;

    Ok(Json(body))
}

pub async fn delete_reply(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(reply_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&claims)?;

    let report = blocking(&state, move |db| db.delete_reply(reply_id)).await?;
    let body = finish_cascade(
        &state,
        "Reply and its nested replies deleted successfully.".into(),
        report,
    )
    .await;

    Ok(Json(body))
}

fn required_content(content: &str) -> Result<String, ApiError> {
    if content.trim().is_empty() {
        return Err(ApiError::BadRequest("Content is required.".into()));
    }
    Ok(content.to_string())
}

async fn store_image(state: &AppState, image: Option<&str>) -> Result<Option<String>, ApiError> {
    match image.filter(|data| !data.is_empty()) {
        Some(data_url) => Ok(Some(state.images.save(data_url).await?)),
        None => Ok(None),
    }
}

/// The row never made it in, so the image it would have pointed to goes too.
async fn discard_image(state: &AppState, image_url: Option<String>) {
    if let Some(url) = image_url {
        state.images.remove_all(&[url]).await;
    }
}
