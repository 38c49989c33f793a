use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};

use devtalk_types::api::{BadgeResponse, Claims};
use devtalk_types::models::Badge;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::require_admin;
use crate::{blocking, finish_cascade};

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&claims)?;

    let report = blocking(&state, move |db| db.delete_user(user_id)).await?;
    let body = finish_cascade(
        &state,
        "User and all their content deleted successfully.".into(),
        report,
    )
    .await;

    Ok(Json(body))
}

pub async fn get_badge(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<BadgeResponse>, ApiError> {
    let post_count = blocking(&state, move |db| db.contribution_count(user_id)).await?;

    Ok(Json(BadgeResponse {
        user_id,
        badge: Badge::for_contributions(post_count),
        post_count,
    }))
}
