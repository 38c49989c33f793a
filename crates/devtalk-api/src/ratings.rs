use axum::{Extension, Json, extract::State};
use tracing::debug;

use devtalk_types::api::{Claims, RatePostRequest, RateReplyRequest, RatingResponse};
use devtalk_types::models::Rating;

use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, AppJson};

pub async fn rate_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppJson(req): AppJson<RatePostRequest>,
) -> Result<Json<RatingResponse>, ApiError> {
    let rating = parse_rating(req.rating.as_deref())?;
    let user_id = claims.sub;
    let post_id = req.post_id;

    blocking(&state, move |db| db.rate_post(user_id, post_id, rating)).await?;
    debug!("User {} rated post {}: {:?}", user_id, post_id, rating);

    Ok(Json(rating_response(rating)))
}

pub async fn rate_reply(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppJson(req): AppJson<RateReplyRequest>,
) -> Result<Json<RatingResponse>, ApiError> {
    let rating = parse_rating(req.rating.as_deref())?;
    let user_id = claims.sub;
    let reply_id = req.reply_id;

    blocking(&state, move |db| db.rate_reply(user_id, reply_id, rating)).await?;
    debug!("User {} rated reply {}: {:?}", user_id, reply_id, rating);

    Ok(Json(rating_response(rating)))
}

/// `None` (JSON null or an absent field) means retract.
fn parse_rating(raw: Option<&str>) -> Result<Option<Rating>, ApiError> {
    raw.map(str::parse::<Rating>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn rating_response(rating: Option<Rating>) -> RatingResponse {
    let message = match rating {
        Some(_) => "Rating saved.",
        None => "Rating removed.",
    };
    RatingResponse {
        rating,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_retracts_and_unknown_values_are_rejected() {
        assert_eq!(parse_rating(None).unwrap(), None);
        assert_eq!(parse_rating(Some("up")).unwrap(), Some(Rating::Up));
        assert_eq!(parse_rating(Some("down")).unwrap(), Some(Rating::Down));

        let err = parse_rating(Some("meh")).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
