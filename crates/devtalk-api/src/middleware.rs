use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use devtalk_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;

/// Extract and validate the JWT from the Authorization header; the claims
/// are handed to the handler as an `Extension<Claims>`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = claims_from_headers(req.headers(), &state.jwt_secret)?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub fn claims_from_headers(headers: &HeaderMap, secret: &str) -> Result<Claims, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized("Missing bearer token."))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthorized("Missing bearer token."))?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized("Invalid or expired token."))?;

    Ok(token_data.claims)
}

/// Read paths allow anonymous viewing: a missing, malformed or expired token
/// yields no viewer instead of an error.
pub fn viewer_id(headers: &HeaderMap, secret: &str) -> Option<i64> {
    if !headers.contains_key(header::AUTHORIZATION) {
        return None;
    }
    match claims_from_headers(headers, secret) {
        Ok(claims) => Some(claims.sub),
        Err(e) => {
            debug!("Ignoring unusable token on read path: {}", e);
            None
        }
    }
}

pub fn require_admin(claims: &Claims) -> Result<(), ApiError> {
    if claims.is_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Admin access required."))
    }
}
