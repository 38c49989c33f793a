use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{info, warn};

use devtalk_db::Database;
use devtalk_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use devtalk_types::models::Role;

use crate::error::{ApiError, AppJson};
use crate::images::ImageStore;
use crate::blocking;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub images: ImageStore,
}

pub async fn register(
    State(state): State<AppState>,
    AppJson(req): AppJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    let name_len = req.username.chars().count();
    if !(3..=32).contains(&name_len) {
        return Err(ApiError::BadRequest("Username must be 3-32 characters.".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest("Password must be at least 8 characters.".into()));
    }

    let username = req.username.clone();
    let user_id = blocking(&state, move |db| {
        // Argon2id is deliberately slow; keep it off the async workers too.
        let password_hash = hash_password(&req.password)?;
        db.create_user(&req.username, &password_hash, Role::User.as_str())
    })
    .await?;

    info!("Registered user {} ({})", username, user_id);

    let token = create_token(&state.jwt_secret, state.token_ttl, user_id, &username, Role::User)
        .map_err(ApiError::Internal)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id,
            username,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    AppJson(req): AppJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest("Username and password are required.".into()));
    }

    let user = blocking(&state, move |db| {
        let Some(user) = db.get_user_by_username(&req.username)? else {
            return Ok(None);
        };

        // Verify password
        let parsed_hash = PasswordHash::new(&user.password_hash)
            .map_err(|e| anyhow::anyhow!("Stored hash for {} is unreadable: {}", user.username, e))?;
        let valid = Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .is_ok();

        Ok(valid.then_some(user))
    })
    .await?
    .ok_or(ApiError::Unauthorized("Invalid credentials."))?;

    let role = Role::from_db(&user.role);
    let token = create_token(&state.jwt_secret, state.token_ttl, user.id, &user.username, role)
        .map_err(ApiError::Internal)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        username: user.username,
        role,
        token,
    }))
}

/// Create the admin account if no user has that name yet. Returns whether
/// an account was created.
pub fn ensure_admin(db: &Database, username: &str, password: &str) -> anyhow::Result<bool> {
    if let Some(existing) = db.get_user_by_username(username)? {
        if Role::from_db(&existing.role) != Role::Admin {
            warn!("User {} exists but is not an admin", username);
        }
        return Ok(false);
    }

    let password_hash = hash_password(password)?;
    db.create_user(username, &password_hash, Role::Admin.as_str())?;
    info!("Admin account {} created", username);
    Ok(true)
}

fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

pub fn create_token(
    secret: &str,
    ttl: chrono::Duration,
    user_id: i64,
    username: &str,
    role: Role,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        role,
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{claims_from_headers, viewer_id};
    use axum::http::{HeaderMap, HeaderValue, header};

    const SECRET: &str = "test-secret";

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn tokens_round_trip_through_the_middleware_parser() {
        let token =
            create_token(SECRET, chrono::Duration::minutes(30), 42, "alice", Role::Admin).unwrap();
        let claims = claims_from_headers(&bearer(&token), SECRET).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.username, "alice");
        assert!(claims.is_admin());
    }

    #[test]
    fn expired_or_foreign_tokens_are_rejected() {
        let expired =
            create_token(SECRET, chrono::Duration::hours(-2), 1, "bob", Role::User).unwrap();
        assert!(claims_from_headers(&bearer(&expired), SECRET).is_err());

        let foreign =
            create_token("other-secret", chrono::Duration::minutes(30), 1, "bob", Role::User)
                .unwrap();
        assert!(claims_from_headers(&bearer(&foreign), SECRET).is_err());
        assert!(claims_from_headers(&HeaderMap::new(), SECRET).is_err());
    }

    #[test]
    fn read_paths_degrade_to_anonymous() {
        assert_eq!(viewer_id(&HeaderMap::new(), SECRET), None);
        assert_eq!(viewer_id(&bearer("garbage"), SECRET), None);

        let expired =
            create_token(SECRET, chrono::Duration::hours(-2), 1, "bob", Role::User).unwrap();
        assert_eq!(viewer_id(&bearer(&expired), SECRET), None);

        let good = create_token(SECRET, chrono::Duration::minutes(5), 9, "bob", Role::User).unwrap();
        assert_eq!(viewer_id(&bearer(&good), SECRET), Some(9));
    }

    #[test]
    fn ensure_admin_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        assert!(ensure_admin(&db, "Admin", "pass").unwrap());
        assert!(!ensure_admin(&db, "Admin", "pass").unwrap());

        let admin = db.get_user_by_username("Admin").unwrap().unwrap();
        assert_eq!(admin.role, "admin");
        assert_ne!(admin.password_hash, "pass");
    }
}
