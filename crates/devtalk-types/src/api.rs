use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Badge, Rating, Role};

// -- JWT Claims --

/// Bearer token payload. `sub` is the numeric user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    #[serde(default)]
    pub role: Role,
    pub exp: usize,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Generic `{ "message": ... }` body used for acknowledgements and errors.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: i64,
    pub username: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub token: String,
}

// -- Channels --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChannelRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateChannelResponse {
    pub channel_id: i64,
    pub message: String,
}

// -- Posts & replies --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub channel_id: i64,
    pub content: String,
    /// Inline `data:image/<ext>;base64,...` payload.
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePostResponse {
    pub post_id: i64,
    pub image_url: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateReplyRequest {
    pub post_id: i64,
    #[serde(default)]
    pub parent_reply_id: Option<i64>,
    pub content: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateReplyResponse {
    pub reply_id: i64,
    pub image_url: Option<String>,
    pub message: String,
}

// -- Ratings --

/// `rating: null` (or an absent field) retracts the caller's vote.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RatePostRequest {
    pub post_id: i64,
    #[serde(default)]
    pub rating: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateReplyRequest {
    pub reply_id: i64,
    #[serde(default)]
    pub rating: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RatingResponse {
    pub rating: Option<Rating>,
    pub message: String,
}

// -- Threads --

/// A post with its nested reply forest, as served by `GET /api/posts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostThread {
    pub id: i64,
    pub channel_id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub upvotes: u32,
    pub downvotes: u32,
    #[serde(rename = "userRating")]
    pub user_rating: Option<Rating>,
    pub replies: Vec<ReplyNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyNode {
    pub id: i64,
    pub post_id: i64,
    pub parent_reply_id: Option<i64>,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub upvotes: u32,
    pub downvotes: u32,
    #[serde(rename = "userRating")]
    pub user_rating: Option<Rating>,
    pub replies: Vec<ReplyNode>,
}

// -- Deletion --

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedCounts {
    pub users: usize,
    pub channels: usize,
    pub posts: usize,
    pub replies: usize,
    pub post_ratings: usize,
    pub reply_ratings: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub message: String,
    pub deleted: DeletedCounts,
}

// -- Users --

#[derive(Debug, Serialize, Deserialize)]
pub struct BadgeResponse {
    pub user_id: i64,
    pub badge: Badge,
    pub post_count: u64,
}

// -- Search --

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: i64,
    pub post_id: i64,
    pub channel_id: i64,
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub posts: Vec<SearchHit>,
    pub replies: Vec<SearchHit>,
}
