//! Database row types. These map directly to SQLite rows and stay
//! independent of the devtalk-types API models.

use std::collections::HashMap;

use devtalk_types::models::Rating;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ChannelRow {
    pub id: i64,
    pub name: String,
    pub created_by: Option<i64>,
    pub created_at: String,
}

/// A post joined with its author name and vote tallies.
#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: i64,
    pub channel_id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: String,
    pub upvotes: u32,
    pub downvotes: u32,
}

/// A reply joined with its author name and vote tallies.
#[derive(Debug, Clone)]
pub struct ReplyRow {
    pub id: i64,
    pub post_id: i64,
    pub parent_reply_id: Option<i64>,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: String,
    pub upvotes: u32,
    pub downvotes: u32,
}

/// The requesting user's own votes, keyed by target id.
#[derive(Debug, Clone, Default)]
pub struct ViewerVotes {
    pub posts: HashMap<i64, Rating>,
    pub replies: HashMap<i64, Rating>,
}

/// Source rows of one channel page, read from a single snapshot.
#[derive(Debug, Clone, Default)]
pub struct ChannelSnapshot {
    pub posts: Vec<PostRow>,
    pub replies: Vec<ReplyRow>,
    pub votes: Option<ViewerVotes>,
}

#[derive(Debug, Clone)]
pub struct SearchRow {
    pub id: i64,
    pub post_id: i64,
    pub channel_id: i64,
    pub username: String,
    pub content: String,
    pub created_at: String,
}
