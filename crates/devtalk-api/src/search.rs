use axum::{
    Json,
    extract::{Query, State},
};

use devtalk_db::models::SearchRow;
use devtalk_types::api::{SearchHit, SearchQuery, SearchResponse};

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;
use crate::thread::parse_timestamp;

const MAX_HITS: u32 = 50;

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    let term = query.q.trim().to_string();
    if term.is_empty() {
        return Err(ApiError::BadRequest("Search query is required.".into()));
    }

    let (posts, replies) = blocking(&state, move |db| db.search(&term, MAX_HITS)).await?;

    Ok(Json(SearchResponse {
        posts: posts.into_iter().map(to_hit).collect(),
        replies: replies.into_iter().map(to_hit).collect(),
    }))
}

fn to_hit(row: SearchRow) -> SearchHit {
    SearchHit {
        id: row.id,
        post_id: row.post_id,
        channel_id: row.channel_id,
        username: row.username,
        created_at: parse_timestamp(&row.created_at),
        content: row.content,
    }
}
