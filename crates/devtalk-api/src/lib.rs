pub mod auth;
pub mod channels;
pub mod error;
pub mod images;
pub mod middleware;
pub mod posts;
pub mod ratings;
pub mod search;
pub mod thread;
pub mod users;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use devtalk_db::{CascadeReport, Database};
use devtalk_types::api::{DeleteResponse, DeletedCounts};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::require_auth;

/// Request bodies carry base64 images, which inflate the 5 MB image ceiling by a third.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// The full HTTP surface: `/api/*` plus static `/uploads/*`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/channels", get(channels::list_channels))
        .route("/api/posts", get(posts::get_posts))
        .route("/api/users/{id}/badge", get(users::get_badge))
        .route("/api/search", get(search::search))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/channels", post(channels::create_channel))
        .route("/api/channels/{id}", delete(channels::delete_channel))
        .route("/api/posts", post(posts::create_post))
        .route("/api/posts/reply", post(posts::create_reply))
        .route("/api/posts/rate", post(ratings::rate_post))
        .route("/api/posts/reply/rate", post(ratings::rate_reply))
        .route("/api/posts/{id}", delete(posts::delete_post))
        .route("/api/replies/{id}", delete(posts::delete_reply))
        .route("/api/users/{id}", delete(users::delete_user))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest_service("/uploads", ServeDir::new(state.images.dir()))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Run a store call on the blocking pool. SQLite calls block, and a cascade
/// can hold the writer for a while.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| ApiError::Internal(e.into()))?
        .map_err(ApiError::from)
}

/// Turn a committed cascade into the response body, then drop the image
/// files it orphaned.
pub(crate) async fn finish_cascade(
    state: &AppState,
    message: String,
    report: CascadeReport,
) -> DeleteResponse {
    state.images.remove_all(&report.image_urls).await;
    DeleteResponse {
        message,
        deleted: DeletedCounts {
            users: report.users,
            channels: report.channels,
            posts: report.posts,
            replies: report.replies,
            post_ratings: report.post_ratings,
            reply_ratings: report.reply_ratings,
        },
    }
}
