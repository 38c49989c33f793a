use anyhow::Result;
use devtalk_types::models::Rating;
use rusqlite::Connection;
use tracing::warn;

use crate::Database;
use crate::error::StoreError;
use crate::models::ViewerVotes;
use crate::queries::{OptionalExt, ensure_user, exists};

impl Database {
    /// Set or retract a user's vote on a post. `Some` upserts (last writer
    /// wins on the `(user_id, post_id)` key); `None` deletes the row.
    pub fn rate_post(&self, user_id: i64, post_id: i64, rating: Option<Rating>) -> Result<()> {
        self.with_conn_mut(|conn| {
            ensure_user(conn, user_id)?;
            if !exists(conn, "SELECT 1 FROM posts WHERE id = ?1", post_id)? {
                return Err(StoreError::not_found("post", post_id));
            }

            match rating {
                Some(rating) => {
                    conn.execute(
                        "INSERT INTO post_ratings (user_id, post_id, rating) VALUES (?1, ?2, ?3)
                         ON CONFLICT(user_id, post_id) DO UPDATE SET rating = excluded.rating",
                        rusqlite::params![user_id, post_id, rating.as_str()],
                    )?;
                }
                None => {
                    conn.execute(
                        "DELETE FROM post_ratings WHERE user_id = ?1 AND post_id = ?2",
                        [user_id, post_id],
                    )?;
                }
            }
            Ok(())
        })
    }

    /// Reply counterpart of [`Database::rate_post`].
    pub fn rate_reply(&self, user_id: i64, reply_id: i64, rating: Option<Rating>) -> Result<()> {
        self.with_conn_mut(|conn| {
            ensure_user(conn, user_id)?;
            if !exists(conn, "SELECT 1 FROM replies WHERE id = ?1", reply_id)? {
                return Err(StoreError::not_found("reply", reply_id));
            }

            match rating {
                Some(rating) => {
                    conn.execute(
                        "INSERT INTO reply_ratings (user_id, reply_id, rating) VALUES (?1, ?2, ?3)
                         ON CONFLICT(user_id, reply_id) DO UPDATE SET rating = excluded.rating",
                        rusqlite::params![user_id, reply_id, rating.as_str()],
                    )?;
                }
                None => {
                    conn.execute(
                        "DELETE FROM reply_ratings WHERE user_id = ?1 AND reply_id = ?2",
                        [user_id, reply_id],
                    )?;
                }
            }
            Ok(())
        })
    }

    pub fn post_rating(&self, user_id: i64, post_id: i64) -> Result<Option<Rating>> {
        self.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT rating FROM post_ratings WHERE user_id = ?1 AND post_id = ?2",
                    [user_id, post_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(raw.and_then(|r| parse_rating(&r)))
        })
    }

    pub fn reply_rating(&self, user_id: i64, reply_id: i64) -> Result<Option<Rating>> {
        self.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT rating FROM reply_ratings WHERE user_id = ?1 AND reply_id = ?2",
                    [user_id, reply_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(raw.and_then(|r| parse_rating(&r)))
        })
    }

    /// All of one user's votes on posts and replies inside a channel.
    pub fn viewer_votes(&self, user_id: i64, channel_id: i64) -> Result<ViewerVotes> {
        self.with_conn(|conn| query_viewer_votes(conn, user_id, channel_id))
    }
}

pub(crate) fn query_viewer_votes(
    conn: &Connection,
    user_id: i64,
    channel_id: i64,
) -> Result<ViewerVotes> {
    let mut votes = ViewerVotes::default();

    let mut stmt = conn.prepare(
        "SELECT pr.post_id, pr.rating
         FROM post_ratings pr
         JOIN posts p ON pr.post_id = p.id
         WHERE pr.user_id = ?1 AND p.channel_id = ?2",
    )?;
    let rows = stmt.query_map([user_id, channel_id], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (post_id, raw) = row?;
        if let Some(rating) = parse_rating(&raw) {
            votes.posts.insert(post_id, rating);
        }
    }

    let mut stmt = conn.prepare(
        "SELECT rr.reply_id, rr.rating
         FROM reply_ratings rr
         JOIN replies r ON rr.reply_id = r.id
         JOIN posts p ON r.post_id = p.id
         WHERE rr.user_id = ?1 AND p.channel_id = ?2",
    )?;
    let rows = stmt.query_map([user_id, channel_id], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (reply_id, raw) = row?;
        if let Some(rating) = parse_rating(&raw) {
            votes.replies.insert(reply_id, rating);
        }
    }

    Ok(votes)
}

fn parse_rating(raw: &str) -> Option<Rating> {
    raw.parse::<Rating>()
        .map_err(|e| warn!("Ignoring stored rating: {}", e))
        .ok()
}
