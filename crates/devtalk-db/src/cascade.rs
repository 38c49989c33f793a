//! Cascading deletes for replies, posts, channels and users.
//!
//! Foreign keys carry no `ON DELETE` action, so every entry point first
//! collects the full set of dependent rows and then removes them children
//! before parents, all inside one IMMEDIATE transaction. Any failing step
//! returns an error, which drops the transaction and rolls everything back.

use std::collections::HashSet;
use std::fmt;

use anyhow::Result;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::Database;
use crate::error::StoreError;
use crate::queries::exists;

/// Rows removed by one cascade, per table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub users: usize,
    pub channels: usize,
    pub posts: usize,
    pub replies: usize,
    pub post_ratings: usize,
    pub reply_ratings: usize,
    /// Stored image paths of the removed posts and replies.
    pub image_urls: Vec<String>,
}

impl fmt::Display for CascadeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} users, {} channels, {} posts, {} replies, {} post ratings, {} reply ratings",
            self.users, self.channels, self.posts, self.replies, self.post_ratings, self.reply_ratings
        )
    }
}

/// What a cascade is about to remove. `replies` is already in deletion
/// order: every reply comes after all of its descendants.
#[derive(Debug, Default)]
struct Plan {
    user: Option<i64>,
    channels: Vec<i64>,
    posts: Vec<i64>,
    replies: Vec<i64>,
}

impl Database {
    /// Delete a reply, every reply nested under it, and all their ratings.
    pub fn delete_reply(&self, reply_id: i64) -> Result<CascadeReport> {
        let report = self.with_tx(|tx| {
            require(tx, "reply", "SELECT 1 FROM replies WHERE id = ?1", reply_id)?;
            let plan = Plan {
                replies: reply_subtrees(tx, &[reply_id])?,
                ..Plan::default()
            };
            execute(tx, &plan)
        })?;

        info!("Deleted reply {}: {}", reply_id, report);
        Ok(report)
    }

    /// Delete a post together with its replies and every rating on either.
    pub fn delete_post(&self, post_id: i64) -> Result<CascadeReport> {
        let report = self.with_tx(|tx| {
            require(tx, "post", "SELECT 1 FROM posts WHERE id = ?1", post_id)?;
            let posts = vec![post_id];
            let plan = Plan {
                replies: reply_subtrees(tx, &replies_of_posts(tx, &posts)?)?,
                posts,
                ..Plan::default()
            };
            execute(tx, &plan)
        })?;

        info!("Deleted post {}: {}", post_id, report);
        Ok(report)
    }

    /// Delete a channel and everything posted in it.
    pub fn delete_channel(&self, channel_id: i64) -> Result<CascadeReport> {
        let report = self.with_tx(|tx| {
            require(tx, "channel", "SELECT 1 FROM channels WHERE id = ?1", channel_id)?;
            let channels = vec![channel_id];
            let posts = posts_of_channels(tx, &channels)?;
            let plan = Plan {
                replies: reply_subtrees(tx, &replies_of_posts(tx, &posts)?)?,
                posts,
                channels,
                ..Plan::default()
            };
            execute(tx, &plan)
        })?;

        info!("Deleted channel {}: {}", channel_id, report);
        Ok(report)
    }

    /// Delete a user and everything they own: channels they created (with
    /// all posts in them, whoever wrote those), their posts, their replies
    /// and the subtrees under them, ratings they placed, and ratings others
    /// placed on any of the removed content.
    pub fn delete_user(&self, user_id: i64) -> Result<CascadeReport> {
        let report = self.with_tx(|tx| {
            require(tx, "user", "SELECT 1 FROM users WHERE id = ?1", user_id)?;

            let channels = ids(tx, "SELECT id FROM channels WHERE created_by = ?1 ORDER BY id", user_id)?;
            let mut posts = ids(tx, "SELECT id FROM posts WHERE user_id = ?1 ORDER BY id", user_id)?;
            extend_unique(&mut posts, posts_of_channels(tx, &channels)?);

            let mut seeds = replies_of_posts(tx, &posts)?;
            seeds.extend(ids(tx, "SELECT id FROM replies WHERE user_id = ?1 ORDER BY id", user_id)?);

            let plan = Plan {
                user: Some(user_id),
                replies: reply_subtrees(tx, &seeds)?,
                posts,
                channels,
            };
            execute(tx, &plan)
        })?;

        info!("Deleted user {}: {}", user_id, report);
        Ok(report)
    }
}

fn require(conn: &Connection, entity: &'static str, sql: &str, id: i64) -> Result<()> {
    if exists(conn, sql, id)? {
        Ok(())
    } else {
        Err(StoreError::not_found(entity, id))
    }
}

fn ids(conn: &Connection, sql: &str, id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt
        .query_map([id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(rows)
}

fn strings(conn: &Connection, sql: &str, id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt
        .query_map([id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(rows)
}

fn extend_unique(into: &mut Vec<i64>, more: Vec<i64>) {
    let mut seen: HashSet<i64> = into.iter().copied().collect();
    into.extend(more.into_iter().filter(|id| seen.insert(*id)));
}

fn posts_of_channels(conn: &Connection, channels: &[i64]) -> Result<Vec<i64>> {
    let mut posts = Vec::new();
    for &channel_id in channels {
        posts.extend(ids(conn, "SELECT id FROM posts WHERE channel_id = ?1 ORDER BY id", channel_id)?);
    }
    Ok(posts)
}

fn replies_of_posts(conn: &Connection, posts: &[i64]) -> Result<Vec<i64>> {
    let mut replies = Vec::new();
    for &post_id in posts {
        replies.extend(ids(conn, "SELECT id FROM replies WHERE post_id = ?1 ORDER BY id", post_id)?);
    }
    Ok(replies)
}

/// Every reply under `seeds` (seeds included), in post-order.
///
/// Iterative depth-first walk over the `parent_reply_id` edges with an
/// explicit stack, so chain depth is bounded by memory only. The visited set
/// makes overlapping seeds (a seed nested under another seed) emit once; a
/// reply reached through an earlier seed has already been emitted before
/// any of its ancestors are.
fn reply_subtrees(conn: &Connection, seeds: &[i64]) -> Result<Vec<i64>> {
    let mut children =
        conn.prepare_cached("SELECT id FROM replies WHERE parent_reply_id = ?1 ORDER BY id")?;
    let mut visited: HashSet<i64> = HashSet::new();
    let mut order = Vec::new();
    let mut stack: Vec<(i64, bool)> = Vec::new();

    for &seed in seeds {
        stack.push((seed, false));

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }

            stack.push((id, true));
            let kids = children
                .query_map([id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            for kid in kids.into_iter().rev() {
                if !visited.contains(&kid) {
                    stack.push((kid, false));
                }
            }
        }
    }

    debug!("Collected {} replies from {} seeds", order.len(), seeds.len());
    Ok(order)
}

fn delete_each(conn: &Connection, sql: &str, targets: &[i64]) -> Result<usize> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut removed = 0;
    for &id in targets {
        removed += stmt.execute([id])?;
    }
    Ok(removed)
}

fn execute(conn: &Connection, plan: &Plan) -> Result<CascadeReport> {
    let mut report = CascadeReport::default();

    for &post_id in &plan.posts {
        report.image_urls.extend(strings(
            conn,
            "SELECT image_url FROM posts WHERE id = ?1 AND image_url IS NOT NULL",
            post_id,
        )?);
    }
    for &reply_id in &plan.replies {
        report.image_urls.extend(strings(
            conn,
            "SELECT image_url FROM replies WHERE id = ?1 AND image_url IS NOT NULL",
            reply_id,
        )?);
    }

    report.reply_ratings =
        delete_each(conn, "DELETE FROM reply_ratings WHERE reply_id = ?1", &plan.replies)?;
    if let Some(user_id) = plan.user {
        report.reply_ratings +=
            conn.execute("DELETE FROM reply_ratings WHERE user_id = ?1", [user_id])?;
    }

    report.replies = delete_each(conn, "DELETE FROM replies WHERE id = ?1", &plan.replies)?;

    report.post_ratings =
        delete_each(conn, "DELETE FROM post_ratings WHERE post_id = ?1", &plan.posts)?;
    if let Some(user_id) = plan.user {
        report.post_ratings +=
            conn.execute("DELETE FROM post_ratings WHERE user_id = ?1", [user_id])?;
    }

    report.posts = delete_each(conn, "DELETE FROM posts WHERE id = ?1", &plan.posts)?;
    report.channels = delete_each(conn, "DELETE FROM channels WHERE id = ?1", &plan.channels)?;

    if let Some(user_id) = plan.user {
        report.users = conn.execute("DELETE FROM users WHERE id = ?1", [user_id])?;
    }

    Ok(report)
}
