use crate::Database;
use crate::error::StoreError;
use crate::models::{ChannelRow, ChannelSnapshot, PostRow, ReplyRow, SearchRow, UserRow};
use crate::ratings::query_viewer_votes;
use anyhow::Result;
use rusqlite::{Connection, Row};
use tracing::debug;

impl Database {
    // -- Users --

    /// Insert a user and return its id. Fails with `StoreError::Conflict`
    /// when the username is taken.
    pub fn create_user(&self, username: &str, password_hash: &str, role: &str) -> Result<i64> {
        self.with_conn_mut(|conn| {
            if query_user_by_username(conn, username)?.is_some() {
                return Err(StoreError::Conflict(format!("username {}", username)).into());
            }
            conn.execute(
                "INSERT INTO users (username, password_hash, role) VALUES (?1, ?2, ?3)",
                (username, password_hash, role),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, password_hash, role, created_at FROM users WHERE id = ?1",
                [id],
                user_from_row,
            )
            .optional()
        })
    }

    /// Number of posts plus replies written by the user.
    pub fn contribution_count(&self, user_id: i64) -> Result<u64> {
        self.with_conn(|conn| {
            if !exists(conn, "SELECT 1 FROM users WHERE id = ?1", user_id)? {
                return Err(StoreError::not_found("user", user_id));
            }
            let count: i64 = conn.query_row(
                "SELECT (SELECT COUNT(*) FROM posts WHERE user_id = ?1)
                      + (SELECT COUNT(*) FROM replies WHERE user_id = ?1)",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    // -- Channels --

    pub fn create_channel(&self, name: &str, created_by: i64) -> Result<i64> {
        self.with_conn_mut(|conn| {
            ensure_user(conn, created_by)?;
            conn.execute(
                "INSERT INTO channels (name, created_by) VALUES (?1, ?2)",
                (name, created_by),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn list_channels(&self) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, created_by, created_at FROM channels ORDER BY id")?;
            let rows = stmt
                .query_map([], channel_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_channel(&self, id: i64) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, created_by, created_at FROM channels WHERE id = ?1",
                [id],
                channel_from_row,
            )
            .optional()
        })
    }

    // -- Posts & replies --

    pub fn create_post(
        &self,
        channel_id: i64,
        user_id: i64,
        content: &str,
        image_url: Option<&str>,
    ) -> Result<i64> {
        self.with_conn_mut(|conn| {
            ensure_user(conn, user_id)?;
            if !exists(conn, "SELECT 1 FROM channels WHERE id = ?1", channel_id)? {
                return Err(StoreError::not_found("channel", channel_id));
            }
            conn.execute(
                "INSERT INTO posts (channel_id, user_id, content, image_url) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![channel_id, user_id, content, image_url],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Insert a reply. A parent reply, when given, must exist under the same post.
    pub fn create_reply(
        &self,
        post_id: i64,
        parent_reply_id: Option<i64>,
        user_id: i64,
        content: &str,
        image_url: Option<&str>,
    ) -> Result<i64> {
        self.with_conn_mut(|conn| {
            ensure_user(conn, user_id)?;
            if !exists(conn, "SELECT 1 FROM posts WHERE id = ?1", post_id)? {
                return Err(StoreError::not_found("post", post_id));
            }

            if let Some(parent_id) = parent_reply_id {
                let parent_post: Option<i64> = conn
                    .query_row("SELECT post_id FROM replies WHERE id = ?1", [parent_id], |row| {
                        row.get(0)
                    })
                    .optional()?;
                match parent_post {
                    None => {
                        return Err(StoreError::Invalid(format!(
                            "parent reply {} does not exist",
                            parent_id
                        ))
                        .into());
                    }
                    Some(pid) if pid != post_id => {
                        return Err(StoreError::Invalid(format!(
                            "parent reply {} belongs to post {}, not {}",
                            parent_id, pid, post_id
                        ))
                        .into());
                    }
                    Some(_) => {}
                }
            }

            conn.execute(
                "INSERT INTO replies (post_id, parent_reply_id, user_id, content, image_url)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![post_id, parent_reply_id, user_id, content, image_url],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Posts of a channel with author names and vote tallies, newest first.
    pub fn channel_posts(&self, channel_id: i64) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| query_channel_posts(conn, channel_id))
    }

    /// Every reply under every post of a channel, oldest first with id as the
    /// tie-break, so siblings come out in creation order.
    pub fn channel_replies(&self, channel_id: i64) -> Result<Vec<ReplyRow>> {
        self.with_conn(|conn| query_channel_replies(conn, channel_id))
    }

    /// Everything a channel page is built from, read inside one transaction
    /// on one connection. A cascade committing mid-read is either fully
    /// visible or not at all.
    pub fn channel_snapshot(&self, channel_id: i64, viewer: Option<i64>) -> Result<ChannelSnapshot> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            if !exists(&tx, "SELECT 1 FROM channels WHERE id = ?1", channel_id)? {
                return Err(StoreError::not_found("channel", channel_id));
            }
            let posts = query_channel_posts(&tx, channel_id)?;
            let replies = query_channel_replies(&tx, channel_id)?;
            let votes = match viewer {
                Some(user_id) => Some(query_viewer_votes(&tx, user_id, channel_id)?),
                None => None,
            };

            tx.commit()?;
            Ok(ChannelSnapshot {
                posts,
                replies,
                votes,
            })
        })
    }

    // -- Search --

    /// Case-insensitive substring match over post and reply content.
    /// Returns (posts, replies), newest first, at most `limit` of each.
    pub fn search(&self, term: &str, limit: u32) -> Result<(Vec<SearchRow>, Vec<SearchRow>)> {
        let pattern = format!("%{}%", escape_like(term));
        debug!("Searching content for {:?}", term);

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.id, p.id, p.channel_id, u.username, p.content, p.created_at
                 FROM posts p
                 LEFT JOIN users u ON p.user_id = u.id
                 WHERE p.content LIKE ?1 ESCAPE '\\'
                 ORDER BY p.created_at DESC, p.id DESC
                 LIMIT ?2",
            )?;
            let posts = stmt
                .query_map(rusqlite::params![pattern, limit], search_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut stmt = conn.prepare(
                "SELECT r.id, r.post_id, p.channel_id, u.username, r.content, r.created_at
                 FROM replies r
                 JOIN posts p ON r.post_id = p.id
                 LEFT JOIN users u ON r.user_id = u.id
                 WHERE r.content LIKE ?1 ESCAPE '\\'
                 ORDER BY r.created_at DESC, r.id DESC
                 LIMIT ?2",
            )?;
            let replies = stmt
                .query_map(rusqlite::params![pattern, limit], search_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok((posts, replies))
        })
    }
}

fn query_channel_posts(conn: &Connection, channel_id: i64) -> Result<Vec<PostRow>> {
    // JOIN users to fetch the author name in the same query (no N+1)
    let mut stmt = conn.prepare(
        "SELECT p.id, p.channel_id, p.user_id, u.username, p.content, p.image_url, p.created_at,
                (SELECT COUNT(*) FROM post_ratings r WHERE r.post_id = p.id AND r.rating = 'up'),
                (SELECT COUNT(*) FROM post_ratings r WHERE r.post_id = p.id AND r.rating = 'down')
         FROM posts p
         LEFT JOIN users u ON p.user_id = u.id
         WHERE p.channel_id = ?1
         ORDER BY p.created_at DESC, p.id DESC",
    )?;

    let rows = stmt
        .query_map([channel_id], |row| {
            Ok(PostRow {
                id: row.get(0)?,
                channel_id: row.get(1)?,
                user_id: row.get(2)?,
                username: username_or_unknown(row, 3)?,
                content: row.get(4)?,
                image_url: row.get(5)?,
                created_at: row.get(6)?,
                upvotes: row.get(7)?,
                downvotes: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_channel_replies(conn: &Connection, channel_id: i64) -> Result<Vec<ReplyRow>> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.post_id, r.parent_reply_id, r.user_id, u.username, r.content,
                r.image_url, r.created_at,
                (SELECT COUNT(*) FROM reply_ratings rr WHERE rr.reply_id = r.id AND rr.rating = 'up'),
                (SELECT COUNT(*) FROM reply_ratings rr WHERE rr.reply_id = r.id AND rr.rating = 'down')
         FROM replies r
         JOIN posts p ON r.post_id = p.id
         LEFT JOIN users u ON r.user_id = u.id
         WHERE p.channel_id = ?1
         ORDER BY r.created_at ASC, r.id ASC",
    )?;

    let rows = stmt
        .query_map([channel_id], |row| {
            Ok(ReplyRow {
                id: row.get(0)?,
                post_id: row.get(1)?,
                parent_reply_id: row.get(2)?,
                user_id: row.get(3)?,
                username: username_or_unknown(row, 4)?,
                content: row.get(5)?,
                image_url: row.get(6)?,
                created_at: row.get(7)?,
                upvotes: row.get(8)?,
                downvotes: row.get(9)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    conn.query_row(
        "SELECT id, username, password_hash, role, created_at FROM users WHERE username = ?1",
        [username],
        user_from_row,
    )
    .optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        role: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<ChannelRow> {
    Ok(ChannelRow {
        id: row.get(0)?,
        name: row.get(1)?,
        created_by: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn search_from_row(row: &Row<'_>) -> rusqlite::Result<SearchRow> {
    Ok(SearchRow {
        id: row.get(0)?,
        post_id: row.get(1)?,
        channel_id: row.get(2)?,
        username: username_or_unknown(row, 3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn username_or_unknown(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .unwrap_or_else(|| "unknown".to_string()))
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// True when `sql` (a `SELECT 1 ... WHERE id = ?1`) yields a row.
pub(crate) fn exists(conn: &Connection, sql: &str, id: i64) -> Result<bool> {
    Ok(conn.query_row(sql, [id], |_| Ok(())).optional()?.is_some())
}

/// Writers act on behalf of a token holder whose account may have been
/// deleted since the token was issued.
pub(crate) fn ensure_user(conn: &Connection, user_id: i64) -> Result<()> {
    if exists(conn, "SELECT 1 FROM users WHERE id = ?1", user_id)? {
        Ok(())
    } else {
        Err(StoreError::not_found("user", user_id))
    }
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> (Database, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("alice", "hash", "user").unwrap();
        let channel = db.create_channel("general", user).unwrap();
        (db, user, channel)
    }

    #[test]
    fn duplicate_username_is_a_conflict() {
        let (db, _, _) = seed();
        let err = db.create_user("alice", "other", "user").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn deleted_authors_cannot_write() {
        let (db, user, channel) = seed();
        let post = db.create_post(channel, user, "hello", None).unwrap();
        let ghost = db.create_user("ghost", "hash", "user").unwrap();
        db.delete_user(ghost).unwrap();

        let errors = [
            db.create_channel("haunted", ghost).unwrap_err(),
            db.create_post(channel, ghost, "boo", None).unwrap_err(),
            db.create_reply(post, None, ghost, "boo", None).unwrap_err(),
        ];
        for err in errors {
            assert!(matches!(
                err.downcast_ref::<StoreError>(),
                Some(StoreError::NotFound { entity: "user", .. })
            ));
        }
    }

    #[test]
    fn channel_snapshot_carries_posts_replies_and_viewer_votes() {
        let (db, user, channel) = seed();
        let post = db.create_post(channel, user, "hello", None).unwrap();
        let reply = db.create_reply(post, None, user, "hi", None).unwrap();
        db.rate_reply(user, reply, Some(devtalk_types::models::Rating::Up)).unwrap();

        let anonymous = db.channel_snapshot(channel, None).unwrap();
        assert_eq!(anonymous.posts.len(), 1);
        assert_eq!(anonymous.replies.len(), 1);
        assert!(anonymous.votes.is_none());

        let viewed = db.channel_snapshot(channel, Some(user)).unwrap();
        let votes = viewed.votes.unwrap();
        assert!(votes.posts.is_empty());
        assert_eq!(votes.replies.len(), 1);

        let err = db.channel_snapshot(999, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound { entity: "channel", id: 999 })
        ));
    }

    #[test]
    fn read_transaction_hides_a_cascade_committed_mid_read() {
        let path = std::env::temp_dir().join(format!("devtalk-snapshot-{}.db", std::process::id()));
        let cleanup = |path: &std::path::Path| {
            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
            }
        };
        cleanup(&path);
        let db = Database::open(&path).unwrap();
        let user = db.create_user("alice", "hash", "user").unwrap();
        let channel = db.create_channel("general", user).unwrap();
        let post = db.create_post(channel, user, "hello", None).unwrap();
        db.create_reply(post, None, user, "hi", None).unwrap();

        let (posts, replies) = db
            .with_conn(|conn| {
                let tx = conn.unchecked_transaction()?;
                let posts = query_channel_posts(&tx, channel)?;
                // Writer commits while this reader's transaction is open.
                db.delete_post(post)?;
                let replies = query_channel_replies(&tx, channel)?;
                tx.commit()?;
                Ok((posts, replies))
            })
            .unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(replies.len(), 1);

        let after = db.channel_snapshot(channel, None).unwrap();
        assert!(after.posts.is_empty() && after.replies.is_empty());

        drop(db);
        cleanup(&path);
    }

    #[test]
    fn post_in_missing_channel_is_not_found() {
        let (db, user, _) = seed();
        let err = db.create_post(999, user, "hello", None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound { entity: "channel", id: 999 })
        ));
    }

    #[test]
    fn reply_parent_must_share_the_post() {
        let (db, user, channel) = seed();
        let p1 = db.create_post(channel, user, "first", None).unwrap();
        let p2 = db.create_post(channel, user, "second", None).unwrap();
        let r1 = db.create_reply(p1, None, user, "on first", None).unwrap();

        let err = db.create_reply(p2, Some(r1), user, "cross", None).unwrap_err();
        assert!(matches!(err.downcast_ref::<StoreError>(), Some(StoreError::Invalid(_))));

        let err = db.create_reply(p1, Some(12345), user, "dangling", None).unwrap_err();
        assert!(matches!(err.downcast_ref::<StoreError>(), Some(StoreError::Invalid(_))));

        assert!(db.create_reply(p1, Some(r1), user, "nested", None).is_ok());
    }

    #[test]
    fn same_post_trigger_backs_up_the_check() {
        let (db, user, channel) = seed();
        let p1 = db.create_post(channel, user, "first", None).unwrap();
        let p2 = db.create_post(channel, user, "second", None).unwrap();
        let r1 = db.create_reply(p1, None, user, "on first", None).unwrap();

        let raw = db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO replies (post_id, parent_reply_id, user_id, content) VALUES (?1, ?2, ?3, 'x')",
                (p2, r1, user),
            )?;
            Ok(())
        });
        assert!(raw.is_err());
    }

    #[test]
    fn channel_replies_come_back_oldest_first() {
        let (db, user, channel) = seed();
        let post = db.create_post(channel, user, "hello", None).unwrap();
        let a = db.create_reply(post, None, user, "a", None).unwrap();
        let b = db.create_reply(post, Some(a), user, "b", None).unwrap();
        let c = db.create_reply(post, None, user, "c", None).unwrap();

        let ids: Vec<i64> = db.channel_replies(channel).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn channel_posts_carry_author_and_counts() {
        let (db, user, channel) = seed();
        let bob = db.create_user("bob", "hash", "user").unwrap();
        let older = db.create_post(channel, user, "older", None).unwrap();
        let newer = db.create_post(channel, bob, "newer", None).unwrap();
        db.rate_post(bob, older, Some(devtalk_types::models::Rating::Up)).unwrap();

        let posts = db.channel_posts(channel).unwrap();
        assert_eq!(posts.iter().map(|p| p.id).collect::<Vec<_>>(), vec![newer, older]);
        assert_eq!(posts[0].username, "bob");
        assert_eq!(posts[1].upvotes, 1);
        assert_eq!(posts[1].downvotes, 0);
    }

    #[test]
    fn search_escapes_wildcards() {
        let (db, user, channel) = seed();
        let post = db.create_post(channel, user, "100% Rust", None).unwrap();
        db.create_post(channel, user, "1000 lines", None).unwrap();
        db.create_reply(post, None, user, "rust is great", None).unwrap();

        let (posts, replies) = db.search("0%", 50).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, post);
        assert!(replies.is_empty());

        let (posts, replies) = db.search("RUST", 50).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].post_id, post);
    }

    #[test]
    fn contribution_count_sums_posts_and_replies() {
        let (db, user, channel) = seed();
        let post = db.create_post(channel, user, "one", None).unwrap();
        db.create_reply(post, None, user, "two", None).unwrap();
        assert_eq!(db.contribution_count(user).unwrap(), 2);
        assert!(db.contribution_count(4242).is_err());
    }
}
