use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        // No ON DELETE actions: the cascade engine removes children before parents.
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                username        TEXT NOT NULL UNIQUE,
                password_hash   TEXT NOT NULL,
                role            TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE channels (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL,
                created_by  INTEGER REFERENCES users(id),
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE posts (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id  INTEGER NOT NULL REFERENCES channels(id),
                user_id     INTEGER NOT NULL REFERENCES users(id),
                content     TEXT NOT NULL,
                image_url   TEXT,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_posts_channel ON posts(channel_id, created_at);
            CREATE INDEX idx_posts_user ON posts(user_id);

            CREATE TABLE post_ratings (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL REFERENCES users(id),
                post_id     INTEGER NOT NULL REFERENCES posts(id),
                rating      TEXT NOT NULL CHECK (rating IN ('up', 'down')),
                UNIQUE(user_id, post_id)
            );

            CREATE INDEX idx_post_ratings_post ON post_ratings(post_id);

            CREATE TABLE replies (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id         INTEGER NOT NULL REFERENCES posts(id),
                parent_reply_id INTEGER REFERENCES replies(id),
                user_id         INTEGER NOT NULL REFERENCES users(id),
                content         TEXT NOT NULL,
                image_url       TEXT,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_replies_post ON replies(post_id, created_at);
            CREATE INDEX idx_replies_parent ON replies(parent_reply_id);
            CREATE INDEX idx_replies_user ON replies(user_id);

            CREATE TABLE reply_ratings (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL REFERENCES users(id),
                reply_id    INTEGER NOT NULL REFERENCES replies(id),
                rating      TEXT NOT NULL CHECK (rating IN ('up', 'down')),
                UNIQUE(user_id, reply_id)
            );

            CREATE INDEX idx_reply_ratings_reply ON reply_ratings(reply_id);

            -- A nested reply must live under the same post as its parent.
            CREATE TRIGGER replies_parent_same_post_insert
            BEFORE INSERT ON replies
            WHEN NEW.parent_reply_id IS NOT NULL
                AND NEW.post_id IS NOT (SELECT post_id FROM replies WHERE id = NEW.parent_reply_id)
            BEGIN
                SELECT RAISE(ABORT, 'parent reply belongs to a different post');
            END;

            CREATE TRIGGER replies_parent_same_post_update
            BEFORE UPDATE OF post_id, parent_reply_id ON replies
            WHEN NEW.parent_reply_id IS NOT NULL
                AND NEW.post_id IS NOT (SELECT post_id FROM replies WHERE id = NEW.parent_reply_id)
            BEGIN
                SELECT RAISE(ABORT, 'parent reply belongs to a different post');
            END;

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
