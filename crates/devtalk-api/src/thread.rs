//! Reply tree construction.
//!
//! Replies arrive as one flat, creation-ordered list for a whole channel.
//! They are kept in an arena (the input `Vec`) and linked by index: one
//! hash lookup per reply finds its parent, so building is linear in the
//! number of replies and never recurses.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use devtalk_db::models::{PostRow, ReplyRow, ViewerVotes};
use devtalk_types::api::{PostThread, ReplyNode};

/// Attach each post's reply forest and, when a viewer is known, their own votes.
/// Post order is kept as given; replies keep their input order at every level.
pub fn build_threads(
    posts: Vec<PostRow>,
    replies: Vec<ReplyRow>,
    votes: Option<&ViewerVotes>,
) -> Vec<PostThread> {
    let mut forests = build_forests(replies, votes);

    posts
        .into_iter()
        .map(|post| {
            let user_rating = votes.and_then(|v| v.posts.get(&post.id).copied());
            let created_at = parse_timestamp(&post.created_at);
            let replies = forests.remove(&post.id).unwrap_or_default();
            PostThread {
                id: post.id,
                channel_id: post.channel_id,
                user_id: post.user_id,
                username: post.username,
                content: post.content,
                image_url: post.image_url,
                created_at,
                upvotes: post.upvotes,
                downvotes: post.downvotes,
                user_rating,
                replies,
            }
        })
        .collect()
}

/// Top-level replies per post id, each carrying its nested replies.
///
/// A reply whose parent is not among the same post's rows is dropped along
/// with everything beneath it.
fn build_forests(rows: Vec<ReplyRow>, votes: Option<&ViewerVotes>) -> HashMap<i64, Vec<ReplyNode>> {
    let index: HashMap<i64, usize> = rows.iter().enumerate().map(|(i, r)| (r.id, i)).collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); rows.len()];
    let mut roots: HashMap<i64, Vec<usize>> = HashMap::new();

    for (idx, row) in rows.iter().enumerate() {
        match row.parent_reply_id {
            None => roots.entry(row.post_id).or_default().push(idx),
            Some(parent_id) => match index.get(&parent_id) {
                Some(&parent) if parent != idx && rows[parent].post_id == row.post_id => {
                    children[parent].push(idx)
                }
                _ => warn!(
                    "Dropping reply {} on post {}: parent reply {} is not under the same post",
                    row.id, row.post_id, parent_id
                ),
            },
        }
    }

    let mut slots: Vec<Option<ReplyNode>> =
        rows.into_iter().map(|row| Some(to_node(row, votes))).collect();

    let mut forests = HashMap::with_capacity(roots.len());
    for (post_id, top) in roots {
        // Post-order: a node is finished only after all of its children are.
        let mut stack: Vec<(usize, bool)> = top.iter().rev().map(|&i| (i, false)).collect();
        while let Some((idx, expanded)) = stack.pop() {
            if expanded {
                let kids: Vec<ReplyNode> =
                    children[idx].iter().filter_map(|&c| slots[c].take()).collect();
                if let Some(node) = slots[idx].as_mut() {
                    node.replies = kids;
                }
            } else {
                stack.push((idx, true));
                stack.extend(children[idx].iter().rev().map(|&c| (c, false)));
            }
        }

        let forest: Vec<ReplyNode> = top.iter().filter_map(|&i| slots[i].take()).collect();
        forests.insert(post_id, forest);
    }

    let unreachable = slots.iter().filter(|s| s.is_some()).count();
    if unreachable > 0 {
        warn!("Left {} replies out of the thread view", unreachable);
    }

    forests
}

fn to_node(row: ReplyRow, votes: Option<&ViewerVotes>) -> ReplyNode {
    let user_rating = votes.and_then(|v| v.replies.get(&row.id).copied());
    let created_at = parse_timestamp(&row.created_at);
    ReplyNode {
        id: row.id,
        post_id: row.post_id,
        parent_reply_id: row.parent_reply_id,
        user_id: row.user_id,
        username: row.username,
        content: row.content,
        image_url: row.image_url,
        created_at,
        upvotes: row.upvotes,
        downvotes: row.downvotes,
        user_rating,
        replies: Vec::new(),
    }
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone;
/// they are UTC.
pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc()))
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use devtalk_types::models::Rating;
    use std::collections::HashSet;

    fn post(id: i64) -> PostRow {
        PostRow {
            id,
            channel_id: 1,
            user_id: 1,
            username: "author".into(),
            content: format!("post {}", id),
            image_url: None,
            created_at: "2024-03-01 12:00:00".into(),
            upvotes: 0,
            downvotes: 0,
        }
    }

    fn reply(id: i64, post_id: i64, parent: Option<i64>) -> ReplyRow {
        ReplyRow {
            id,
            post_id,
            parent_reply_id: parent,
            user_id: 2,
            username: "replier".into(),
            content: format!("reply {}", id),
            image_url: None,
            created_at: format!("2024-03-01 12:{:02}:{:02}", (id / 60) % 60, id % 60),
            upvotes: 0,
            downvotes: 0,
        }
    }

    /// Depth-first (id, depth) listing of a forest.
    fn flatten(forest: &[ReplyNode]) -> Vec<(i64, usize)> {
        let mut out = Vec::new();
        let mut stack: Vec<(&ReplyNode, usize)> = forest.iter().rev().map(|n| (n, 0)).collect();
        while let Some((node, depth)) = stack.pop() {
            out.push((node.id, depth));
            stack.extend(node.replies.iter().rev().map(|c| (c, depth + 1)));
        }
        out
    }

    #[test]
    fn forest_round_trips_ids_and_depths() {
        // Deterministic forest: every 9th reply is top-level, the rest hang
        // off some earlier reply.
        let mut rows = Vec::new();
        let mut depth_of: HashMap<i64, usize> = HashMap::new();
        for id in 1..=300i64 {
            let parent = if id % 9 == 1 { None } else { Some(1 + (id * 7) % (id - 1)) };
            let depth = parent.map(|p| depth_of[&p] + 1).unwrap_or(0);
            depth_of.insert(id, depth);
            rows.push(reply(id, 10, parent));
        }

        let threads = build_threads(vec![post(10)], rows, None);
        let flat = flatten(&threads[0].replies);

        assert_eq!(flat.len(), 300);
        let ids: HashSet<i64> = flat.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids.len(), 300);
        for (id, depth) in flat {
            assert_eq!(depth, depth_of[&id], "reply {} at wrong depth", id);
        }
    }

    #[test]
    fn nesting_follows_parents_and_keeps_creation_order() {
        let rows = vec![reply(1, 10, None), reply(2, 10, Some(1)), reply(3, 10, None)];
        let threads = build_threads(vec![post(10)], rows, None);

        let top: Vec<i64> = threads[0].replies.iter().map(|r| r.id).collect();
        assert_eq!(top, vec![1, 3]);
        assert_eq!(threads[0].replies[0].replies.len(), 1);
        assert_eq!(threads[0].replies[0].replies[0].id, 2);
        assert!(threads[0].replies[1].replies.is_empty());
    }

    #[test]
    fn siblings_keep_input_order() {
        let rows = vec![
            reply(5, 10, None),
            reply(7, 10, Some(5)),
            reply(6, 10, Some(5)),
            reply(8, 10, Some(5)),
        ];
        let threads = build_threads(vec![post(10)], rows, None);
        let kids: Vec<i64> = threads[0].replies[0].replies.iter().map(|r| r.id).collect();
        assert_eq!(kids, vec![7, 6, 8]);
    }

    #[test]
    fn orphans_are_dropped_with_their_subtree() {
        let rows = vec![
            reply(1, 10, None),
            reply(2, 10, Some(999)),
            reply(3, 10, Some(2)),
            reply(4, 10, Some(1)),
        ];
        let threads = build_threads(vec![post(10)], rows, None);
        let flat = flatten(&threads[0].replies);
        assert_eq!(flat, vec![(1, 0), (4, 1)]);
    }

    #[test]
    fn parent_under_another_post_counts_as_missing() {
        let rows = vec![reply(1, 10, None), reply(2, 20, Some(1)), reply(3, 20, None)];
        let threads = build_threads(vec![post(10), post(20)], rows, None);

        assert_eq!(flatten(&threads[0].replies), vec![(1, 0)]);
        assert_eq!(flatten(&threads[1].replies), vec![(3, 0)]);
    }

    #[test]
    fn cycles_never_reach_the_output() {
        let rows = vec![
            reply(1, 10, None),
            reply(2, 10, Some(3)),
            reply(3, 10, Some(2)),
            reply(4, 10, Some(4)),
        ];
        let threads = build_threads(vec![post(10)], rows, None);
        assert_eq!(flatten(&threads[0].replies), vec![(1, 0)]);
    }

    #[test]
    fn replies_are_grouped_per_post_and_posts_keep_order() {
        let rows = vec![
            reply(1, 20, None),
            reply(2, 10, None),
            reply(3, 20, Some(1)),
            reply(4, 10, Some(2)),
        ];
        let threads = build_threads(vec![post(20), post(10), post(30)], rows, None);

        assert_eq!(threads.iter().map(|t| t.id).collect::<Vec<_>>(), vec![20, 10, 30]);
        assert_eq!(flatten(&threads[0].replies), vec![(1, 0), (3, 1)]);
        assert_eq!(flatten(&threads[1].replies), vec![(2, 0), (4, 1)]);
        assert!(threads[2].replies.is_empty());
    }

    #[test]
    fn viewer_votes_annotate_posts_and_nested_replies() {
        let mut votes = ViewerVotes::default();
        votes.posts.insert(10, Rating::Up);
        votes.replies.insert(2, Rating::Down);

        let rows = vec![reply(1, 10, None), reply(2, 10, Some(1))];
        let threads = build_threads(vec![post(10)], rows.clone(), Some(&votes));
        assert_eq!(threads[0].user_rating, Some(Rating::Up));
        assert_eq!(threads[0].replies[0].user_rating, None);
        assert_eq!(threads[0].replies[0].replies[0].user_rating, Some(Rating::Down));

        let anonymous = build_threads(vec![post(10)], rows, None);
        assert_eq!(anonymous[0].user_rating, None);
        assert_eq!(anonymous[0].replies[0].replies[0].user_rating, None);
    }

    #[test]
    fn long_chains_build_without_recursion() {
        let depth = 1_000i64;
        let rows: Vec<ReplyRow> = (1..=depth)
            .map(|id| reply(id, 10, if id == 1 { None } else { Some(id - 1) }))
            .collect();
        let threads = build_threads(vec![post(10)], rows, None);
        let flat = flatten(&threads[0].replies);
        assert_eq!(flat.len(), depth as usize);
        assert_eq!(flat.last(), Some(&(depth, depth as usize - 1)));
    }

    #[test]
    fn hello_thread_serializes_as_expected() {
        let mut hello = post(1);
        hello.username = "A".into();
        hello.content = "Hello".into();
        let mut hi = reply(1, 1, None);
        hi.username = "B".into();
        hi.content = "Hi".into();
        let mut hi_back = reply(2, 1, Some(1));
        hi_back.username = "A".into();
        hi_back.content = "Hi back".into();

        let threads = build_threads(vec![hello], vec![hi, hi_back], None);
        let json = serde_json::to_value(&threads).unwrap();

        assert_eq!(json.as_array().unwrap().len(), 1);
        let post = &json[0];
        assert_eq!(post["content"], "Hello");
        assert_eq!(post["upvotes"], 0);
        assert_eq!(post["downvotes"], 0);
        assert!(post["userRating"].is_null());

        let top = post["replies"].as_array().unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0]["content"], "Hi");
        assert!(top[0]["userRating"].is_null());

        let nested = top[0]["replies"].as_array().unwrap();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0]["content"], "Hi back");
        assert_eq!(nested[0]["parent_reply_id"], 1);
        assert!(nested[0]["replies"].as_array().unwrap().is_empty());
    }

    #[test]
    fn parses_sqlite_and_rfc3339_timestamps() {
        let sqlite = parse_timestamp("2024-03-01 12:34:56");
        assert_eq!(sqlite.to_rfc3339(), "2024-03-01T12:34:56+00:00");
        let rfc = parse_timestamp("2024-03-01T12:34:56Z");
        assert_eq!(rfc, sqlite);
        assert_eq!(parse_timestamp("yesterday"), DateTime::<Utc>::default());
    }
}
