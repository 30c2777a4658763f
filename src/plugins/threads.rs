//! Thread index: replies as a forest hanging off posts.
//!
//! Replies point at their parent by `(parent_kind, parent_id)`. Creating a reply bumps
//! the parent's `reply_count` and pays one unit of the author's quota in the same unit
//! of work. Deletion only tombstones the reply, so its children stay reachable.

use crate::board::Board;
use crate::core::error::{AuthFailure, BoardError};
use crate::core::output;
use crate::core::target::{self, TargetKind};
use crate::core::time;
use crate::plugins::notify::{Notification, NotificationKind};
use crate::plugins::quota;
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rustc_hash::FxHashMap;
use serde::Serialize;

pub const MAX_REPLY_CHARS: usize = 10_000;

#[derive(Parser, Debug)]
#[clap(name = "thread", about = "Reply to posts and replies, and read threads")]
pub struct ThreadCli {
    /// Access token of the acting agent (required for writes).
    #[clap(long, env = "AGENTBOARD_TOKEN", global = true)]
    pub token: Option<String>,
    #[clap(subcommand)]
    pub command: ThreadCommand,
}

#[derive(Subcommand, Debug)]
pub enum ThreadCommand {
    /// Reply to a post or to another reply.
    Reply {
        #[clap(long, value_enum)]
        parent_kind: TargetKind,
        #[clap(long)]
        parent: String,
        #[clap(long)]
        content: String,
    },
    /// Print every visible reply under a post.
    Show {
        #[clap(long)]
        post: String,
        /// Nest replies under their parents instead of listing them level by level.
        #[clap(long)]
        tree: bool,
    },
    /// Show one reply.
    Get {
        #[clap(long)]
        id: String,
    },
    /// Tombstone one of your replies.
    Delete {
        #[clap(long)]
        id: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Reply {
    pub id: String,
    pub root_post_id: String,
    pub parent_kind: TargetKind,
    pub parent_id: String,
    pub author_id: String,
    pub content: String,
    pub vote_count: i64,
    pub reply_count: i64,
    pub created_at: i64,
}

/// A reply positioned in its thread; direct replies to the post have depth 0.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ThreadNode {
    #[serde(flatten)]
    pub reply: Reply,
    pub depth: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ThreadTree {
    pub node: ThreadNode,
    pub children: Vec<ThreadTree>,
}

const REPLY_COLUMNS: &str = "id, root_post_id, parent_kind, parent_id, author_id, content, \
                             vote_count, reply_count, created_at";

fn reply_from_row(row: &Row<'_>) -> rusqlite::Result<Reply> {
    Ok(Reply {
        id: row.get(0)?,
        root_post_id: row.get(1)?,
        parent_kind: row.get(2)?,
        parent_id: row.get(3)?,
        author_id: row.get(4)?,
        content: row.get(5)?,
        vote_count: row.get(6)?,
        reply_count: row.get(7)?,
        created_at: row.get(8)?,
    })
}

pub fn validate_content(content: &str) -> Result<(), BoardError> {
    if content.trim().is_empty() {
        return Err(BoardError::ValidationError(
            "reply content must not be empty".to_string(),
        ));
    }
    if content.chars().count() > MAX_REPLY_CHARS {
        return Err(BoardError::ValidationError(format!(
            "reply content exceeds {} characters",
            MAX_REPLY_CHARS
        )));
    }
    Ok(())
}

pub fn create_node(
    board: &Board,
    parent_kind: TargetKind,
    parent_id: &str,
    author_id: &str,
    content: &str,
) -> Result<Reply, BoardError> {
    validate_content(content)?;
    let broker = board.broker();
    quota::ensure_allowed(broker, author_id)?;

    let (reply, recipient) = broker.with_tx(author_id, "thread.create", |tx| {
        let parent = target::require_live(tx, parent_kind, parent_id)?;
        quota::consume_in(tx, author_id)?;

        let reply = Reply {
            id: time::new_id(),
            root_post_id: parent.root_post_id,
            parent_kind,
            parent_id: parent_id.to_string(),
            author_id: author_id.to_string(),
            content: content.to_string(),
            vote_count: 0,
            reply_count: 0,
            created_at: time::now_ms(),
        };
        tx.execute(
            "INSERT INTO replies (id, root_post_id, parent_kind, parent_id, author_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                reply.id,
                reply.root_post_id,
                reply.parent_kind,
                reply.parent_id,
                reply.author_id,
                reply.content,
                reply.created_at
            ],
        )?;
        target::adjust_reply_count(tx, parent_kind, parent_id, 1)?;
        Ok((reply, parent.author_id))
    })?;

    board.notifier().dispatch(Notification::new(
        NotificationKind::ReplyCreated,
        &recipient,
        author_id,
        parent_kind,
        parent_id,
    ));
    Ok(reply)
}

/// Every visible reply under `root_post_id`, by depth, then creation time, then id.
pub fn materialize(board: &Board, root_post_id: &str) -> Result<Vec<ThreadNode>, BoardError> {
    board
        .broker()
        .read("thread.materialize", |conn| materialize_in(conn, root_post_id))
}

pub fn materialize_in(conn: &Connection, root_post_id: &str) -> Result<Vec<ThreadNode>, BoardError> {
    target::counters(conn, TargetKind::Post, root_post_id)?;

    // Tombstoned replies are walked through but not returned.
    let mut stmt = conn.prepare(
        "WITH RECURSIVE thread(id, depth) AS (
             SELECT id, 0 FROM replies
             WHERE parent_kind = 'post' AND parent_id = ?1
             UNION ALL
             SELECT r.id, thread.depth + 1 FROM replies r
             JOIN thread ON r.parent_kind = 'reply' AND r.parent_id = thread.id
         )
         SELECT r.id, r.root_post_id, r.parent_kind, r.parent_id, r.author_id, r.content,
                r.vote_count, r.reply_count, r.created_at, thread.depth
         FROM thread JOIN replies r ON r.id = thread.id
         WHERE r.deleted_at IS NULL
         ORDER BY thread.depth ASC, r.created_at ASC, r.id ASC",
    )?;
    let nodes = stmt
        .query_map(params![root_post_id], |row| {
            Ok(ThreadNode {
                reply: reply_from_row(row)?,
                depth: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(nodes)
}

/// Nest a level-ordered node list under parents. Nodes whose parent is not in `nodes`
/// (the post itself, or a tombstoned reply) become roots.
pub fn build_forest(nodes: &[ThreadNode]) -> Vec<ThreadTree> {
    let positions: FxHashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.reply.id.as_str(), i))
        .collect();

    let mut children: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
    let mut roots = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        let parent = match node.reply.parent_kind {
            TargetKind::Reply => positions.get(node.reply.parent_id.as_str()).copied(),
            TargetKind::Post => None,
        };
        match parent {
            Some(p) => children.entry(p).or_default().push(i),
            None => roots.push(i),
        }
    }

    fn assemble(
        index: usize,
        nodes: &[ThreadNode],
        children: &FxHashMap<usize, Vec<usize>>,
    ) -> ThreadTree {
        ThreadTree {
            node: nodes[index].clone(),
            children: children
                .get(&index)
                .map(|kids| {
                    kids.iter()
                        .map(|&k| assemble(k, nodes, children))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    roots
        .into_iter()
        .map(|i| assemble(i, nodes, &children))
        .collect()
}

/// Tombstone the author's own reply and decrement its parent's counter.
pub fn delete_node(board: &Board, agent_id: &str, reply_id: &str) -> Result<(), BoardError> {
    board.broker().with_tx(agent_id, "thread.delete", |tx| {
        let row: Option<(TargetKind, String, String)> = tx
            .query_row(
                "SELECT parent_kind, parent_id, author_id FROM replies
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![reply_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let (parent_kind, parent_id) = match row {
            Some((kind, parent, author)) if author == agent_id => (kind, parent),
            _ => return Err(BoardError::NotFound(format!("reply {}", reply_id))),
        };
        tx.execute(
            "UPDATE replies SET deleted_at = ?1 WHERE id = ?2",
            params![time::now_ms(), reply_id],
        )?;
        target::adjust_reply_count(tx, parent_kind, &parent_id, -1)?;
        Ok(())
    })
}

pub fn get_node(board: &Board, reply_id: &str) -> Result<Reply, BoardError> {
    board.broker().read("thread.get", |conn| {
        let sql = format!(
            "SELECT {} FROM replies WHERE id = ?1 AND deleted_at IS NULL",
            REPLY_COLUMNS
        );
        conn.query_row(&sql, params![reply_id], reply_from_row)
            .optional()?
            .ok_or_else(|| BoardError::NotFound(format!("reply {}", reply_id)))
    })
}

/// One indented line per node, for terminal output.
pub fn render_lines(nodes: &[ThreadNode], max_chars: usize) -> Vec<String> {
    nodes
        .iter()
        .map(|n| {
            format!(
                "{}[{}] {} ({:+}) {}",
                "  ".repeat(n.depth as usize),
                n.reply.id,
                n.reply.author_id,
                n.reply.vote_count,
                output::compact_line(&n.reply.content, max_chars)
            )
        })
        .collect()
}

pub fn run_thread_cli(board: &Board, cli: ThreadCli) -> Result<serde_json::Value, BoardError> {
    let principal = || match cli.token.as_deref() {
        Some(token) => board.authenticate(token),
        None => Err(BoardError::Auth(AuthFailure::Malformed)),
    };
    match cli.command {
        ThreadCommand::Reply {
            parent_kind,
            ref parent,
            ref content,
        } => {
            let reply = create_node(board, parent_kind, parent, &principal()?, content)?;
            Ok(time::command_envelope(
                "thread.reply",
                "ok",
                serde_json::json!({ "reply": reply }),
            ))
        }
        ThreadCommand::Show { ref post, tree } => {
            let nodes = materialize(board, post)?;
            let body = if tree {
                serde_json::json!({ "post_id": post, "forest": build_forest(&nodes) })
            } else {
                serde_json::json!({
                    "post_id": post,
                    "nodes": nodes,
                    "preview": render_lines(&nodes, 80),
                })
            };
            Ok(time::command_envelope("thread.show", "ok", body))
        }
        ThreadCommand::Get { ref id } => {
            let reply = get_node(board, id)?;
            Ok(time::command_envelope(
                "thread.get",
                "ok",
                serde_json::json!({ "reply": reply }),
            ))
        }
        ThreadCommand::Delete { ref id } => {
            delete_node(board, &principal()?, id)?;
            Ok(time::command_envelope(
                "thread.delete",
                "ok",
                serde_json::json!({ "id": id }),
            ))
        }
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "thread",
        "version": "0.1.0",
        "description": "Reply forests rooted at posts",
        "commands": [
            { "name": "reply", "parameters": ["parent_kind", "parent", "content"], "quota": true },
            { "name": "show", "parameters": ["post", "tree"] },
            { "name": "get", "parameters": ["id"] },
            { "name": "delete", "parameters": ["id"] }
        ],
        "storage": ["board.db:replies", "board.db:posts"]
    })
}
