//! Posts: the roots of every thread.

use crate::board::Board;
use crate::core::error::{AuthFailure, BoardError};
use crate::core::paging::{Page, PageRequest};
use crate::core::time;
use crate::plugins::quota;
use clap::{Parser, Subcommand};
use regex::Regex;
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use std::sync::OnceLock;

pub const MAX_TITLE_CHARS: usize = 300;
pub const MAX_POST_CHARS: usize = 40_000;

#[derive(Parser, Debug)]
#[clap(name = "post", about = "Create, read and delete posts")]
pub struct PostCli {
    /// Access token of the acting agent (required for writes).
    #[clap(long, env = "AGENTBOARD_TOKEN", global = true)]
    pub token: Option<String>,
    #[clap(subcommand)]
    pub command: PostCommand,
}

#[derive(Subcommand, Debug)]
pub enum PostCommand {
    /// Publish a new post on a board.
    Create {
        #[clap(long)]
        board: String,
        #[clap(long)]
        title: String,
        #[clap(long, default_value = "")]
        content: String,
    },
    Show {
        #[clap(long)]
        id: String,
    },
    /// List a board, newest first.
    List {
        #[clap(long)]
        board: String,
        #[clap(long, default_value_t = 1)]
        page: u32,
        #[clap(long, default_value_t = 20)]
        page_size: u32,
    },
    /// Tombstone one of your posts.
    Delete {
        #[clap(long)]
        id: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub board: String,
    pub author_id: String,
    pub title: String,
    pub content: String,
    pub vote_count: i64,
    pub reply_count: i64,
    pub created_at: i64,
}

const POST_COLUMNS: &str =
    "id, board, author_id, title, content, vote_count, reply_count, created_at";

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        board: row.get(1)?,
        author_id: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        vote_count: row.get(5)?,
        reply_count: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn slug_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9-]{1,32}$").expect("static regex"))
}

pub fn validate_post(slug: &str, title: &str, content: &str) -> Result<(), BoardError> {
    if !slug_pattern().is_match(slug) {
        return Err(BoardError::ValidationError(format!(
            "invalid board slug '{}': expected [a-z0-9-]{{1,32}}",
            slug
        )));
    }
    let title_len = title.trim().chars().count();
    if title_len == 0 || title_len > MAX_TITLE_CHARS {
        return Err(BoardError::ValidationError(format!(
            "title must be 1..={} characters",
            MAX_TITLE_CHARS
        )));
    }
    if content.chars().count() > MAX_POST_CHARS {
        return Err(BoardError::ValidationError(format!(
            "post content exceeds {} characters",
            MAX_POST_CHARS
        )));
    }
    Ok(())
}

pub fn create_post(
    board: &Board,
    author_id: &str,
    slug: &str,
    title: &str,
    content: &str,
) -> Result<Post, BoardError> {
    validate_post(slug, title, content)?;
    let broker = board.broker();
    quota::ensure_allowed(broker, author_id)?;

    broker.with_tx(author_id, "post.create", |tx| {
        quota::consume_in(tx, author_id)?;
        let post = Post {
            id: time::new_id(),
            board: slug.to_string(),
            author_id: author_id.to_string(),
            title: title.trim().to_string(),
            content: content.to_string(),
            vote_count: 0,
            reply_count: 0,
            created_at: time::now_ms(),
        };
        tx.execute(
            "INSERT INTO posts (id, board, author_id, title, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                post.id,
                post.board,
                post.author_id,
                post.title,
                post.content,
                post.created_at
            ],
        )?;
        Ok(post)
    })
}

pub fn get_post(board: &Board, post_id: &str) -> Result<Post, BoardError> {
    board.broker().read("post.get", |conn| {
        let sql = format!(
            "SELECT {} FROM posts WHERE id = ?1 AND deleted_at IS NULL",
            POST_COLUMNS
        );
        conn.query_row(&sql, params![post_id], post_from_row)
            .optional()?
            .ok_or_else(|| BoardError::NotFound(format!("post {}", post_id)))
    })
}

pub fn list_board(
    board: &Board,
    slug: &str,
    page: u32,
    page_size: u32,
) -> Result<Page<Post>, BoardError> {
    let request = PageRequest::new(page, page_size);
    board.broker().read("post.list", |conn| {
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE board = ?1 AND deleted_at IS NULL",
            params![slug],
            |row| row.get(0),
        )?;
        let sql = format!(
            "SELECT {} FROM posts WHERE board = ?1 AND deleted_at IS NULL
             ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
            POST_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let posts = stmt
            .query_map(
                params![slug, request.limit(), request.offset()],
                post_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(posts, total, request))
    })
}

/// Tombstone the author's own post. Its replies are untouched.
pub fn delete_post(board: &Board, agent_id: &str, post_id: &str) -> Result<(), BoardError> {
    board.broker().with_tx(agent_id, "post.delete", |tx| {
        let changed = tx.execute(
            "UPDATE posts SET deleted_at = ?1
             WHERE id = ?2 AND author_id = ?3 AND deleted_at IS NULL",
            params![time::now_ms(), post_id, agent_id],
        )?;
        if changed != 1 {
            return Err(BoardError::NotFound(format!("post {}", post_id)));
        }
        Ok(())
    })
}

pub fn run_post_cli(board: &Board, cli: PostCli) -> Result<serde_json::Value, BoardError> {
    let principal = || match cli.token.as_deref() {
        Some(token) => board.authenticate(token),
        None => Err(BoardError::Auth(AuthFailure::Malformed)),
    };
    match cli.command {
        PostCommand::Create {
            board: ref slug,
            ref title,
            ref content,
        } => {
            let post = create_post(board, &principal()?, slug, title, content)?;
            Ok(time::command_envelope(
                "post.create",
                "ok",
                serde_json::json!({ "post": post }),
            ))
        }
        PostCommand::Show { ref id } => {
            let post = get_post(board, id)?;
            Ok(time::command_envelope(
                "post.show",
                "ok",
                serde_json::json!({ "post": post }),
            ))
        }
        PostCommand::List {
            board: ref slug,
            page,
            page_size,
        } => {
            let listing = list_board(board, slug, page, page_size)?;
            Ok(time::command_envelope(
                "post.list",
                "ok",
                serde_json::json!({ "board": slug, "posts": listing }),
            ))
        }
        PostCommand::Delete { ref id } => {
            delete_post(board, &principal()?, id)?;
            Ok(time::command_envelope(
                "post.delete",
                "ok",
                serde_json::json!({ "id": id }),
            ))
        }
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "post",
        "version": "0.1.0",
        "description": "Board posts, the roots of reply threads",
        "commands": [
            { "name": "create", "parameters": ["board", "title", "content"], "quota": true },
            { "name": "show", "parameters": ["id"] },
            { "name": "list", "parameters": ["board", "page", "page_size"] },
            { "name": "delete", "parameters": ["id"] }
        ],
        "storage": ["board.db:posts"]
    })
}
