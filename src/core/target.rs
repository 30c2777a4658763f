//! Polymorphic vote/thread targets.
//!
//! A target is a Post or a Reply addressed by `(kind, id)`. Both tables carry the
//! denormalized `vote_count` and `reply_count` columns; only the helpers here touch them.

use crate::core::error::BoardError;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Post,
    Reply,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Post => "post",
            TargetKind::Reply => "reply",
        }
    }

    fn table(self) -> &'static str {
        match self {
            TargetKind::Post => "posts",
            TargetKind::Reply => "replies",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "post" => Ok(TargetKind::Post),
            "reply" => Ok(TargetKind::Reply),
            other => Err(BoardError::InvalidTarget(other.to_string())),
        }
    }
}

impl ToSql for TargetKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TargetKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        raw.parse::<TargetKind>()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Snapshot of a live (non-tombstoned) target row.
#[derive(Debug, Clone, Serialize)]
pub struct TargetRef {
    pub kind: TargetKind,
    pub id: String,
    pub author_id: String,
    pub root_post_id: String,
    pub vote_count: i64,
    pub reply_count: i64,
}

pub fn fetch_live(
    conn: &Connection,
    kind: TargetKind,
    id: &str,
) -> Result<Option<TargetRef>, BoardError> {
    let root_col = match kind {
        TargetKind::Post => "id",
        TargetKind::Reply => "root_post_id",
    };
    let sql = format!(
        "SELECT author_id, {}, vote_count, reply_count FROM {} WHERE id = ?1 AND deleted_at IS NULL",
        root_col,
        kind.table()
    );
    let row = conn
        .query_row(&sql, params![id], |row| {
            Ok(TargetRef {
                kind,
                id: id.to_string(),
                author_id: row.get(0)?,
                root_post_id: row.get(1)?,
                vote_count: row.get(2)?,
                reply_count: row.get(3)?,
            })
        })
        .optional()?;
    Ok(row)
}

pub fn require_live(conn: &Connection, kind: TargetKind, id: &str) -> Result<TargetRef, BoardError> {
    fetch_live(conn, kind, id)?
        .ok_or_else(|| BoardError::NotFound(format!("{} {}", kind, id)))
}

/// Add `delta` to the target's `vote_count`. The row may be tombstoned: counters of a
/// deleted target still follow its votes.
pub fn apply_vote_delta(
    conn: &Connection,
    kind: TargetKind,
    id: &str,
    delta: i64,
) -> Result<(), BoardError> {
    if delta == 0 {
        return Ok(());
    }
    let sql = format!(
        "UPDATE {} SET vote_count = vote_count + ?1 WHERE id = ?2",
        kind.table()
    );
    let changed = conn.execute(&sql, params![delta, id])?;
    if changed != 1 {
        return Err(BoardError::NotFound(format!("{} {}", kind, id)));
    }
    Ok(())
}

/// Add `delta` to the target's `reply_count`, never letting it go below zero.
pub fn adjust_reply_count(
    conn: &Connection,
    kind: TargetKind,
    id: &str,
    delta: i64,
) -> Result<(), BoardError> {
    let sql = format!(
        "UPDATE {} SET reply_count = MAX(reply_count + ?1, 0) WHERE id = ?2",
        kind.table()
    );
    let changed = conn.execute(&sql, params![delta, id])?;
    if changed != 1 {
        return Err(BoardError::NotFound(format!("{} {}", kind, id)));
    }
    Ok(())
}

/// Read the counters of a target regardless of tombstone state.
pub fn counters(conn: &Connection, kind: TargetKind, id: &str) -> Result<(i64, i64), BoardError> {
    let sql = format!(
        "SELECT vote_count, reply_count FROM {} WHERE id = ?1",
        kind.table()
    );
    conn.query_row(&sql, params![id], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?
        .ok_or_else(|| BoardError::NotFound(format!("{} {}", kind, id)))
}
