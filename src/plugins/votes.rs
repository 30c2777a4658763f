//! Vote ledger.
//!
//! The only writer of `votes` and of every target's `vote_count`. Each mutation
//! changes the vote row and the counter inside one unit of work, which keeps
//! `vote_count == Σ value` for every target.

use crate::board::Board;
use crate::core::error::{AuthFailure, BoardError, ConflictKind, is_unique_violation};
use crate::core::paging::{Page, PageRequest};
use crate::core::target::{self, TargetKind};
use crate::core::time;
use crate::plugins::notify::{Notification, NotificationKind};
use crate::plugins::quota;
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

#[derive(Parser, Debug)]
#[clap(name = "vote", about = "Cast, amend, retract and tally votes")]
pub struct VoteCli {
    /// Access token of the acting agent (required for writes).
    #[clap(long, env = "AGENTBOARD_TOKEN", global = true)]
    pub token: Option<String>,
    #[clap(subcommand)]
    pub command: VoteCommand,
}

#[derive(Subcommand, Debug)]
pub enum VoteCommand {
    /// Vote on a post or reply.
    Cast {
        #[clap(long, value_enum)]
        kind: TargetKind,
        #[clap(long)]
        target: String,
        /// +1 or -1
        #[clap(long, allow_negative_numbers = true)]
        value: i64,
    },
    /// Change the value of one of your votes.
    Amend {
        #[clap(long)]
        id: String,
        #[clap(long, allow_negative_numbers = true)]
        value: i64,
    },
    /// Withdraw one of your votes.
    Retract {
        #[clap(long)]
        id: String,
    },
    /// List the votes on a target.
    Tally {
        #[clap(long, value_enum)]
        kind: TargetKind,
        #[clap(long)]
        target: String,
        #[clap(long, default_value_t = 1)]
        page: u32,
        #[clap(long, default_value_t = 20)]
        page_size: u32,
    },
    /// Recompute a target's vote sum and compare it with its counter.
    Audit {
        #[clap(long, value_enum)]
        kind: TargetKind,
        #[clap(long)]
        target: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteValue {
    Up,
    Down,
}

impl VoteValue {
    pub fn get(self) -> i64 {
        match self {
            VoteValue::Up => 1,
            VoteValue::Down => -1,
        }
    }
}

impl TryFrom<i64> for VoteValue {
    type Error = BoardError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(VoteValue::Up),
            -1 => Ok(VoteValue::Down),
            other => Err(BoardError::ValidationError(format!(
                "vote value must be +1 or -1, got {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Vote {
    pub id: String,
    pub agent_id: String,
    pub target_kind: TargetKind,
    pub target_id: String,
    pub value: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VoteAudit {
    pub target_kind: TargetKind,
    pub target_id: String,
    pub vote_count: i64,
    pub vote_sum: i64,
    pub consistent: bool,
}

const VOTE_COLUMNS: &str =
    "id, agent_id, target_kind, target_id, value, created_at, updated_at";

fn vote_from_row(row: &Row<'_>) -> rusqlite::Result<Vote> {
    Ok(Vote {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        target_kind: row.get(2)?,
        target_id: row.get(3)?,
        value: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn find_for(
    conn: &Connection,
    agent_id: &str,
    kind: TargetKind,
    target_id: &str,
) -> Result<Option<Vote>, BoardError> {
    let sql = format!(
        "SELECT {} FROM votes WHERE agent_id = ?1 AND target_kind = ?2 AND target_id = ?3",
        VOTE_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![agent_id, kind, target_id], vote_from_row)
        .optional()?)
}

/// A vote owned by `agent_id`. Foreign votes are indistinguishable from missing ones.
fn owned_vote(conn: &Connection, agent_id: &str, vote_id: &str) -> Result<Vote, BoardError> {
    let sql = format!("SELECT {} FROM votes WHERE id = ?1", VOTE_COLUMNS);
    conn.query_row(&sql, params![vote_id], vote_from_row)
        .optional()?
        .filter(|vote| vote.agent_id == agent_id)
        .ok_or_else(|| BoardError::NotFound(format!("vote {}", vote_id)))
}

/// Record a first vote by `agent_id` on a live target and apply it to the counter.
pub fn cast(
    board: &Board,
    agent_id: &str,
    kind: TargetKind,
    target_id: &str,
    value: i64,
) -> Result<Vote, BoardError> {
    let value = VoteValue::try_from(value)?;
    let broker = board.broker();
    quota::ensure_allowed(broker, agent_id)?;

    let (vote, recipient) = broker.with_tx(agent_id, "vote.cast", |tx| {
        let target = target::require_live(tx, kind, target_id)?;
        if find_for(tx, agent_id, kind, target_id)?.is_some() {
            return Err(BoardError::Conflict(ConflictKind::AlreadyVoted));
        }
        quota::consume_in(tx, agent_id)?;

        let now = time::now_ms();
        let vote = Vote {
            id: time::new_id(),
            agent_id: agent_id.to_string(),
            target_kind: kind,
            target_id: target_id.to_string(),
            value: value.get(),
            created_at: now,
            updated_at: now,
        };
        tx.execute(
            "INSERT INTO votes (id, agent_id, target_kind, target_id, value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                vote.id,
                vote.agent_id,
                vote.target_kind,
                vote.target_id,
                vote.value,
                vote.created_at,
                vote.updated_at
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                BoardError::Conflict(ConflictKind::AlreadyVoted)
            } else {
                BoardError::from(e)
            }
        })?;
        target::apply_vote_delta(tx, kind, target_id, vote.value)?;
        Ok((vote, target.author_id))
    })?;

    board.notifier().dispatch(Notification::new(
        NotificationKind::VoteCast,
        &recipient,
        agent_id,
        kind,
        target_id,
    ));
    Ok(vote)
}

/// Change an existing vote's value and move the counter by the difference.
pub fn amend(
    board: &Board,
    agent_id: &str,
    vote_id: &str,
    new_value: i64,
) -> Result<Vote, BoardError> {
    let new_value = VoteValue::try_from(new_value)?.get();
    board.broker().with_tx(agent_id, "vote.amend", |tx| {
        let mut vote = owned_vote(tx, agent_id, vote_id)?;
        let delta = new_value - vote.value;
        let now = time::now_ms();
        tx.execute(
            "UPDATE votes SET value = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_value, now, vote.id],
        )?;
        target::apply_vote_delta(tx, vote.target_kind, &vote.target_id, delta)?;
        vote.value = new_value;
        vote.updated_at = now;
        Ok(vote)
    })
}

/// Delete a vote and take its value back out of the counter. Returns the removed vote.
pub fn retract(board: &Board, agent_id: &str, vote_id: &str) -> Result<Vote, BoardError> {
    board.broker().with_tx(agent_id, "vote.retract", |tx| {
        let vote = owned_vote(tx, agent_id, vote_id)?;
        tx.execute("DELETE FROM votes WHERE id = ?1", params![vote.id])?;
        target::apply_vote_delta(tx, vote.target_kind, &vote.target_id, -vote.value)?;
        Ok(vote)
    })
}

/// Votes on a target, oldest first.
pub fn tally(
    board: &Board,
    kind: TargetKind,
    target_id: &str,
    page: u32,
    page_size: u32,
) -> Result<Page<Vote>, BoardError> {
    let request = PageRequest::new(page, page_size);
    board.broker().read("vote.tally", |conn| {
        target::counters(conn, kind, target_id)?;
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM votes WHERE target_kind = ?1 AND target_id = ?2",
            params![kind, target_id],
            |row| row.get(0),
        )?;
        let sql = format!(
            "SELECT {} FROM votes WHERE target_kind = ?1 AND target_id = ?2
             ORDER BY created_at ASC, id ASC LIMIT ?3 OFFSET ?4",
            VOTE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let votes = stmt
            .query_map(
                params![kind, target_id, request.limit(), request.offset()],
                vote_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(votes, total, request))
    })
}

pub fn my_vote(
    board: &Board,
    agent_id: &str,
    kind: TargetKind,
    target_id: &str,
) -> Result<Option<Vote>, BoardError> {
    board
        .broker()
        .read("vote.mine", |conn| find_for(conn, agent_id, kind, target_id))
}

pub fn audit(board: &Board, kind: TargetKind, target_id: &str) -> Result<VoteAudit, BoardError> {
    board.broker().read("vote.audit", |conn| {
        let (vote_count, _) = target::counters(conn, kind, target_id)?;
        let vote_sum: i64 = conn.query_row(
            "SELECT COALESCE(SUM(value), 0) FROM votes WHERE target_kind = ?1 AND target_id = ?2",
            params![kind, target_id],
            |row| row.get(0),
        )?;
        Ok(VoteAudit {
            target_kind: kind,
            target_id: target_id.to_string(),
            vote_count,
            vote_sum,
            consistent: vote_count == vote_sum,
        })
    })
}

pub fn run_vote_cli(board: &Board, cli: VoteCli) -> Result<serde_json::Value, BoardError> {
    let principal = || match cli.token.as_deref() {
        Some(token) => board.authenticate(token),
        None => Err(BoardError::Auth(AuthFailure::Malformed)),
    };
    match cli.command {
        VoteCommand::Cast {
            kind,
            ref target,
            value,
        } => {
            let vote = cast(board, &principal()?, kind, target, value)?;
            Ok(time::command_envelope(
                "vote.cast",
                "ok",
                serde_json::json!({ "vote": vote }),
            ))
        }
        VoteCommand::Amend { ref id, value } => {
            let vote = amend(board, &principal()?, id, value)?;
            Ok(time::command_envelope(
                "vote.amend",
                "ok",
                serde_json::json!({ "vote": vote }),
            ))
        }
        VoteCommand::Retract { ref id } => {
            let vote = retract(board, &principal()?, id)?;
            Ok(time::command_envelope(
                "vote.retract",
                "ok",
                serde_json::json!({ "vote": vote }),
            ))
        }
        VoteCommand::Tally {
            kind,
            ref target,
            page,
            page_size,
        } => {
            let tally = tally(board, kind, target, page, page_size)?;
            Ok(time::command_envelope(
                "vote.tally",
                "ok",
                serde_json::json!({ "tally": tally }),
            ))
        }
        VoteCommand::Audit { kind, ref target } => {
            let report = audit(board, kind, target)?;
            Ok(time::command_envelope(
                "vote.audit",
                "ok",
                serde_json::json!({ "audit": report }),
            ))
        }
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "vote",
        "version": "0.1.0",
        "description": "Per-agent votes on posts and replies with denormalized counters",
        "commands": [
            { "name": "cast", "parameters": ["kind", "target", "value"], "quota": true },
            { "name": "amend", "parameters": ["id", "value"] },
            { "name": "retract", "parameters": ["id"] },
            { "name": "tally", "parameters": ["kind", "target", "page", "page_size"] },
            { "name": "audit", "parameters": ["kind", "target"] }
        ],
        "storage": ["board.db:votes", "board.db:posts", "board.db:replies"]
    })
}
