//! Per-agent daily write budget.
//!
//! `used_today` counts writes on `quota_day` (UTC). Consumption is one conditional
//! update executed inside the caller's unit of work, so the budget can never be
//! overrun, even by concurrent writers for the same agent.

use crate::board::Board;
use crate::core::broker::DbBroker;
use crate::core::error::BoardError;
use crate::core::time;
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(name = "quota", about = "Inspect and reset agent daily write budgets")]
pub struct QuotaCli {
    #[clap(subcommand)]
    pub command: QuotaCommand,
}

#[derive(Subcommand, Debug)]
pub enum QuotaCommand {
    /// Show an agent's budget for today.
    Status {
        #[clap(long)]
        agent: String,
    },
    /// Zero every agent's usage (run once per UTC day by the scheduler).
    Reset,
    /// Change an agent's daily limit.
    SetLimit {
        #[clap(long)]
        agent: String,
        #[clap(long)]
        limit: i64,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QuotaStatus {
    pub agent_id: String,
    pub daily_limit: i64,
    pub used_today: i64,
    pub remaining: i64,
    pub quota_day: String,
}

pub fn run_quota_cli(board: &Board, cli: QuotaCli) -> Result<serde_json::Value, BoardError> {
    let broker = board.broker();
    match cli.command {
        QuotaCommand::Status { agent } => {
            let status = status(broker, &agent)?;
            Ok(time::command_envelope(
                "quota.status",
                "ok",
                serde_json::json!({ "quota": status }),
            ))
        }
        QuotaCommand::Reset => {
            let reset = reset_all(broker)?;
            Ok(time::command_envelope(
                "quota.reset",
                "ok",
                serde_json::json!({ "agents_reset": reset }),
            ))
        }
        QuotaCommand::SetLimit { agent, limit } => {
            set_limit(broker, &agent, limit)?;
            Ok(time::command_envelope(
                "quota.set_limit",
                "ok",
                serde_json::json!({ "agent_id": agent, "daily_limit": limit }),
            ))
        }
    }
}

/// `used_today < daily_limit`, counting usage from an earlier day as zero.
pub fn check(broker: &DbBroker, agent_id: &str) -> Result<bool, BoardError> {
    broker.read("quota.check", |conn| check_in(conn, agent_id))
}

pub fn check_in(conn: &Connection, agent_id: &str) -> Result<bool, BoardError> {
    let status = status_in(conn, agent_id)?;
    Ok(status.used_today < status.daily_limit)
}

/// Take one unit of today's budget. Must run inside the unit of work that performs
/// the write it pays for; fails `QuotaExceeded` without changing anything when the
/// budget is spent.
pub fn consume_in(conn: &Connection, agent_id: &str) -> Result<(), BoardError> {
    let today = time::today_utc();
    let changed = conn.execute(
        "UPDATE agents
         SET used_today = CASE WHEN quota_day = ?2 THEN used_today + 1 ELSE 1 END,
             quota_day = ?2
         WHERE id = ?1
           AND deleted_at IS NULL
           AND (CASE WHEN quota_day = ?2 THEN used_today ELSE 0 END) < daily_limit",
        params![agent_id, today],
    )?;
    if changed == 1 {
        return Ok(());
    }
    let status = status_in(conn, agent_id)?;
    Err(BoardError::QuotaExceeded {
        agent_id: agent_id.to_string(),
        daily_limit: status.daily_limit,
    })
}

/// Zero `used_today` for every agent and move them to today's quota day.
pub fn reset_all(broker: &DbBroker) -> Result<usize, BoardError> {
    let today = time::today_utc();
    let reset = broker.with_tx("scheduler", "quota.reset_all", |tx| {
        Ok(tx.execute(
            "UPDATE agents SET used_today = 0, quota_day = ?1",
            params![today],
        )?)
    })?;
    info!(agents = reset, quota_day = %today, "daily quota reset");
    Ok(reset)
}

pub fn status(broker: &DbBroker, agent_id: &str) -> Result<QuotaStatus, BoardError> {
    broker.read("quota.status", |conn| status_in(conn, agent_id))
}

pub fn status_in(conn: &Connection, agent_id: &str) -> Result<QuotaStatus, BoardError> {
    let row: Option<(i64, i64, String)> = conn
        .query_row(
            "SELECT daily_limit, used_today, quota_day FROM agents
             WHERE id = ?1 AND deleted_at IS NULL",
            params![agent_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let (daily_limit, stored_used, stored_day) =
        row.ok_or_else(|| BoardError::NotFound(format!("agent {}", agent_id)))?;

    let today = time::today_utc();
    let used_today = if stored_day == today { stored_used } else { 0 };
    Ok(QuotaStatus {
        agent_id: agent_id.to_string(),
        daily_limit,
        used_today,
        remaining: (daily_limit - used_today).max(0),
        quota_day: today,
    })
}

pub fn set_limit(broker: &DbBroker, agent_id: &str, limit: i64) -> Result<(), BoardError> {
    if limit < 0 {
        return Err(BoardError::ValidationError(
            "daily limit must not be negative".to_string(),
        ));
    }
    broker.with_tx(agent_id, "quota.set_limit", |tx| {
        let changed = tx.execute(
            "UPDATE agents SET daily_limit = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![limit, agent_id],
        )?;
        if changed != 1 {
            return Err(BoardError::NotFound(format!("agent {}", agent_id)));
        }
        Ok(())
    })
}

/// Reject up front, before any unit of work is opened, when the budget is spent.
pub(crate) fn ensure_allowed(broker: &DbBroker, agent_id: &str) -> Result<(), BoardError> {
    let status = status(broker, agent_id)?;
    if status.used_today >= status.daily_limit {
        return Err(BoardError::QuotaExceeded {
            agent_id: agent_id.to_string(),
            daily_limit: status.daily_limit,
        });
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "quota",
        "version": "0.1.0",
        "description": "Per-agent daily write budget",
        "commands": [
            { "name": "status", "parameters": ["agent"] },
            { "name": "reset", "description": "Zero all usage counters (daily scheduler)" },
            { "name": "set-limit", "parameters": ["agent", "limit"] }
        ],
        "storage": ["board.db:agents"]
    })
}
