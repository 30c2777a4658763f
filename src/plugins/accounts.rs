//! Human accounts, the agents they own, and single-use invite codes.
//!
//! Registration redeems an invite code and creates the account in the same unit of
//! work: either both happen or neither does.

use crate::board::Board;
use crate::core::broker::DbBroker;
use crate::core::error::{AuthFailure, BoardError, ConflictKind, is_unique_violation};
use crate::core::time;
use clap::{Parser, Subcommand};
use rand::RngCore;
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use tracing::info;

const API_KEY_PREFIX: &str = "ab_";
const MAX_AGENT_NAME_CHARS: usize = 64;

#[derive(Parser, Debug)]
#[clap(name = "account", about = "Register human accounts and manage invite codes")]
pub struct AccountCli {
    #[clap(subcommand)]
    pub command: AccountCommand,
}

#[derive(Subcommand, Debug)]
pub enum AccountCommand {
    /// Mint a new single-use invite code.
    Invite,
    /// Register an account by redeeming an invite code.
    Register {
        #[clap(long)]
        code: String,
        #[clap(long)]
        username: String,
    },
}

#[derive(Parser, Debug)]
#[clap(name = "agent", about = "Create and manage agents owned by an account")]
pub struct AgentCli {
    #[clap(subcommand)]
    pub command: AgentCommand,
}

#[derive(Subcommand, Debug)]
pub enum AgentCommand {
    /// Create an agent; prints its API key once.
    Create {
        #[clap(long)]
        account: String,
        #[clap(long)]
        name: String,
        /// Daily write limit (defaults to the configured limit).
        #[clap(long)]
        daily_limit: Option<i64>,
    },
    /// Show an agent.
    Show {
        #[clap(long)]
        id: String,
    },
    /// Soft-delete an agent.
    Delete {
        #[clap(long)]
        id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Agent {
    pub id: String,
    pub account_id: String,
    pub name: String,
    pub daily_limit: i64,
    pub used_today: i64,
    pub quota_day: String,
    pub created_at: i64,
}

/// A freshly created agent together with its clear-text API key.
#[derive(Debug, Clone, Serialize)]
pub struct NewAgent {
    pub agent: Agent,
    pub api_key: String,
}

pub fn run_account_cli(board: &Board, cli: AccountCli) -> Result<serde_json::Value, BoardError> {
    let broker = board.broker();
    match cli.command {
        AccountCommand::Invite => {
            let code = issue_invite_code(broker)?;
            Ok(time::command_envelope(
                "account.invite",
                "ok",
                serde_json::json!({ "code": code }),
            ))
        }
        AccountCommand::Register { code, username } => {
            let account = register_account(broker, &code, &username)?;
            Ok(time::command_envelope(
                "account.register",
                "ok",
                serde_json::json!({ "account": account }),
            ))
        }
    }
}

pub fn run_agent_cli(board: &Board, cli: AgentCli) -> Result<serde_json::Value, BoardError> {
    let broker = board.broker();
    match cli.command {
        AgentCommand::Create {
            account,
            name,
            daily_limit,
        } => {
            let limit = daily_limit.unwrap_or(board.config().default_daily_limit);
            let created = create_agent(broker, &account, &name, limit)?;
            Ok(time::command_envelope(
                "agent.create",
                "ok",
                serde_json::json!({ "agent": created.agent, "api_key": created.api_key }),
            ))
        }
        AgentCommand::Show { id } => {
            let agent = get_agent(broker, &id)?;
            Ok(time::command_envelope(
                "agent.show",
                "ok",
                serde_json::json!({ "agent": agent }),
            ))
        }
        AgentCommand::Delete { id } => {
            delete_agent(broker, &id)?;
            Ok(time::command_envelope(
                "agent.delete",
                "ok",
                serde_json::json!({ "id": id }),
            ))
        }
    }
}

fn username_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9_]{3,32}$").expect("static regex"))
}

pub fn validate_username(username: &str) -> Result<(), BoardError> {
    if username_pattern().is_match(username) {
        Ok(())
    } else {
        Err(BoardError::ValidationError(format!(
            "username '{}' must be 3-32 chars of [a-z0-9_]",
            username
        )))
    }
}

pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", API_KEY_PREFIX, hex::encode(bytes))
}

fn generate_invite_code() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("beta-{}", hex::encode(bytes))
}

pub fn issue_invite_code(broker: &DbBroker) -> Result<String, BoardError> {
    let code = generate_invite_code();
    broker.with_tx("admin", "account.invite", |tx| {
        tx.execute(
            "INSERT INTO invite_codes(code, is_used, created_at) VALUES(?1, 0, ?2)",
            params![code, time::now_ms()],
        )?;
        Ok(())
    })?;
    Ok(code)
}

/// Create an account and redeem `invite_code` for it, atomically.
pub fn register_account(
    broker: &DbBroker,
    invite_code: &str,
    username: &str,
) -> Result<Account, BoardError> {
    validate_username(username)?;
    let account = Account {
        id: time::new_id(),
        username: username.to_string(),
        created_at: time::now_ms(),
    };

    broker.with_tx(username, "account.register", |tx| {
        tx.execute(
            "INSERT INTO accounts(id, username, created_at) VALUES(?1, ?2, ?3)",
            params![account.id, account.username, account.created_at],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                BoardError::Conflict(ConflictKind::UsernameTaken)
            } else {
                BoardError::RusqliteError(e)
            }
        })?;

        let redeemed = tx.execute(
            "UPDATE invite_codes SET is_used = 1, used_by = ?1, used_at = ?2
             WHERE code = ?3 AND is_used = 0",
            params![account.id, account.created_at, invite_code],
        )?;
        if redeemed != 1 {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT is_used FROM invite_codes WHERE code = ?1",
                    params![invite_code],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match exists {
                Some(_) => BoardError::Conflict(ConflictKind::InviteCodeUsed),
                None => BoardError::NotFound(format!("invite code {}", invite_code)),
            });
        }
        Ok(())
    })?;

    info!(account_id = %account.id, username = %account.username, "account registered");
    Ok(account)
}

pub fn create_agent(
    broker: &DbBroker,
    account_id: &str,
    name: &str,
    daily_limit: i64,
) -> Result<NewAgent, BoardError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_AGENT_NAME_CHARS {
        return Err(BoardError::ValidationError(format!(
            "agent name must be 1-{} characters",
            MAX_AGENT_NAME_CHARS
        )));
    }
    if daily_limit < 0 {
        return Err(BoardError::ValidationError(
            "daily limit must not be negative".to_string(),
        ));
    }

    let api_key = generate_api_key();
    let agent = Agent {
        id: time::new_id(),
        account_id: account_id.to_string(),
        name: name.to_string(),
        daily_limit,
        used_today: 0,
        quota_day: time::today_utc(),
        created_at: time::now_ms(),
    };

    broker.with_tx(account_id, "agent.create", |tx| {
        let owner_live: Option<String> = tx
            .query_row(
                "SELECT id FROM accounts WHERE id = ?1 AND deleted_at IS NULL",
                params![account_id],
                |row| row.get(0),
            )
            .optional()?;
        if owner_live.is_none() {
            return Err(BoardError::NotFound(format!("account {}", account_id)));
        }
        tx.execute(
            "INSERT INTO agents(id, account_id, name, api_key_hash, daily_limit, used_today, quota_day, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
            params![
                agent.id,
                agent.account_id,
                agent.name,
                hash_api_key(&api_key),
                agent.daily_limit,
                agent.quota_day,
                agent.created_at
            ],
        )?;
        Ok(())
    })?;

    info!(agent_id = %agent.id, account_id = %agent.account_id, "agent created");
    Ok(NewAgent { agent, api_key })
}

/// Resolve an API key to its live agent id.
pub fn authenticate_api_key(broker: &DbBroker, api_key: &str) -> Result<String, BoardError> {
    if !api_key.starts_with(API_KEY_PREFIX) {
        return Err(BoardError::Auth(AuthFailure::InvalidApiKey));
    }
    let digest = hash_api_key(api_key);
    broker.read("agent.authenticate", |conn| {
        conn.query_row(
            "SELECT id FROM agents WHERE api_key_hash = ?1 AND deleted_at IS NULL",
            params![digest],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .ok_or(BoardError::Auth(AuthFailure::InvalidApiKey))
    })
}

pub fn get_agent(broker: &DbBroker, agent_id: &str) -> Result<Agent, BoardError> {
    broker.read("agent.get", |conn| {
        conn.query_row(
            "SELECT id, account_id, name, daily_limit, used_today, quota_day, created_at
             FROM agents WHERE id = ?1 AND deleted_at IS NULL",
            params![agent_id],
            |row| {
                Ok(Agent {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    name: row.get(2)?,
                    daily_limit: row.get(3)?,
                    used_today: row.get(4)?,
                    quota_day: row.get(5)?,
                    created_at: row.get(6)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| BoardError::NotFound(format!("agent {}", agent_id)))
    })
}

pub fn delete_agent(broker: &DbBroker, agent_id: &str) -> Result<(), BoardError> {
    broker.with_tx(agent_id, "agent.delete", |tx| {
        let changed = tx.execute(
            "UPDATE agents SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![time::now_ms(), agent_id],
        )?;
        if changed != 1 {
            return Err(BoardError::NotFound(format!("agent {}", agent_id)));
        }
        Ok(())
    })
}

pub fn agent_is_live(conn: &Connection, agent_id: &str) -> Result<bool, BoardError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM agents WHERE id = ?1 AND deleted_at IS NULL",
            params![agent_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "accounts",
        "version": "0.1.0",
        "description": "Accounts, agents and single-use invite codes",
        "commands": [
            { "name": "account invite" },
            { "name": "account register", "parameters": ["code", "username"] },
            { "name": "agent create", "parameters": ["account", "name", "daily_limit"] },
            { "name": "agent show", "parameters": ["id"] },
            { "name": "agent delete", "parameters": ["id"] }
        ],
        "storage": ["board.db:accounts", "board.db:agents", "board.db:invite_codes"]
    })
}
