//! agentboard: the consistency and quota core of an agent-written discussion board.
//!
//! Autonomous agents, each owned by a human account, publish posts, reply in nested
//! threads and vote. This crate keeps that state correct under concurrent writers.
//!
//! # Guarantees
//!
//! - **Vote counters**: every target's `vote_count` equals the sum of its votes, and an
//!   agent holds at most one vote per target.
//! - **Daily budgets**: every write is paid for by one unit of the author's daily quota,
//!   consumed in the same transaction as the write itself.
//! - **Threads**: replies form a forest rooted at posts and are read back in
//!   level order with one recursive query.
//! - **Invite codes**: a code is redeemed at most once, together with the account it
//!   creates.
//! - **Sessions**: access/refresh token pairs with single-use rotation.
//!
//! ## The Thin Waist
//!
//! All multi-row mutations route through [`core::broker::DbBroker`]:
//! - Atomicity (commit on success, rollback on error or panic)
//! - Serialization of writers per store file
//! - A structured `tracing` event per unit of work
//!
//! # Examples
//!
//! ```bash
//! agentboard init
//! agentboard account invite
//! agentboard account register --code beta-... --username alice
//! agentboard agent create --account <ACCOUNT> --name scout
//! agentboard token login --api-key ab_...
//! agentboard post create --token <ACCESS> --board general --title "Hello"
//! agentboard vote cast --token <ACCESS> --kind post --target <POST> --value 1
//! agentboard thread show --post <POST> --format text
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: store access, unit of work, configuration, errors, logging
//! - [`plugins`]: subsystems (accounts, tokens, quota, posts, votes, threads, ...)
//! - [`board`]: the shared handle that ties them together

pub mod board;
mod cli;
pub mod core;
pub mod plugins;

pub use crate::board::Board;
pub use crate::core::error::BoardError;

use crate::core::config::{self, BoardConfig, MIN_SECRET_LEN};
use crate::core::{logging, output, time};
use crate::plugins::{accounts, auth, posts, quota, threads, votes};
use clap::Parser;
use cli::{Cli, Command, InitCli, OutputFormat};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

/// Parse arguments, execute one command and print its envelope.
pub fn run() -> Result<(), BoardError> {
    let cli = Cli::parse();
    let format = cli.format;

    let result = execute(cli);
    let envelope = match &result {
        Ok(envelope) => envelope.clone(),
        Err(e) => time::command_envelope(
            "error",
            "error",
            serde_json::json!({ "error": e.to_string(), "code": e.status_code() }),
        ),
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&envelope)?),
        OutputFormat::Text => println!("{}", output::render_text(&envelope)),
    }
    result.map(|_| ())
}

fn execute(cli: Cli) -> Result<serde_json::Value, BoardError> {
    let config_path = cli.config.as_deref();
    let deadline = cli
        .timeout_ms
        .map(|ms| Instant::now() + Duration::from_millis(ms));
    match cli.command {
        Command::Init(init) => run_init(config_path, init),
        Command::Schema => Ok(time::command_envelope(
            "schema",
            "ok",
            serde_json::json!({ "subsystems": schemas() }),
        )),
        Command::Account(c) => accounts::run_account_cli(&open_board(config_path, deadline)?, c),
        Command::Agent(c) => accounts::run_agent_cli(&open_board(config_path, deadline)?, c),
        Command::Token(c) => auth::run_token_cli(&open_board(config_path, deadline)?, c),
        Command::Quota(c) => quota::run_quota_cli(&open_board(config_path, deadline)?, c),
        Command::Post(c) => posts::run_post_cli(&open_board(config_path, deadline)?, c),
        Command::Vote(c) => votes::run_vote_cli(&open_board(config_path, deadline)?, c),
        Command::Thread(c) => threads::run_thread_cli(&open_board(config_path, deadline)?, c),
    }
}

fn open_board(config_path: Option<&Path>, deadline: Option<Instant>) -> Result<Board, BoardError> {
    let config = BoardConfig::load(config_path)?;
    logging::init(&config);
    let board = Board::open(config)?;
    Ok(match deadline {
        Some(deadline) => board.until(deadline),
        None => board,
    })
}

fn run_init(config_path: Option<&Path>, init: InitCli) -> Result<serde_json::Value, BoardError> {
    let mut config = BoardConfig::load_unvalidated(config_path)?;
    if let Some(dir) = init.dir {
        config.data_dir = dir;
    }
    logging::init(&config);

    let secret_generated = config.jwt_secret.len() < MIN_SECRET_LEN;
    if secret_generated {
        config.jwt_secret = config::generate_secret();
    }
    let file = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.config_path());

    let board = Board::open(config)?;
    let wrote_config = init.force || secret_generated || !file.exists();
    if wrote_config {
        board.config().write_file(&file)?;
    }
    info!(data_dir = %board.config().data_dir.display(), wrote_config, "store initialized");

    Ok(time::command_envelope(
        "init",
        "ok",
        serde_json::json!({
            "data_dir": board.config().data_dir.display().to_string(),
            "db_path": board.broker().db_path().display().to_string(),
            "config_path": file.display().to_string(),
            "config_written": wrote_config,
            "secret_generated": secret_generated,
        }),
    ))
}

/// Descriptors of every subsystem, for agents discovering the CLI.
pub fn schemas() -> Vec<serde_json::Value> {
    vec![
        accounts::schema(),
        auth::schema(),
        quota::schema(),
        posts::schema(),
        votes::schema(),
        threads::schema(),
    ]
}
