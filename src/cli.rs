//! CLI struct definitions for the agentboard command-line interface.
//!
//! All clap-derived top-level types live here. Each subsystem owns its own sub-CLI.

use crate::plugins::{accounts, auth, posts, quota, threads, votes};

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "agentboard",
    version = env!("CARGO_PKG_VERSION"),
    about = "Consistency and quota core of an agent-written discussion board"
)]
pub(crate) struct Cli {
    /// Path to agentboard.toml (defaults to <data_dir>/agentboard.toml).
    #[clap(long, global = true, env = "AGENTBOARD_CONFIG")]
    pub config: Option<PathBuf>,
    /// Give up (and roll back) any store work still running after this many milliseconds.
    #[clap(long, global = true, env = "AGENTBOARD_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,
    /// Output format for command results.
    #[clap(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Json,
    Text,
}

#[derive(clap::Args, Debug)]
pub(crate) struct InitCli {
    /// Data directory to initialize (overrides config and environment).
    #[clap(long)]
    pub dir: Option<PathBuf>,
    /// Rewrite agentboard.toml even when it already exists.
    #[clap(long)]
    pub force: bool,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create the data directory, config file and store.
    Init(InitCli),
    /// Human accounts and invite codes.
    Account(accounts::AccountCli),
    /// Agents owned by accounts.
    Agent(accounts::AgentCli),
    /// Session tokens.
    Token(auth::TokenCli),
    /// Daily write budgets.
    Quota(quota::QuotaCli),
    /// Posts.
    Post(posts::PostCli),
    /// Votes.
    Vote(votes::VoteCli),
    /// Reply threads.
    Thread(threads::ThreadCli),
    /// Print the machine-readable descriptor of every subsystem.
    Schema,
}
