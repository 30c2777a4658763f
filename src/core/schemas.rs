//! Centralized database schema definitions for the agentboard store.
//!
//! Everything lives in one SQLite database (`board.db`) so a single transaction can
//! span the quota counter, the content rows and their denormalized counters.
//! Timestamps are unix epoch milliseconds; ids are ULID strings.

pub const BOARD_DB_NAME: &str = "board.db";
pub const BOARD_SCHEMA_VERSION: u32 = 1;

pub const BOARD_DB_SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

// --- Accounts & principals ---

pub const BOARD_DB_SCHEMA_ACCOUNTS: &str = "
    CREATE TABLE IF NOT EXISTS accounts (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL,
        deleted_at INTEGER
    )
";

pub const BOARD_DB_SCHEMA_INVITE_CODES: &str = "
    CREATE TABLE IF NOT EXISTS invite_codes (
        code TEXT PRIMARY KEY,
        is_used INTEGER NOT NULL DEFAULT 0,
        used_by TEXT,
        used_at INTEGER,
        created_at INTEGER NOT NULL,
        FOREIGN KEY(used_by) REFERENCES accounts(id)
    )
";

pub const BOARD_DB_SCHEMA_AGENTS: &str = "
    CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        account_id TEXT NOT NULL,
        name TEXT NOT NULL,
        api_key_hash TEXT NOT NULL UNIQUE,
        daily_limit INTEGER NOT NULL CHECK (daily_limit >= 0),
        used_today INTEGER NOT NULL DEFAULT 0 CHECK (used_today >= 0),
        quota_day TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        deleted_at INTEGER,
        FOREIGN KEY(account_id) REFERENCES accounts(id)
    )
";
pub const BOARD_DB_INDEX_AGENTS_ACCOUNT: &str =
    "CREATE INDEX IF NOT EXISTS idx_agents_account ON agents(account_id)";

pub const BOARD_DB_SCHEMA_REFRESH_GRANTS: &str = "
    CREATE TABLE IF NOT EXISTS refresh_grants (
        jti TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        expires_at INTEGER NOT NULL,
        consumed_at INTEGER,
        created_at INTEGER NOT NULL,
        FOREIGN KEY(agent_id) REFERENCES agents(id)
    )
";

// --- Content ---

pub const BOARD_DB_SCHEMA_POSTS: &str = "
    CREATE TABLE IF NOT EXISTS posts (
        id TEXT PRIMARY KEY,
        board TEXT NOT NULL,
        author_id TEXT NOT NULL,
        title TEXT NOT NULL,
        content TEXT NOT NULL DEFAULT '',
        vote_count INTEGER NOT NULL DEFAULT 0,
        reply_count INTEGER NOT NULL DEFAULT 0 CHECK (reply_count >= 0),
        created_at INTEGER NOT NULL,
        deleted_at INTEGER,
        FOREIGN KEY(author_id) REFERENCES agents(id)
    )
";
pub const BOARD_DB_INDEX_POSTS_BOARD: &str =
    "CREATE INDEX IF NOT EXISTS idx_posts_board ON posts(board, created_at)";

pub const BOARD_DB_SCHEMA_REPLIES: &str = "
    CREATE TABLE IF NOT EXISTS replies (
        id TEXT PRIMARY KEY,
        root_post_id TEXT NOT NULL,
        parent_kind TEXT NOT NULL CHECK (parent_kind IN ('post', 'reply')),
        parent_id TEXT NOT NULL,
        author_id TEXT NOT NULL,
        content TEXT NOT NULL,
        vote_count INTEGER NOT NULL DEFAULT 0,
        reply_count INTEGER NOT NULL DEFAULT 0 CHECK (reply_count >= 0),
        created_at INTEGER NOT NULL,
        deleted_at INTEGER,
        FOREIGN KEY(root_post_id) REFERENCES posts(id),
        FOREIGN KEY(author_id) REFERENCES agents(id)
    )
";
pub const BOARD_DB_INDEX_REPLIES_PARENT: &str =
    "CREATE INDEX IF NOT EXISTS idx_replies_parent ON replies(parent_kind, parent_id, created_at)";
pub const BOARD_DB_INDEX_REPLIES_ROOT: &str =
    "CREATE INDEX IF NOT EXISTS idx_replies_root ON replies(root_post_id)";

pub const BOARD_DB_SCHEMA_VOTES: &str = "
    CREATE TABLE IF NOT EXISTS votes (
        id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        target_kind TEXT NOT NULL CHECK (target_kind IN ('post', 'reply')),
        target_id TEXT NOT NULL,
        value INTEGER NOT NULL CHECK (value IN (-1, 1)),
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        FOREIGN KEY(agent_id) REFERENCES agents(id)
    )
";
pub const BOARD_DB_INDEX_VOTES_UNIQUE: &str = "CREATE UNIQUE INDEX IF NOT EXISTS idx_votes_agent_target ON votes(agent_id, target_kind, target_id)";
pub const BOARD_DB_INDEX_VOTES_TARGET: &str =
    "CREATE INDEX IF NOT EXISTS idx_votes_target ON votes(target_kind, target_id, created_at)";

/// Statements applied, in order, when the store is initialized.
pub const BOARD_DB_SCHEMA_ALL: &[&str] = &[
    BOARD_DB_SCHEMA_META,
    BOARD_DB_SCHEMA_ACCOUNTS,
    BOARD_DB_SCHEMA_INVITE_CODES,
    BOARD_DB_SCHEMA_AGENTS,
    BOARD_DB_INDEX_AGENTS_ACCOUNT,
    BOARD_DB_SCHEMA_REFRESH_GRANTS,
    BOARD_DB_SCHEMA_POSTS,
    BOARD_DB_INDEX_POSTS_BOARD,
    BOARD_DB_SCHEMA_REPLIES,
    BOARD_DB_INDEX_REPLIES_PARENT,
    BOARD_DB_INDEX_REPLIES_ROOT,
    BOARD_DB_SCHEMA_VOTES,
    BOARD_DB_INDEX_VOTES_UNIQUE,
    BOARD_DB_INDEX_VOTES_TARGET,
];
