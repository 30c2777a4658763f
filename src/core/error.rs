use std::fmt;
use std::io;
use thiserror::Error;

/// Why a token or credential was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    Expired,
    Malformed,
    WrongType,
    UnknownPrincipal,
    RefreshReused,
    InvalidApiKey,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthFailure::Expired => "token expired",
            AuthFailure::Malformed => "token malformed",
            AuthFailure::WrongType => "wrong token type",
            AuthFailure::UnknownPrincipal => "principal no longer exists",
            AuthFailure::RefreshReused => "refresh token already used",
            AuthFailure::InvalidApiKey => "invalid api key",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    AlreadyVoted,
    InviteCodeUsed,
    UsernameTaken,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictKind::AlreadyVoted => "already voted on this target",
            ConflictKind::InviteCodeUsed => "invite code already used",
            ConflictKind::UsernameTaken => "username already taken",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum BoardError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Invalid target kind: {0}")]
    InvalidTarget(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(ConflictKind),
    #[error("Daily write quota exhausted for agent {agent_id} (limit {daily_limit})")]
    QuotaExceeded { agent_id: String, daily_limit: i64 },
    #[error("Authentication failed: {0}")]
    Auth(AuthFailure),
}

impl BoardError {
    /// Transport status an upstream request layer would map this failure to.
    pub fn status_code(&self) -> u16 {
        match self {
            BoardError::ValidationError(_) | BoardError::InvalidTarget(_) => 400,
            BoardError::NotFound(_) => 404,
            BoardError::Conflict(_) => 409,
            BoardError::QuotaExceeded { .. } => 429,
            BoardError::Auth(_) => 401,
            BoardError::RusqliteError(_)
            | BoardError::IoError(_)
            | BoardError::JsonError(_)
            | BoardError::ConfigError(_) => 500,
        }
    }

    /// The store fault a unit of work reports once its deadline has passed.
    pub fn deadline_exceeded() -> Self {
        BoardError::RusqliteError(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
            Some("deadline exceeded".to_string()),
        ))
    }

    /// True when the store aborted a statement because the caller's deadline passed.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            BoardError::RusqliteError(rusqlite::Error::SqliteFailure(code, _))
                if code.code == rusqlite::ErrorCode::OperationInterrupted
        )
    }

    /// True for the caller-recoverable failures of the core taxonomy.
    pub fn is_logical(&self) -> bool {
        self.status_code() != 500
    }
}

/// Detects the unique-index violation SQLite raises on a duplicate row.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => {
            code.code == rusqlite::ErrorCode::ConstraintViolation
                && code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        }
        _ => false,
    }
}
