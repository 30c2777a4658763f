//! Session tokens for agents.
//!
//! Provides:
//! - Access/refresh JWT pairs (HS256) carrying `{sub, type, jti, iat, exp}`
//! - Access validation with typed failures (expired, malformed, wrong type)
//! - Single-use refresh rotation backed by the `refresh_grants` table
//! - API-key login

use crate::board::Board;
use crate::core::broker::DbBroker;
use crate::core::config::{BoardConfig, MIN_SECRET_LEN};
use crate::core::error::{AuthFailure, BoardError};
use crate::core::time;
use crate::plugins::accounts;
use clap::{Parser, Subcommand};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[clap(name = "token", about = "Issue, validate and rotate agent session tokens")]
pub struct TokenCli {
    #[clap(subcommand)]
    pub command: TokenCommand,
}

#[derive(Subcommand, Debug)]
pub enum TokenCommand {
    /// Exchange an agent API key for a token pair.
    Login {
        #[clap(long, env = "AGENTBOARD_API_KEY")]
        api_key: String,
    },
    /// Validate an access token and print its principal.
    Validate {
        #[clap(long)]
        token: String,
    },
    /// Trade a refresh token for a new pair.
    Rotate {
        #[clap(long)]
        refresh: String,
    },
    /// Delete refresh grants whose tokens have expired.
    Prune,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Agent id
    pub sub: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub jti: String,
    pub iat: u64,
    pub exp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: u64,
    pub refresh_expires_at: u64,
}

#[derive(Clone)]
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl TokenAuthority {
    pub fn new(secret: &str, access_ttl_secs: u64, refresh_ttl_secs: u64) -> Result<Self, BoardError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(BoardError::ConfigError(format!(
                "token secret must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl_secs,
            refresh_ttl_secs,
        })
    }

    pub fn from_config(config: &BoardConfig) -> Result<Self, BoardError> {
        Self::new(
            &config.jwt_secret,
            config.access_ttl_secs,
            config.refresh_ttl_secs,
        )
    }

    fn sign(&self, claims: &Claims) -> Result<String, BoardError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| BoardError::ConfigError(format!("failed to sign token: {}", e)))
    }

    /// Decode and verify signature and expiry; the type is checked by callers.
    pub fn decode(&self, token: &str) -> Result<Claims, BoardError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => BoardError::Auth(AuthFailure::Expired),
                _ => BoardError::Auth(AuthFailure::Malformed),
            })
    }

    /// Principal of a valid, unexpired access token.
    pub fn validate_access(&self, token: &str) -> Result<String, BoardError> {
        let claims = self.decode(token)?;
        if claims.token_type != TokenType::Access {
            return Err(BoardError::Auth(AuthFailure::WrongType));
        }
        Ok(claims.sub)
    }

    pub fn validate_refresh(&self, token: &str) -> Result<Claims, BoardError> {
        let claims = self.decode(token)?;
        if claims.token_type != TokenType::Refresh {
            return Err(BoardError::Auth(AuthFailure::WrongType));
        }
        Ok(claims)
    }

    /// Sign a pair without touching the store. `refresh_not_before` forces the refresh
    /// expiry past a previous token's.
    fn mint(
        &self,
        agent_id: &str,
        now: u64,
        refresh_not_before: Option<u64>,
    ) -> Result<(TokenPair, Claims), BoardError> {
        let access = Claims {
            sub: agent_id.to_string(),
            token_type: TokenType::Access,
            jti: time::new_id(),
            iat: now,
            exp: now + self.access_ttl_secs,
        };
        let refresh_exp = match refresh_not_before {
            Some(floor) => (now + self.refresh_ttl_secs).max(floor + 1),
            None => now + self.refresh_ttl_secs,
        };
        let refresh = Claims {
            sub: agent_id.to_string(),
            token_type: TokenType::Refresh,
            jti: time::new_id(),
            iat: now,
            exp: refresh_exp,
        };
        let pair = TokenPair {
            access_token: self.sign(&access)?,
            refresh_token: self.sign(&refresh)?,
            access_expires_at: access.exp,
            refresh_expires_at: refresh.exp,
        };
        Ok((pair, refresh))
    }

    /// Issue a fresh pair for a live agent and record its refresh grant.
    pub fn issue_pair(&self, broker: &DbBroker, agent_id: &str) -> Result<TokenPair, BoardError> {
        let (pair, refresh) = self.mint(agent_id, time::now_secs(), None)?;
        broker.with_tx(agent_id, "token.issue", |tx| {
            require_live_principal(tx, agent_id)?;
            record_grant(tx, &refresh)
        })?;
        debug!(agent_id, "token pair issued");
        Ok(pair)
    }

    /// Trade a refresh token for a new pair. The presented token is consumed in the
    /// same unit of work that records the new grant; presenting it again fails
    /// `RefreshReused`.
    pub fn rotate(&self, broker: &DbBroker, refresh_token: &str) -> Result<TokenPair, BoardError> {
        let presented = self.validate_refresh(refresh_token)?;
        let (pair, refresh) = self.mint(&presented.sub, time::now_secs(), Some(presented.exp))?;

        broker.with_tx(&presented.sub, "token.rotate", |tx| {
            require_live_principal(tx, &presented.sub)?;
            let consumed = tx.execute(
                "UPDATE refresh_grants SET consumed_at = ?1
                 WHERE jti = ?2 AND agent_id = ?3 AND consumed_at IS NULL",
                params![time::now_ms(), presented.jti, presented.sub],
            )?;
            if consumed != 1 {
                let known: Option<i64> = tx
                    .query_row(
                        "SELECT 1 FROM refresh_grants WHERE jti = ?1",
                        params![presented.jti],
                        |row| row.get(0),
                    )
                    .optional()?;
                return Err(BoardError::Auth(match known {
                    Some(_) => AuthFailure::RefreshReused,
                    None => AuthFailure::Malformed,
                }));
            }
            record_grant(tx, &refresh)
        })
        .inspect_err(|e| {
            if matches!(e, BoardError::Auth(AuthFailure::RefreshReused)) {
                warn!(agent_id = %presented.sub, jti = %presented.jti, "refresh token replayed");
            }
        })?;

        info!(agent_id = %presented.sub, "session rotated");
        Ok(pair)
    }

    /// API-key login: resolve the key, then issue a pair.
    pub fn login(&self, broker: &DbBroker, api_key: &str) -> Result<TokenPair, BoardError> {
        let agent_id = accounts::authenticate_api_key(broker, api_key)?;
        self.issue_pair(broker, &agent_id)
    }
}

fn require_live_principal(conn: &Connection, agent_id: &str) -> Result<(), BoardError> {
    if accounts::agent_is_live(conn, agent_id)? {
        Ok(())
    } else {
        Err(BoardError::Auth(AuthFailure::UnknownPrincipal))
    }
}

fn record_grant(conn: &Connection, refresh: &Claims) -> Result<(), BoardError> {
    conn.execute(
        "INSERT INTO refresh_grants(jti, agent_id, expires_at, created_at) VALUES(?1, ?2, ?3, ?4)",
        params![
            refresh.jti,
            refresh.sub,
            (refresh.exp as i64) * 1000,
            time::now_ms()
        ],
    )?;
    Ok(())
}

pub fn prune_expired_grants(broker: &DbBroker) -> Result<usize, BoardError> {
    broker.with_tx("scheduler", "token.prune", |tx| {
        Ok(tx.execute(
            "DELETE FROM refresh_grants WHERE expires_at < ?1",
            params![time::now_ms()],
        )?)
    })
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn extract_bearer(header: Option<&str>) -> Option<&str> {
    let token = header?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() { None } else { Some(token) }
}

pub fn run_token_cli(board: &Board, cli: TokenCli) -> Result<serde_json::Value, BoardError> {
    let tokens = board.tokens();
    let broker = board.broker();
    match cli.command {
        TokenCommand::Login { api_key } => {
            let pair = tokens.login(broker, &api_key)?;
            Ok(time::command_envelope(
                "token.login",
                "ok",
                serde_json::json!({ "tokens": pair }),
            ))
        }
        TokenCommand::Validate { token } => {
            let agent_id = tokens.validate_access(&token)?;
            Ok(time::command_envelope(
                "token.validate",
                "ok",
                serde_json::json!({ "agent_id": agent_id }),
            ))
        }
        TokenCommand::Rotate { refresh } => {
            let pair = tokens.rotate(broker, &refresh)?;
            Ok(time::command_envelope(
                "token.rotate",
                "ok",
                serde_json::json!({ "tokens": pair }),
            ))
        }
        TokenCommand::Prune => {
            let pruned = prune_expired_grants(broker)?;
            Ok(time::command_envelope(
                "token.prune",
                "ok",
                serde_json::json!({ "pruned": pruned }),
            ))
        }
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "token",
        "version": "0.1.0",
        "description": "Access/refresh session tokens for agents",
        "commands": [
            { "name": "login", "parameters": ["api_key"] },
            { "name": "validate", "parameters": ["token"] },
            { "name": "rotate", "parameters": ["refresh"] },
            { "name": "prune" }
        ],
        "storage": ["board.db:refresh_grants"]
    })
}
