//! The shared service handle: one per process, shared across workers behind an `Arc`
//! or by cloning (clones share the store, the throttle and the notifier).

use crate::core::broker::DbBroker;
use crate::core::config::BoardConfig;
use crate::core::error::{AuthFailure, BoardError};
use crate::plugins::auth::{self, TokenAuthority};
use crate::plugins::notify::{Dispatcher, NotificationSink};
use crate::plugins::throttle::RequestThrottle;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Clone)]
pub struct Board {
    config: Arc<BoardConfig>,
    broker: DbBroker,
    tokens: Arc<TokenAuthority>,
    throttle: Arc<RequestThrottle>,
    notifier: Dispatcher,
}

impl Board {
    pub fn open(config: BoardConfig) -> Result<Self, BoardError> {
        config.validate()?;
        let broker = DbBroker::open(&config)?;
        let tokens = TokenAuthority::from_config(&config)?;
        let throttle = RequestThrottle::new(
            Duration::from_secs(config.throttle_window_secs),
            config.throttle_max_requests,
        );
        info!(db = %broker.db_path().display(), "board store opened");
        Ok(Self {
            config: Arc::new(config),
            broker,
            tokens: Arc::new(tokens),
            throttle: Arc::new(throttle),
            notifier: Dispatcher::default(),
        })
    }

    /// A view of this board whose store calls all give up at `deadline`.
    ///
    /// A request handler scopes the board once and passes the view to every
    /// operation; an expired unit rolls back and reports `is_cancelled()`.
    pub fn until(&self, deadline: Instant) -> Self {
        Self {
            broker: self.broker.until(deadline),
            ..self.clone()
        }
    }

    /// Replace the notification sink (defaults to logging).
    pub fn with_notifier(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Dispatcher::new(sink);
        self
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn broker(&self) -> &DbBroker {
        &self.broker
    }

    pub fn tokens(&self) -> &TokenAuthority {
        &self.tokens
    }

    pub fn throttle(&self) -> &RequestThrottle {
        &self.throttle
    }

    pub fn notifier(&self) -> &Dispatcher {
        &self.notifier
    }

    /// Resolve the principal behind an `Authorization` header value or a bare token.
    pub fn authenticate(&self, credential: &str) -> Result<String, BoardError> {
        let token = auth::extract_bearer(Some(credential)).unwrap_or(credential.trim());
        if token.is_empty() {
            return Err(BoardError::Auth(AuthFailure::Malformed));
        }
        self.tokens.validate_access(token)
    }

    /// Coarse abuse guard for an inbound request from `addr`.
    pub fn admit(&self, addr: IpAddr) -> bool {
        let admitted = self.throttle.check_and_record(addr);
        if !admitted {
            warn!(client = %addr, "request throttled");
        }
        admitted
    }

    /// Requests `addr` may still make in the current throttle window.
    pub fn remaining(&self, addr: IpAddr) -> u32 {
        self.throttle.remaining(addr)
    }
}
