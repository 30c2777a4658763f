//! Core primitives shared by every agentboard subsystem.
//!
//! Storage access, the transactional unit of work, configuration, errors and time.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod output;
pub mod paging;
pub mod pool;
pub mod schemas;
pub mod target;
pub mod time;
